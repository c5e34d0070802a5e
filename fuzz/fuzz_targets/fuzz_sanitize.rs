//! Fuzz target for log sanitization.
//!
//! `sanitize_log_message` must never panic, and a shared access key
//! embedded anywhere in the input must not survive.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replication_relay::sanitize::{sanitize_log_message, truncate_correlation_id};

fuzz_target!(|data: (&str, &str)| {
    let (prefix, suffix) = data;

    let _ = sanitize_log_message(prefix);
    let _ = truncate_correlation_id(prefix, 8);

    let secret = "SharedAccessKey=Zm9vYmFyYmF6cXV4MTIzNDU2Nzg5MA==";
    let input = format!("{prefix};{secret};{suffix}");
    let sanitized = sanitize_log_message(&input);
    assert!(!sanitized.contains("Zm9vYmFyYmF6cXV4MTIzNDU2Nzg5MA=="));
});
