//! Fuzz target for replica id derivation.
//!
//! The replica id must be deterministic and must never equal a non-empty
//! original id, including for multi-byte correlation ids.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replication_relay::identity::generate_replicated_message_id;

fuzz_target!(|data: (&str, Option<&str>)| {
    let (correlation_id, original) = data;

    let first = generate_replicated_message_id(correlation_id, original);
    let second = generate_replicated_message_id(correlation_id, original);
    assert_eq!(first, second);
    assert!(first.starts_with("repl-"));

    if let Some(original) = original.filter(|o| !o.is_empty()) {
        assert_ne!(first, original);
    }
});
