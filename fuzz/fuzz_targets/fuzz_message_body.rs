//! Fuzz target for body normalisation.
//!
//! `process_message_body` is total: every body kind yields bytes and a
//! non-empty content type, and byte bodies pass through unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replication_relay::message::MessageBody;
use replication_relay::transform::process_message_body;

fuzz_target!(|data: (&[u8], &str, Option<&str>)| {
    let (bytes, text, content_type) = data;

    let (out, ct) = process_message_body(&MessageBody::Bytes(bytes.to_vec()), content_type);
    assert_eq!(out, bytes);
    assert!(!ct.is_empty());

    let (out, ct) = process_message_body(&MessageBody::Text(text.to_string()), content_type);
    assert_eq!(out, text.as_bytes());
    assert!(!ct.is_empty());

    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(bytes) {
        let (_, ct) = process_message_body(&MessageBody::Value(value), content_type);
        assert!(!ct.is_empty());
    }
});
