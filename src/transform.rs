// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Source to replica transformation.
//!
//! The steps run in order and are individually testable:
//!
//! 1. [`process_message_body`]: body normalisation and content type
//! 2. [`create_enhanced_properties`]: property copy plus replication metadata
//! 3. identity generation (see [`crate::identity`])
//! 4. [`create_replicated_message`]: assembly with routing fields and TTL

use crate::error::{ReplicationError, Result};
use crate::identity::generate_replicated_message_id;
use crate::message::{MessageBody, Properties, PropertyValue, ReplicatedMessage, SourceMessage};
use chrono::{SecondsFormat, Utc};
use std::time::Duration;

pub const CONTENT_TYPE_BINARY: &str = "application/octet-stream";
pub const CONTENT_TYPE_TEXT_UTF8: &str = "text/plain; charset=utf-8";

pub const PROP_ORIGINAL_MESSAGE_ID: &str = "x-original-message-id";
pub const PROP_REPLICATION_CORRELATION_ID: &str = "x-replication-correlation-id";
pub const PROP_REPLICATION_TIMESTAMP: &str = "x-replication-timestamp";

/// Normalise a body to bytes and choose its content type.
///
/// Bytes pass through untouched; text is UTF-8 encoded; anything else is
/// stringified first. An explicit content type always wins.
pub fn process_message_body(body: &MessageBody, content_type: Option<&str>) -> (Vec<u8>, String) {
    let (bytes, default_type) = match body {
        MessageBody::Bytes(bytes) => (bytes.clone(), CONTENT_TYPE_BINARY),
        MessageBody::Text(text) => (text.as_bytes().to_vec(), CONTENT_TYPE_TEXT_UTF8),
        MessageBody::Value(value) => (stringify_value(value).into_bytes(), CONTENT_TYPE_TEXT_UTF8),
    };
    let content_type = content_type
        .filter(|ct| !ct.is_empty())
        .unwrap_or(default_type)
        .to_string();
    (bytes, content_type)
}

/// Strings render bare, everything else as compact JSON.
fn stringify_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Copy source properties and add the three replication keys.
///
/// The added keys overwrite same-named source properties.
pub fn create_enhanced_properties(source: &SourceMessage, correlation_id: &str) -> Properties {
    let mut properties = source.application_properties.clone().unwrap_or_default();
    properties.insert(
        PROP_ORIGINAL_MESSAGE_ID,
        PropertyValue::from(source.message_id.clone()),
    );
    properties.insert(PROP_REPLICATION_CORRELATION_ID, correlation_id);
    properties.insert(
        PROP_REPLICATION_TIMESTAMP,
        Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
    );
    properties
}

/// Build the outbound replica of `source`.
///
/// `ttl_seconds` is applied only when present and positive; a missing TTL
/// leaves the destination default in place.
pub fn create_replicated_message(
    source: &SourceMessage,
    correlation_id: &str,
    ttl_seconds: Option<u64>,
) -> Result<ReplicatedMessage> {
    if correlation_id.is_empty() {
        return Err(ReplicationError::transform(
            source.message_id.as_deref(),
            "empty correlation id",
        ));
    }

    let (body, content_type) = process_message_body(&source.body, source.content_type.as_deref());
    let application_properties = create_enhanced_properties(source, correlation_id);
    // Always strictly longer than the source id, so never equal to it.
    let message_id = generate_replicated_message_id(correlation_id, source.message_id.as_deref());

    Ok(ReplicatedMessage {
        body,
        content_type,
        message_id,
        correlation_id: correlation_id.to_string(),
        application_properties,
        subject: source.subject.clone(),
        session_id: source.session_id.clone(),
        to: source.to.clone(),
        reply_to: source.reply_to.clone(),
        reply_to_session_id: source.reply_to_session_id.clone(),
        partition_key: source.partition_key.clone(),
        scheduled_enqueue_time: source.scheduled_enqueue_time,
        time_to_live: ttl_seconds.filter(|s| *s > 0).map(Duration::from_secs),
    })
}

/// Stamp the loop-prevention marker onto a replica.
pub fn mark_replicated(message: &mut ReplicatedMessage, marker_property: &str, origin: &str) {
    message.application_properties.insert(marker_property, origin);
}
