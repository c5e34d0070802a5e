//! Typed message views.
//!
//! [`SourceMessage`] is produced once at the ingress boundary by the broker
//! adapter, so the pipeline never guesses at optional attributes.
//! [`ReplicatedMessage`] is the outbound value owned by the relay until it
//! is handed to a sender.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Value of an application property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Python-style truthiness, used by the loop-prevention check.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.is_empty(),
        }
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl<T: Into<PropertyValue>> From<Option<T>> for PropertyValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Application properties in insertion order.
///
/// Inserting an existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Properties(Vec<(String, PropertyValue)>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<PropertyValue>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Properties::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

/// Body of an inbound message as the client adapter delivered it.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Bytes(Vec<u8>),
    Text(String),
    /// Structured value (AMQP value or sequence section), stringified on replication.
    Value(serde_json::Value),
}

impl MessageBody {
    /// Type name recorded in success logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "text",
            Self::Value(_) => "value",
        }
    }
}

impl From<Vec<u8>> for MessageBody {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<&[u8]> for MessageBody {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl From<String> for MessageBody {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for MessageBody {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<serde_json::Value> for MessageBody {
    fn from(value: serde_json::Value) -> Self {
        Self::Value(value)
    }
}

/// Inbound message, read-only to the relay.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMessage {
    pub body: MessageBody,
    pub content_type: Option<String>,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub subject: Option<String>,
    pub session_id: Option<String>,
    pub to: Option<String>,
    pub reply_to: Option<String>,
    pub reply_to_session_id: Option<String>,
    pub partition_key: Option<String>,
    pub scheduled_enqueue_time: Option<DateTime<Utc>>,
    /// `None` when the broker delivered no property section.
    pub application_properties: Option<Properties>,
    pub delivery_count: u32,
    /// Broker-assigned position, used to pair complete/abandon with the lock.
    pub sequence_number: i64,
    pub enqueued_time: Option<DateTime<Utc>>,
}

impl SourceMessage {
    pub fn new(body: impl Into<MessageBody>) -> Self {
        Self {
            body: body.into(),
            content_type: None,
            message_id: None,
            correlation_id: None,
            subject: None,
            session_id: None,
            to: None,
            reply_to: None,
            reply_to_session_id: None,
            partition_key: None,
            scheduled_enqueue_time: None,
            application_properties: None,
            delivery_count: 0,
            sequence_number: 0,
            enqueued_time: None,
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.application_properties
            .get_or_insert_with(Properties::new)
            .insert(key, value);
        self
    }

    /// Property lookup that treats a missing section as empty.
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.application_properties.as_ref()?.get(key)
    }
}

/// Outbound replica of a [`SourceMessage`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicatedMessage {
    pub body: Vec<u8>,
    pub content_type: String,
    pub message_id: String,
    pub correlation_id: String,
    pub application_properties: Properties,
    pub subject: Option<String>,
    pub session_id: Option<String>,
    pub to: Option<String>,
    pub reply_to: Option<String>,
    pub reply_to_session_id: Option<String>,
    pub partition_key: Option<String>,
    pub scheduled_enqueue_time: Option<DateTime<Utc>>,
    pub time_to_live: Option<Duration>,
}

impl ReplicatedMessage {
    pub fn body_size(&self) -> usize {
        self.body.len()
    }
}
