// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replication relay.
//!
//! Two layers of errors exist:
//!
//! - [`TransportError`] is what every broker collaborator returns. Its
//!   [`TransportErrorKind`] is a closed set produced once, at the boundary
//!   where the messaging client is called.
//! - [`ReplicationError`] is the crate-wide error. Transport failures flow
//!   into it unchanged (`Transport`) or wrapped by the retry policy
//!   (`RetriesExhausted`).
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Transport` (service request, HTTP, broker) | Yes | Network blips, throttling, broker busy |
//! | `Transport` (authentication, not found, service, other) | No | Credentials or topology wrong |
//! | `RetriesExhausted` | No | Already retried up to the configured limit |
//! | `Config` / `ConfigLoad` | No | Fix the configuration and restart |
//! | `Transform` | No | The source message cannot be converted |
//! | `Discovery` | No | Topology enumeration failed for this cycle |
//! | `Replication` | No | Unclassified failure wrapped at the orchestration boundary |
//! | `InvalidState` | No | Engine state machine violation |
//! | `Shutdown` | No | Engine is shutting down |
//! | `Io` | No | Local file output failed |
//! | `Internal` | No | Unexpected internal error |

use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Result type alias for broker collaborator calls.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Classification of a broker-side failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// Credentials rejected.
    Authentication,
    /// Topic, subscription or namespace does not exist.
    NotFound,
    /// The request did not reach the service (DNS, connect, timeout).
    ServiceRequest,
    /// Broker-protocol failure (busy, throttled, lock lost).
    Broker,
    /// Transport-level HTTP failure.
    Http,
    /// Any other service-side failure.
    Service,
    /// Not recognised by the client adapter.
    Other,
}

impl TransportErrorKind {
    /// Whether a retry can reasonably succeed.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::ServiceRequest | Self::Http | Self::Broker)
    }

    /// Short name used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::NotFound => "not_found",
            Self::ServiceRequest => "service_request",
            Self::Broker => "broker",
            Self::Http => "http",
            Self::Service => "service",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a broker collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    /// Status code reported by the broker, when it gives one.
    pub status_code: Option<u16>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Authentication, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::NotFound, message)
    }

    pub fn service_request(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::ServiceRequest, message)
    }

    pub fn broker(message: impl Into<String>, status_code: Option<u16>) -> Self {
        Self {
            status_code,
            ..Self::new(TransportErrorKind::Broker, message)
        }
    }

    pub fn http(message: impl Into<String>, status_code: Option<u16>) -> Self {
        Self {
            status_code,
            ..Self::new(TransportErrorKind::Http, message)
        }
    }

    pub fn service(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Service, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Other, message)
    }

    /// Whether the retry policy should try again.
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// Errors that can occur during replication.
///
/// Use [`is_retryable()`](Self::is_retryable) to check whether the failed
/// operation may succeed on another attempt.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Invalid or missing configuration.
    ///
    /// Detected once at startup, before any message is touched.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration sources could not be read or deserialized.
    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    /// A source message could not be converted into its replica.
    ///
    /// The message is abandoned and the cycle moves on.
    #[error("Transform error ({message_id}): {reason}")]
    Transform { message_id: String, reason: String },

    /// A broker call failed and was not retried.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A transient failure persisted through every attempt.
    #[error("Operation failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// Topic or subscription enumeration failed.
    #[error("Topology discovery failed on {namespace}: {source}")]
    Discovery {
        namespace: String,
        #[source]
        source: TransportError,
    },

    /// Generic wrapper for failures the classifier does not recognise.
    #[error("Replication failed: {0}")]
    Replication(String),

    /// Engine state machine violation.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Local I/O failure (CI output file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    /// Create a transform error for a message.
    pub fn transform(message_id: Option<&str>, reason: impl Into<String>) -> Self {
        Self::Transform {
            message_id: message_id.unwrap_or("<none>").to_string(),
            reason: reason.into(),
        }
    }

    /// The broker failure behind this error, if there is one.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(e) => Some(e),
            Self::RetriesExhausted { source, .. } => Some(source),
            Self::Discovery { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_transient(),
            Self::RetriesExhausted { .. } => false, // already retried
            Self::Config(_) => false,
            Self::ConfigLoad(_) => false,
            Self::Transform { .. } => false, // bad input stays bad
            Self::Discovery { .. } => false,
            Self::Replication(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Io(_) => false,
            Self::Internal(_) => false,
        }
    }
}
