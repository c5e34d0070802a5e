// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Failure classification and reporting.
//!
//! [`classify`] maps any [`ReplicationError`] onto a closed set of
//! categories. [`report_error`] logs it exactly once, sanitized and tagged
//! with a severity, then hands the error back: recognized categories
//! unchanged, anything else wrapped as a generic replication failure.

use crate::error::{ReplicationError, TransportError, TransportErrorKind};
use crate::metrics;
use crate::sanitize::sanitize_log_message;
use tracing::error;

/// Alert severity attached to error records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    ResourceNotFound,
    ServiceRequest,
    Broker { status_code: Option<u16> },
    Http { status_code: Option<u16> },
    Service,
    Unexpected,
}

impl ErrorCategory {
    pub fn from_transport(err: &TransportError) -> Self {
        match err.kind {
            TransportErrorKind::Authentication => Self::Authentication,
            TransportErrorKind::NotFound => Self::ResourceNotFound,
            TransportErrorKind::ServiceRequest => Self::ServiceRequest,
            TransportErrorKind::Broker => Self::Broker {
                status_code: err.status_code,
            },
            TransportErrorKind::Http => Self::Http {
                status_code: err.status_code,
            },
            TransportErrorKind::Service => Self::Service,
            TransportErrorKind::Other => Self::Unexpected,
        }
    }

    /// Tag written to the `error_type` log field.
    pub fn type_tag(self) -> &'static str {
        match self {
            Self::Authentication => "authentication_error",
            Self::ResourceNotFound => "resource_not_found",
            Self::ServiceRequest => "service_request_error",
            Self::Broker { .. } => "service_bus_error",
            Self::Http { .. } => "http_response_error",
            Self::Service => "service_error",
            Self::Unexpected => "unexpected_error",
        }
    }

    pub fn severity(self) -> AlertSeverity {
        match self {
            Self::Authentication | Self::Unexpected => AlertSeverity::Critical,
            _ => AlertSeverity::High,
        }
    }

    pub fn status_code(self) -> Option<u16> {
        match self {
            Self::Broker { status_code } | Self::Http { status_code } => status_code,
            _ => None,
        }
    }

    fn summary(self) -> &'static str {
        match self {
            Self::Authentication => "Authentication failed",
            Self::ResourceNotFound => "Destination resource not found",
            Self::ServiceRequest => "Service request failed",
            Self::Broker { .. } => "Broker operation failed",
            Self::Http { .. } => "HTTP response error",
            Self::Service => "Service error",
            Self::Unexpected => "Unexpected replication error",
        }
    }
}

/// Category of any relay error.
///
/// Transport failures are classified by their kind, including when wrapped
/// by retry exhaustion or discovery. Everything else is unexpected.
pub fn classify(err: &ReplicationError) -> ErrorCategory {
    err.transport()
        .map(ErrorCategory::from_transport)
        .unwrap_or(ErrorCategory::Unexpected)
}

/// Where a failure happened, for the error record.
#[derive(Debug, Clone, Copy)]
pub struct ErrorContext<'a> {
    pub correlation_id: &'a str,
    pub direction: &'a str,
    pub destination: &'a str,
}

/// Log `err` once and return the error to propagate.
pub fn report_error(err: ReplicationError, ctx: &ErrorContext<'_>) -> ReplicationError {
    let category = classify(&err);
    let severity = category.severity();
    let message = sanitize_log_message(&err.to_string());

    error!(
        correlation_id = %ctx.correlation_id,
        error_type = category.type_tag(),
        error_message = %message,
        direction = %ctx.direction,
        destination = %ctx.destination,
        status_code = category.status_code(),
        alert_severity = %severity,
        "{}",
        category.summary()
    );
    metrics::record_error(category.type_tag(), severity.as_str());

    match category {
        ErrorCategory::Unexpected => ReplicationError::Replication(format!(
            "Unexpected error during message replication: {message}"
        )),
        _ => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ErrorContext<'static> {
        ErrorContext {
            correlation_id: "corr-1",
            direction: "Primary → Secondary",
            destination: "orders",
        }
    }

    #[test]
    fn test_transport_categories() {
        let cases = [
            (TransportError::authentication("x"), "authentication_error", AlertSeverity::Critical),
            (TransportError::not_found("x"), "resource_not_found", AlertSeverity::High),
            (TransportError::service_request("x"), "service_request_error", AlertSeverity::High),
            (TransportError::broker("x", Some(503)), "service_bus_error", AlertSeverity::High),
            (TransportError::http("x", Some(500)), "http_response_error", AlertSeverity::High),
            (TransportError::service("x"), "service_error", AlertSeverity::High),
            (TransportError::other("x"), "unexpected_error", AlertSeverity::Critical),
        ];
        for (err, tag, severity) in cases {
            let category = ErrorCategory::from_transport(&err);
            assert_eq!(category.type_tag(), tag);
            assert_eq!(category.severity(), severity);
        }
    }

    #[test]
    fn test_status_code_carried() {
        let category = ErrorCategory::from_transport(&TransportError::broker("busy", Some(503)));
        assert_eq!(category.status_code(), Some(503));
        assert_eq!(ErrorCategory::Service.status_code(), None);
    }

    #[test]
    fn test_classify_sees_through_retry_exhaustion() {
        let err = ReplicationError::RetriesExhausted {
            attempts: 3,
            source: TransportError::http("bad gateway", Some(502)),
        };
        assert_eq!(classify(&err), ErrorCategory::Http { status_code: Some(502) });
    }

    #[test]
    fn test_classify_non_transport_is_unexpected() {
        let err = ReplicationError::transform(Some("m-1"), "bad body");
        assert_eq!(classify(&err), ErrorCategory::Unexpected);
        assert_eq!(classify(&ReplicationError::Shutdown), ErrorCategory::Unexpected);
    }

    #[test]
    fn test_report_recognized_returns_original() {
        let err = ReplicationError::Transport(TransportError::authentication("denied"));
        let returned = report_error(err, &ctx());
        assert!(matches!(
            returned,
            ReplicationError::Transport(TransportError { kind: TransportErrorKind::Authentication, .. })
        ));
    }

    #[test]
    fn test_report_unexpected_wraps() {
        let err = ReplicationError::Internal("boom".to_string());
        let returned = report_error(err, &ctx());
        match returned {
            ReplicationError::Replication(msg) => {
                assert!(msg.starts_with("Unexpected error during message replication:"));
                assert!(msg.contains("boom"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_report_unexpected_is_sanitized() {
        let err = ReplicationError::Internal(
            "Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=X;SharedAccessKey=abcdef1234567890abcdef=="
                .to_string(),
        );
        let returned = report_error(err, &ctx()).to_string();
        assert!(!returned.contains("abcdef1234567890abcdef"), "{returned}");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Critical > AlertSeverity::High);
        assert!(AlertSeverity::Medium > AlertSeverity::Low);
        assert_eq!(AlertSeverity::Medium.to_string(), "medium");
    }
}
