//! Correlation and message identity.
//!
//! The correlation id threads one logical replication through every log
//! line and across both namespaces. The replicated message id is derived
//! from it so that a resend of the same logical message produces the same
//! id and destination duplicate detection can absorb it.

use crate::message::SourceMessage;
use chrono::{SecondsFormat, Utc};

/// Prefix of generated correlation and message ids.
pub const CORRELATION_ID_PREFIX: &str = "repl";

/// Characters of the correlation id embedded in a replicated message id.
pub const CORRELATION_PREFIX_LEN: usize = 8;

/// Inherit the source correlation id, or mint `repl-<ISO-8601 UTC>`.
pub fn generate_correlation_id(source: &SourceMessage) -> String {
    match source.correlation_id.as_deref() {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => format!(
            "{CORRELATION_ID_PREFIX}-{}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
        ),
    }
}

/// `repl-<first 8 of correlation>-<original id>`, or `repl-<prefix>` when
/// the source carried no message id.
pub fn generate_replicated_message_id(
    correlation_id: &str,
    original_message_id: Option<&str>,
) -> String {
    let prefix: String = correlation_id.chars().take(CORRELATION_PREFIX_LEN).collect();
    match original_message_id {
        Some(id) if !id.is_empty() => format!("{CORRELATION_ID_PREFIX}-{prefix}-{id}"),
        _ => format!("{CORRELATION_ID_PREFIX}-{prefix}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn test_correlation_id_inherited() {
        let msg = SourceMessage::new("x").with_correlation_id("existing-id");
        assert_eq!(generate_correlation_id(&msg), "existing-id");
    }

    #[test]
    fn test_correlation_id_generated_is_timestamp() {
        let msg = SourceMessage::new("x");
        let id = generate_correlation_id(&msg);
        let ts = id.strip_prefix("repl-").expect("generated id has prefix");
        assert!(DateTime::parse_from_rfc3339(ts).is_ok(), "not ISO-8601: {ts}");
    }

    #[test]
    fn test_empty_correlation_id_is_replaced() {
        let msg = SourceMessage::new("x").with_correlation_id("");
        assert!(generate_correlation_id(&msg).starts_with("repl-"));
    }

    #[test]
    fn test_message_id_with_original() {
        let id = generate_replicated_message_id("abcdefghijkl", Some("orig-1"));
        assert_eq!(id, "repl-abcdefgh-orig-1");
    }

    #[test]
    fn test_message_id_without_original() {
        assert_eq!(generate_replicated_message_id("abcdefghijkl", None), "repl-abcdefgh");
        assert_eq!(generate_replicated_message_id("abcdefghijkl", Some("")), "repl-abcdefgh");
    }

    #[test]
    fn test_message_id_short_correlation() {
        assert_eq!(generate_replicated_message_id("abc", Some("m")), "repl-abc-m");
    }

    #[test]
    fn test_message_id_deterministic() {
        let a = generate_replicated_message_id("repl-2025-06-01T10:00:00Z", Some("m-42"));
        let b = generate_replicated_message_id("repl-2025-06-01T10:00:00Z", Some("m-42"));
        assert_eq!(a, b);
        assert_ne!(a, "m-42");
    }
}
