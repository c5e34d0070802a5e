//! Redaction of secrets before text reaches a log sink.
//!
//! Broker errors routinely echo the full connection string back, so every
//! error message is passed through [`sanitize_log_message`] before it is
//! recorded. Patterns are applied in order; earlier ones are more specific.

use once_cell::sync::Lazy;
use regex::Regex;

/// Connection string with endpoint, key name and key.
static CONNECTION_STRING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Endpoint=sb://[^;]+;SharedAccessKeyName=[^;]+;SharedAccessKey=[^;]+")
        .expect("connection string pattern is valid")
});

/// Stray key or signature fragments not caught as a full connection string.
static SHARED_ACCESS_FRAGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(SharedAccessKey|SharedAccessSignature)=[^;\s]+")
        .expect("shared access fragment pattern is valid")
});

static BASE64_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9+/]{20,}={0,2}").expect("base64 pattern is valid"));

static IPV4_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}\.\d{1,3})\.\d{1,3}\.\d{1,3}\b").expect("ipv4 pattern is valid")
});

static EMAIL_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@([A-Za-z0-9.-]+\.[A-Za-z]{2,})\b")
        .expect("email pattern is valid")
});

static HEX_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[0-9a-fA-F]{16,}\b").expect("hex pattern is valid"));

/// Mask connection strings, keys, long tokens, IPv4 host octets and email
/// local parts.
///
/// Total: any input produces a string, and the output never contains the
/// value of a `SharedAccessKey=` pair.
pub fn sanitize_log_message(message: &str) -> String {
    let text = CONNECTION_STRING.replace_all(
        message,
        "Endpoint=sb://***;SharedAccessKeyName=***;SharedAccessKey=***",
    );
    let text = SHARED_ACCESS_FRAGMENT.replace_all(&text, "${1}=***");
    let text = BASE64_TOKEN.replace_all(&text, "***REDACTED***");
    let text = IPV4_ADDRESS.replace_all(&text, "${1}.*.*");
    let text = EMAIL_ADDRESS.replace_all(&text, "***@${1}");
    let text = HEX_TOKEN.replace_all(&text, "***TOKEN***");
    text.into_owned()
}

/// Shorten a correlation id for compact log lines: `abcdefgh...`.
pub fn truncate_correlation_id(correlation_id: &str, max_chars: usize) -> String {
    if correlation_id.chars().count() <= max_chars {
        return correlation_id.to_string();
    }
    let prefix: String = correlation_id.chars().take(max_chars).collect();
    format!("{prefix}...")
}
