//! Configuration for the replication relay.
//!
//! Built once at process entry and passed by reference into the engine;
//! nothing below the binary reads the environment.
//!
//! # Quick Start
//!
//! ```rust
//! use replication_relay::config::{ReplicationConfig, ReplicationDirection};
//!
//! let config = ReplicationConfig::for_testing("memory://primary", "memory://secondary");
//! assert_eq!(config.direction, ReplicationDirection::PrimaryToSecondary);
//! assert_eq!(config.ttl_seconds(), 720);
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicationConfig
//! ├── direction: ReplicationDirection   # one-way or bidirectional
//! ├── primary / secondary: EndpointConfig
//! ├── subscriptions: Vec<String>        # static mode only
//! ├── discover_topology: bool
//! ├── rto_minutes / delta_minutes       # TTL = (rto + delta) * 60
//! ├── retry: RetrySettings
//! ├── dead_letter: DeadLetterSettings
//! ├── batch: BatchSettings
//! ├── schedule: ScheduleSettings
//! ├── loop_prevention: LoopPreventionSettings
//! ├── concurrency: ConcurrencySettings
//! ├── circuit_breaker: CircuitBreakerSettings
//! └── logging: LoggingSettings
//! ```
//!
//! # Loading
//!
//! [`ReplicationConfig::load`] layers, lowest priority first:
//!
//! 1. `.env` (via dotenvy, if present)
//! 2. config file (`config/default.*`, or an explicit path)
//! 3. `RELAY_*` variables with `__` as the nesting separator
//!    (`RELAY_RETRY__MAX_ATTEMPTS=5`)
//! 4. the flat deployment variables (`REPLICATION_TYPE`,
//!    `SECONDARY_SERVICEBUS_CONN`, `RTO_MINUTES`, ...)
//!
//! # TOML Example
//!
//! ```toml
//! direction = "bidirectional"
//! rto_minutes = 15
//!
//! [primary]
//! connection = "memory://primary"
//!
//! [secondary]
//! connection = "memory://secondary"
//!
//! [retry]
//! max_attempts = 5
//! base_delay_secs = 0.5
//!
//! [schedule]
//! replication_timeout = "10m"
//! ```

use crate::error::{ReplicationError, Result};
use config::{Config, ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const SECONDS_PER_MINUTE: u64 = 60;

// ═══════════════════════════════════════════════════════════════════════════════
// Direction and routes
// ═══════════════════════════════════════════════════════════════════════════════

/// Which way messages flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationDirection {
    #[default]
    PrimaryToSecondary,
    SecondaryToPrimary,
    /// Both directions at once, over discovered topology.
    Bidirectional,
}

impl ReplicationDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrimaryToSecondary => "primary_to_secondary",
            Self::SecondaryToPrimary => "secondary_to_primary",
            Self::Bidirectional => "bidirectional",
        }
    }

    /// Readable form used in logs.
    pub fn label(self) -> &'static str {
        match self {
            Self::PrimaryToSecondary => "Primary → Secondary",
            Self::SecondaryToPrimary => "Secondary → Primary",
            Self::Bidirectional => "Primary ↔ Secondary",
        }
    }

    pub fn routes(self) -> Vec<Route> {
        match self {
            Self::PrimaryToSecondary => vec![Route::PRIMARY_TO_SECONDARY],
            Self::SecondaryToPrimary => vec![Route::SECONDARY_TO_PRIMARY],
            Self::Bidirectional => vec![Route::PRIMARY_TO_SECONDARY, Route::SECONDARY_TO_PRIMARY],
        }
    }
}

impl std::fmt::Display for ReplicationDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReplicationDirection {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "primary_to_secondary" => Ok(Self::PrimaryToSecondary),
            "secondary_to_primary" => Ok(Self::SecondaryToPrimary),
            "bidirectional" => Ok(Self::Bidirectional),
            other => Err(ReplicationError::Config(format!(
                "Invalid replication type '{other}'. Must be one of: \
                 primary_to_secondary, secondary_to_primary, bidirectional"
            ))),
        }
    }
}

/// One side of the namespace pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Primary,
    Secondary,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

/// A single source → destination flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Route {
    pub source: Side,
    pub destination: Side,
}

impl Route {
    pub const PRIMARY_TO_SECONDARY: Route = Route {
        source: Side::Primary,
        destination: Side::Secondary,
    };
    pub const SECONDARY_TO_PRIMARY: Route = Route {
        source: Side::Secondary,
        destination: Side::Primary,
    };

    /// Tag used in metrics labels and as the loop-prevention marker value.
    pub fn tag(self) -> &'static str {
        match self.source {
            Side::Primary => ReplicationDirection::PrimaryToSecondary.as_str(),
            Side::Secondary => ReplicationDirection::SecondaryToPrimary.as_str(),
        }
    }

    pub fn label(self) -> &'static str {
        match self.source {
            Side::Primary => ReplicationDirection::PrimaryToSecondary.label(),
            Side::Secondary => ReplicationDirection::SecondaryToPrimary.label(),
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// Validated relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    #[serde(default)]
    pub direction: ReplicationDirection,

    #[serde(default)]
    pub primary: EndpointConfig,

    #[serde(default)]
    pub secondary: EndpointConfig,

    /// Subscriptions to drain on every static topic.
    #[serde(default)]
    pub subscriptions: Vec<String>,

    /// Enumerate topics and subscriptions each cycle instead of using the
    /// static lists.
    #[serde(default = "default_true")]
    pub discover_topology: bool,

    #[serde(default = "default_rto_minutes")]
    pub rto_minutes: u64,

    #[serde(default = "default_delta_minutes")]
    pub delta_minutes: u64,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub dead_letter: DeadLetterSettings,

    #[serde(default)]
    pub batch: BatchSettings,

    #[serde(default)]
    pub schedule: ScheduleSettings,

    #[serde(default)]
    pub loop_prevention: LoopPreventionSettings,

    #[serde(default)]
    pub concurrency: ConcurrencySettings,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_true() -> bool {
    true
}

fn default_rto_minutes() -> u64 {
    10
}

fn default_delta_minutes() -> u64 {
    2
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            direction: ReplicationDirection::default(),
            primary: EndpointConfig::default(),
            secondary: EndpointConfig::default(),
            subscriptions: Vec::new(),
            discover_topology: true,
            rto_minutes: default_rto_minutes(),
            delta_minutes: default_delta_minutes(),
            retry: RetrySettings::default(),
            dead_letter: DeadLetterSettings::default(),
            batch: BatchSettings::default(),
            schedule: ScheduleSettings::default(),
            loop_prevention: LoopPreventionSettings::default(),
            concurrency: ConcurrencySettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ReplicationConfig {
    /// Minimal config with fast timings, for tests.
    pub fn for_testing(primary: &str, secondary: &str) -> Self {
        Self {
            primary: EndpointConfig::new(primary),
            secondary: EndpointConfig::new(secondary),
            retry: RetrySettings {
                max_attempts: 3,
                base_delay_secs: 0.1,
                attempt_timeout: "1s".to_string(),
            },
            batch: BatchSettings {
                batch_size: 10,
                max_wait: "10ms".to_string(),
                max_batches_per_subscription: 100,
            },
            schedule: ScheduleSettings {
                replication_timeout: "1s".to_string(),
                idle_wait: "50ms".to_string(),
                active_wait: "10ms".to_string(),
                error_backoff: "50ms".to_string(),
            },
            circuit_breaker: CircuitBreakerSettings {
                enabled: false,
                ..CircuitBreakerSettings::default()
            },
            ..Self::default()
        }
    }

    /// Message time-to-live: `(rto + delta) * 60`.
    pub fn ttl_seconds(&self) -> u64 {
        (self.rto_minutes + self.delta_minutes) * SECONDS_PER_MINUTE
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds())
    }

    pub fn active_routes(&self) -> Vec<Route> {
        self.direction.routes()
    }

    pub fn endpoint(&self, side: Side) -> &EndpointConfig {
        match side {
            Side::Primary => &self.primary,
            Side::Secondary => &self.secondary,
        }
    }

    /// Sources that must be receivable for the engine to run.
    pub fn source_sides(&self) -> Vec<Side> {
        self.active_routes().into_iter().map(|r| r.source).collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Loading
    // ─────────────────────────────────────────────────────────────────────────

    /// Load from `.env`, an optional file, and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::load_from(path, &vars)
    }

    /// Load with an explicit variable map instead of the process environment.
    pub fn load_from(path: Option<&Path>, vars: &HashMap<String, String>) -> Result<Self> {
        let builder = match path {
            Some(p) => Config::builder().add_source(File::from(p).required(true)),
            None => Config::builder().add_source(File::with_name("config/default").required(false)),
        };

        let relay_vars: config::Map<String, String> = vars
            .iter()
            .filter(|(k, _)| k.starts_with("RELAY_"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let builder = builder.add_source(
            Environment::with_prefix("RELAY")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("subscriptions")
                .with_list_parse_key("primary.topics")
                .with_list_parse_key("secondary.topics")
                .try_parsing(true)
                .source(Some(relay_vars)),
        );

        let builder = apply_flat_overrides(builder, vars)?;
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Validation
    // ─────────────────────────────────────────────────────────────────────────

    /// Check ranges and the connection invariants.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        for route in self.active_routes() {
            let var = connection_var(route.destination);
            if self.endpoint(route.destination).connection.trim().is_empty()
                && !missing.contains(&var)
            {
                missing.push(var);
            }
        }
        if self.direction == ReplicationDirection::Bidirectional {
            for side in [Side::Primary, Side::Secondary] {
                let var = connection_var(side);
                if self.endpoint(side).connection.trim().is_empty() && !missing.contains(&var) {
                    missing.push(var);
                }
            }
        }
        if !self.discover_topology {
            for side in self.source_sides() {
                if self.endpoint(side).topics.is_empty() {
                    missing.push(topic_var(side));
                }
            }
            if self.subscriptions.is_empty() {
                missing.push("SUBSCRIPTION_LIST");
            }
        }
        if !missing.is_empty() {
            return Err(ReplicationError::Config(format!(
                "Missing required environment variables for {}: {}",
                self.direction,
                missing.join(", ")
            )));
        }

        check_range("rto_minutes", self.rto_minutes, 1, 1440)?;
        check_range("delta_minutes", self.delta_minutes, 0, 1440)?;
        check_range("retry.max_attempts", self.retry.max_attempts, 1, 10)?;
        if !(0.1..=60.0).contains(&self.retry.base_delay_secs) {
            return Err(ReplicationError::Config(format!(
                "retry.base_delay_secs must be between 0.1 and 60, got {}",
                self.retry.base_delay_secs
            )));
        }
        check_range(
            "dead_letter.max_delivery_count",
            self.dead_letter.max_delivery_count,
            1,
            100,
        )?;
        check_range("dead_letter.ttl_minutes", self.dead_letter.ttl_minutes, 1, 43_200)?;
        check_range("batch.batch_size", self.batch.batch_size, 1, 1000)?;
        check_range(
            "batch.max_batches_per_subscription",
            self.batch.max_batches_per_subscription,
            1,
            usize::MAX,
        )?;
        check_range(
            "concurrency.max_concurrent_subscriptions",
            self.concurrency.max_concurrent_subscriptions,
            1,
            usize::MAX,
        )?;
        if self.loop_prevention.enabled && self.loop_prevention.marker_property.trim().is_empty() {
            return Err(ReplicationError::Config(
                "loop_prevention.marker_property must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Engine runs also need a receivable source on every route.
    pub fn validate_sources(&self) -> Result<()> {
        let missing: Vec<_> = self
            .source_sides()
            .into_iter()
            .filter(|side| self.endpoint(*side).connection.trim().is_empty())
            .map(connection_var)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ReplicationError::Config(format!(
                "Missing required environment variables for {}: {}",
                self.direction,
                missing.join(", ")
            )))
        }
    }
}

fn connection_var(side: Side) -> &'static str {
    match side {
        Side::Primary => "PRIMARY_SERVICEBUS_CONN",
        Side::Secondary => "SECONDARY_SERVICEBUS_CONN",
    }
}

fn topic_var(side: Side) -> &'static str {
    match side {
        Side::Primary => "PRIMARY_TOPIC_NAME",
        Side::Secondary => "SECONDARY_TOPIC_NAME",
    }
}

fn check_range<T>(name: &str, value: T, min: T, max: T) -> Result<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        return Err(ReplicationError::Config(format!(
            "{name} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(())
}

/// Deployment variable names, applied last so they win over files.
const FLAT_OVERRIDES: &[(&str, &str)] = &[
    ("REPLICATION_TYPE", "direction"),
    ("PRIMARY_SERVICEBUS_CONN", "primary.connection"),
    ("SECONDARY_SERVICEBUS_CONN", "secondary.connection"),
    ("RTO_MINUTES", "rto_minutes"),
    ("DELTA_MINUTES", "delta_minutes"),
    ("MAX_RETRY_ATTEMPTS", "retry.max_attempts"),
    ("BASE_RETRY_DELAY", "retry.base_delay_secs"),
    ("DLQ_ENABLED", "dead_letter.enabled"),
    ("MAX_DELIVERY_COUNT", "dead_letter.max_delivery_count"),
    ("DLQ_TTL_MINUTES", "dead_letter.ttl_minutes"),
];

fn apply_flat_overrides(
    mut builder: ConfigBuilder<config::builder::DefaultState>,
    vars: &HashMap<String, String>,
) -> Result<ConfigBuilder<config::builder::DefaultState>> {
    for (var, key) in FLAT_OVERRIDES {
        if let Some(value) = vars.get(*var).filter(|v| !v.trim().is_empty()) {
            builder = builder.set_override(*key, value.trim())?;
        }
    }

    // A single static topic per side, named as in the legacy deployment.
    for (var, key) in [
        ("PRIMARY_TOPIC_NAME", "primary.topics"),
        ("SECONDARY_TOPIC_NAME", "secondary.topics"),
    ] {
        if let Some(topic) = vars.get(var).map(|v| v.trim()).filter(|v| !v.is_empty()) {
            builder = builder.set_override(key, vec![topic.to_string()])?;
        }
    }

    if let Some(list) = vars.get("SUBSCRIPTION_LIST") {
        builder = builder.set_override("subscriptions", split_list(list))?;
    }
    Ok(builder)
}

/// Comma-separated list, trimmed, empties dropped.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// EndpointConfig: one namespace
// ═══════════════════════════════════════════════════════════════════════════════

/// One namespace of the pair.
///
/// `connection` is a secret-bearing descriptor and never logged.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct EndpointConfig {
    #[serde(default)]
    pub connection: String,

    /// Static topics (legacy mode, when discovery is off).
    #[serde(default)]
    pub topics: Vec<String>,
}

impl EndpointConfig {
    pub fn new(connection: &str) -> Self {
        Self {
            connection: connection.to_string(),
            topics: Vec::new(),
        }
    }
}

impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("connection", &if self.connection.is_empty() { "" } else { "***" })
            .field("topics", &self.topics)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RetrySettings
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts per send.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff in seconds; doubles per retry.
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: f64,

    /// Bound on one send attempt (e.g., "30s").
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout: String,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_secs() -> f64 {
    1.0
}

fn default_attempt_timeout() -> String {
    "30s".to_string()
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            attempt_timeout: default_attempt_timeout(),
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.base_delay_secs).unwrap_or(Duration::from_secs(1))
    }

    pub fn attempt_timeout(&self) -> Duration {
        parse_duration_or(&self.attempt_timeout, Duration::from_secs(30))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DeadLetterSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Dead-letter policy. The broker does the dead-lettering; the relay only
/// abandons and reports when a message is about to cross the threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_delivery_count")]
    pub max_delivery_count: u32,

    #[serde(default = "default_dlq_ttl_minutes")]
    pub ttl_minutes: u64,
}

fn default_max_delivery_count() -> u32 {
    3
}

fn default_dlq_ttl_minutes() -> u64 {
    1440
}

impl Default for DeadLetterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_delivery_count: default_max_delivery_count(),
            ttl_minutes: default_dlq_ttl_minutes(),
        }
    }
}

impl DeadLetterSettings {
    /// True when one more failed delivery makes the broker dead-letter it.
    pub fn is_final_delivery(&self, delivery_count: u32) -> bool {
        self.enabled && delivery_count >= self.max_delivery_count
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BatchSettings and ScheduleSettings
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Receive wait for the first message of a batch (e.g., "10s").
    #[serde(default = "default_max_wait")]
    pub max_wait: String,

    /// Upper bound on batches drained from one subscription per cycle.
    #[serde(default = "default_max_batches")]
    pub max_batches_per_subscription: usize,
}

fn default_batch_size() -> usize {
    10
}

fn default_max_wait() -> String {
    "10s".to_string()
}

fn default_max_batches() -> usize {
    100
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_wait: default_max_wait(),
            max_batches_per_subscription: default_max_batches(),
        }
    }
}

impl BatchSettings {
    pub fn max_wait(&self) -> Duration {
        parse_duration_or(&self.max_wait, Duration::from_secs(10))
    }
}

/// Timed-run pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    /// Total wall-clock budget of a timed run.
    #[serde(default = "default_replication_timeout")]
    pub replication_timeout: String,

    /// Pause after a cycle that moved nothing.
    #[serde(default = "default_idle_wait")]
    pub idle_wait: String,

    /// Pause after a cycle that moved messages.
    #[serde(default = "default_active_wait")]
    pub active_wait: String,

    /// Pause after a cycle that hit an error.
    #[serde(default = "default_error_backoff")]
    pub error_backoff: String,
}

fn default_replication_timeout() -> String {
    "300s".to_string()
}

fn default_idle_wait() -> String {
    "30s".to_string()
}

fn default_active_wait() -> String {
    "5s".to_string()
}

fn default_error_backoff() -> String {
    "10s".to_string()
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            replication_timeout: default_replication_timeout(),
            idle_wait: default_idle_wait(),
            active_wait: default_active_wait(),
            error_backoff: default_error_backoff(),
        }
    }
}

impl ScheduleSettings {
    pub fn replication_timeout(&self) -> Duration {
        parse_duration_or(&self.replication_timeout, Duration::from_secs(300))
    }

    pub fn idle_wait(&self) -> Duration {
        parse_duration_or(&self.idle_wait, Duration::from_secs(30))
    }

    pub fn active_wait(&self) -> Duration {
        parse_duration_or(&self.active_wait, Duration::from_secs(5))
    }

    pub fn error_backoff(&self) -> Duration {
        parse_duration_or(&self.error_backoff, Duration::from_secs(10))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Loop prevention, concurrency, circuit breaker
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopPreventionSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Application property stamped on every replica.
    #[serde(default = "default_marker_property")]
    pub marker_property: String,
}

fn default_marker_property() -> String {
    "x-replicated".to_string()
}

impl Default for LoopPreventionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            marker_property: default_marker_property(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencySettings {
    /// Subscription workers running at once within a cycle.
    #[serde(default = "default_max_concurrent_subscriptions")]
    pub max_concurrent_subscriptions: usize,

    /// Optional send throttle shared by every worker.
    #[serde(default)]
    pub send_rate_limit: Option<RateLimitSettings>,
}

fn default_max_concurrent_subscriptions() -> usize {
    8
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            max_concurrent_subscriptions: default_max_concurrent_subscriptions(),
            send_rate_limit: None,
        }
    }
}

/// Token bucket: `per_sec` sustained, `burst` peak.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub per_sec: u32,
    pub burst: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Failure ratio over the window that opens the circuit.
    #[serde(default = "default_failure_rate")]
    pub failure_rate: f32,

    /// Calls observed while closed.
    #[serde(default = "default_window")]
    pub window: usize,

    /// Trial calls while half-open.
    #[serde(default = "default_half_open_calls")]
    pub half_open_calls: usize,

    #[serde(default = "default_open_wait")]
    pub open_wait: String,
}

fn default_failure_rate() -> f32 {
    0.5
}

fn default_window() -> usize {
    10
}

fn default_half_open_calls() -> usize {
    2
}

fn default_open_wait() -> String {
    "30s".to_string()
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_rate: default_failure_rate(),
            window: default_window(),
            half_open_calls: default_half_open_calls(),
            open_wait: default_open_wait(),
        }
    }
}

impl CircuitBreakerSettings {
    pub fn open_wait(&self) -> Duration {
        parse_duration_or(&self.open_wait, Duration::from_secs(30))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LoggingSettings
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

fn parse_duration_or(raw: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(raw).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = ReplicationConfig::default();
        assert_eq!(config.rto_minutes, 10);
        assert_eq!(config.delta_minutes, 2);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay(), Duration::from_secs(1));
        assert!(config.dead_letter.enabled);
        assert_eq!(config.dead_letter.max_delivery_count, 3);
        assert_eq!(config.dead_letter.ttl_minutes, 1440);
        assert_eq!(config.batch.batch_size, 10);
        assert_eq!(config.schedule.replication_timeout(), Duration::from_secs(300));
        assert_eq!(config.loop_prevention.marker_property, "x-replicated");
        assert!(config.discover_topology);
    }

    #[test]
    fn test_ttl_seconds() {
        let config = ReplicationConfig::default();
        assert_eq!(config.ttl_seconds(), 720);

        let config = ReplicationConfig {
            rto_minutes: 30,
            delta_minutes: 0,
            ..Default::default()
        };
        assert_eq!(config.ttl_seconds(), 1800);
    }

    #[test]
    fn test_direction_labels_and_routes() {
        assert_eq!(ReplicationDirection::PrimaryToSecondary.label(), "Primary → Secondary");
        assert_eq!(ReplicationDirection::SecondaryToPrimary.label(), "Secondary → Primary");
        assert_eq!(ReplicationDirection::Bidirectional.routes().len(), 2);
        assert_eq!(Route::SECONDARY_TO_PRIMARY.tag(), "secondary_to_primary");
        assert_eq!(
            "bidirectional".parse::<ReplicationDirection>().unwrap(),
            ReplicationDirection::Bidirectional
        );
        assert!("sideways".parse::<ReplicationDirection>().is_err());
    }

    #[test]
    fn test_validate_missing_destination_names_variable() {
        let config = ReplicationConfig::default();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("SECONDARY_SERVICEBUS_CONN"), "{err}");
        assert!(!err.contains("PRIMARY_SERVICEBUS_CONN"), "{err}");
    }

    #[test]
    fn test_validate_bidirectional_requires_both() {
        let config = ReplicationConfig {
            direction: ReplicationDirection::Bidirectional,
            ..Default::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("PRIMARY_SERVICEBUS_CONN"), "{err}");
        assert!(err.contains("SECONDARY_SERVICEBUS_CONN"), "{err}");
    }

    #[test]
    fn test_validate_static_mode_requires_topics_and_subscriptions() {
        let mut config = ReplicationConfig::for_testing("memory://p", "memory://s");
        config.discover_topology = false;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("PRIMARY_TOPIC_NAME"), "{err}");
        assert!(err.contains("SUBSCRIPTION_LIST"), "{err}");

        config.primary.topics = vec!["orders".to_string()];
        config.subscriptions = vec!["audit".to_string()];
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_ranges() {
        let base = ReplicationConfig::for_testing("memory://p", "memory://s");
        base.validate().unwrap();

        let mut c = base.clone();
        c.rto_minutes = 0;
        assert!(c.validate().is_err());

        let mut c = base.clone();
        c.retry.max_attempts = 11;
        assert!(c.validate().is_err());

        let mut c = base.clone();
        c.retry.base_delay_secs = 0.05;
        assert!(c.validate().is_err());

        let mut c = base.clone();
        c.dead_letter.ttl_minutes = 43_201;
        assert!(c.validate().is_err());

        let mut c = base;
        c.loop_prevention.marker_property = " ".to_string();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_validate_sources() {
        let config = ReplicationConfig::for_testing("", "memory://s");
        config.validate().unwrap();
        let err = config.validate_sources().unwrap_err().to_string();
        assert!(err.contains("PRIMARY_SERVICEBUS_CONN"), "{err}");
    }

    #[test]
    fn test_invalid_duration_falls_back() {
        let schedule = ScheduleSettings {
            idle_wait: "not-a-duration".to_string(),
            ..Default::default()
        };
        assert_eq!(schedule.idle_wait(), Duration::from_secs(30));
    }

    #[test]
    fn test_is_final_delivery() {
        let dl = DeadLetterSettings::default();
        assert!(!dl.is_final_delivery(2));
        assert!(dl.is_final_delivery(3));

        let disabled = DeadLetterSettings {
            enabled: false,
            ..Default::default()
        };
        assert!(!disabled.is_final_delivery(99));
    }

    #[test]
    fn test_endpoint_debug_hides_connection() {
        let endpoint = EndpointConfig::new("Endpoint=sb://ns/;SharedAccessKey=secret");
        let printed = format!("{endpoint:?}");
        assert!(!printed.contains("secret"));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_load_from_flat_variables() {
        let env = vars(&[
            ("REPLICATION_TYPE", "secondary_to_primary"),
            ("PRIMARY_SERVICEBUS_CONN", "memory://primary"),
            ("SECONDARY_SERVICEBUS_CONN", "memory://secondary"),
            ("RTO_MINUTES", "15"),
            ("DELTA_MINUTES", "5"),
            ("MAX_RETRY_ATTEMPTS", "5"),
            ("BASE_RETRY_DELAY", "0.5"),
            ("DLQ_ENABLED", "false"),
            ("SUBSCRIPTION_LIST", "audit, archive"),
            ("SECONDARY_TOPIC_NAME", "orders"),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.toml");
        std::fs::write(&path, "").unwrap();

        let config = ReplicationConfig::load_from(Some(&path), &env).unwrap();
        assert_eq!(config.direction, ReplicationDirection::SecondaryToPrimary);
        assert_eq!(config.ttl_seconds(), 1200);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay(), Duration::from_millis(500));
        assert!(!config.dead_letter.enabled);
        assert_eq!(config.subscriptions, vec!["audit", "archive"]);
        assert_eq!(config.secondary.topics, vec!["orders"]);
    }

    #[test]
    fn test_load_from_file_and_prefixed_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
direction = "bidirectional"
rto_minutes = 20

[primary]
connection = "memory://primary"

[secondary]
connection = "memory://secondary"

[schedule]
idle_wait = "2s"
"#
        )
        .unwrap();

        let env = vars(&[("RELAY_RETRY__MAX_ATTEMPTS", "7"), ("RTO_MINUTES", "25")]);
        let config = ReplicationConfig::load_from(Some(&path), &env).unwrap();

        assert_eq!(config.direction, ReplicationDirection::Bidirectional);
        assert_eq!(config.rto_minutes, 25, "flat variable wins over file");
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.schedule.idle_wait(), Duration::from_secs(2));
    }

    #[test]
    fn test_load_from_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.toml");
        std::fs::write(&path, "").unwrap();
        let env = vars(&[
            ("SECONDARY_SERVICEBUS_CONN", "memory://s"),
            ("RTO_MINUTES", "5000"),
        ]);
        let err = ReplicationConfig::load_from(Some(&path), &env).unwrap_err();
        assert!(matches!(err, ReplicationError::Config(_)));
    }

    #[test]
    fn test_load_from_missing_file_errors() {
        let env = vars(&[]);
        let err = ReplicationConfig::load_from(Some(Path::new("/nonexistent/relay.toml")), &env)
            .unwrap_err();
        assert!(matches!(err, ReplicationError::ConfigLoad(_)));
    }
}
