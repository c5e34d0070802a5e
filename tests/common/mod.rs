//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - In-memory namespace pairs and engine builders
//! - Source message builders
//! - A tracing layer that records events by level

#![allow(dead_code)]

pub mod logs;

#[allow(unused_imports)]
pub use logs::*;

use replication_relay::config::{ReplicationConfig, ReplicationDirection};
use replication_relay::memory::InMemoryNamespace;
use replication_relay::message::SourceMessage;
use replication_relay::resilience::RetryPolicy;
use replication_relay::{ReplicationEngine, Replicator};
use std::sync::Arc;
use std::time::Duration;

/// Primary and secondary namespaces, both empty.
pub fn namespaces() -> (InMemoryNamespace, InMemoryNamespace) {
    (
        InMemoryNamespace::new("primary"),
        InMemoryNamespace::new("secondary"),
    )
}

/// Fast test config for `direction`.
pub fn test_config(direction: ReplicationDirection) -> ReplicationConfig {
    let mut config = ReplicationConfig::for_testing("memory://primary", "memory://secondary");
    config.direction = direction;
    config
}

/// Near-instant retries so failure paths run quickly.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1)).with_attempt_timeout(Duration::from_secs(1))
}

/// Engine over the two namespaces with [`fast_retry`].
pub fn engine(
    config: ReplicationConfig,
    primary: &InMemoryNamespace,
    secondary: &InMemoryNamespace,
) -> ReplicationEngine {
    engine_with_retry(config, primary, secondary, fast_retry())
}

pub fn engine_with_retry(
    config: ReplicationConfig,
    primary: &InMemoryNamespace,
    secondary: &InMemoryNamespace,
    retry: RetryPolicy,
) -> ReplicationEngine {
    let replicator = Replicator::new(&config).with_retry_policy(retry);
    ReplicationEngine::with_replicator(
        config,
        Arc::new(primary.clone()),
        Arc::new(secondary.clone()),
        replicator,
    )
}

/// JSON order event with a stable message id.
pub fn order_message(n: usize) -> SourceMessage {
    SourceMessage::new(format!(r#"{{"order":{n}}}"#))
        .with_message_id(format!("order-{n}"))
        .with_content_type("application/json")
        .with_property("tenant", "contoso")
}

/// Create `topic` on both sides with a `relay` subscription on the source.
pub fn mirror_topic(source: &InMemoryNamespace, destination: &InMemoryNamespace, topic: &str) {
    source.create_subscription(topic, "relay");
    destination.create_topic(topic);
}
