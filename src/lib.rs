//! # Replication Relay
//!
//! Relays messages between a primary and a secondary topic namespace, in
//! either direction or both, for cross-region resiliency. Every replica keeps
//! the source body, properties and routing fields, gets a deterministic new
//! message id, and expires after the recovery-time objective plus a buffer.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                          replication-relay                                │
//! │                                                                           │
//! │  ┌─────────────┐    ┌──────────────┐    ┌──────────────────────────────┐  │
//! │  │  Topology   │───►│ Subscription │───►│ Replicator                   │  │
//! │  │  discovery  │    │ workers      │    │ transform → send → settle    │  │
//! │  └─────────────┘    └──────────────┘    └──────────────────────────────┘  │
//! │         │                  │                         │                    │
//! │         ▼                  ▼                         ▼                    │
//! │  ┌─────────────┐    ┌──────────────┐    ┌──────────────────────────────┐  │
//! │  │ source      │    │ Bulkhead     │    │ RetryPolicy + circuit +      │  │
//! │  │ namespace   │    │ (workers)    │    │ rate limit → destination     │  │
//! │  └─────────────┘    └──────────────┘    └──────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery Guarantees
//!
//! 1. **Ack after send**: a source message is completed only after the
//!    destination accepted its replica; on failure it is abandoned
//! 2. **Idempotent ids**: a redelivered message yields the same replica id,
//!    so destination duplicate detection absorbs retries
//! 3. **No ping-pong**: replicas carry a marker property and are never
//!    relayed back in bidirectional mode
//!
//! ## Usage
//!
//! ```rust,no_run
//! use replication_relay::memory::InMemoryNamespace;
//! use replication_relay::{ReplicationConfig, ReplicationEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> replication_relay::Result<()> {
//!     let config = ReplicationConfig::for_testing("memory://primary", "memory://secondary");
//!     let engine = ReplicationEngine::new(
//!         config,
//!         Arc::new(InMemoryNamespace::new("primary")),
//!         Arc::new(InMemoryNamespace::new("secondary")),
//!     )?;
//!
//!     let totals = engine.run_timed().await?;
//!     println!("replicated {}", totals.replicated);
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod circuit_breaker;
pub mod classify;
pub mod config;
pub mod coordinator;
pub mod delivery;
pub mod error;
pub mod identity;
pub mod logging;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod resilience;
pub mod sanitize;
pub mod stats;
pub mod topology;
pub mod transform;

// Re-exports for convenience
pub use broker::Namespace;
pub use circuit_breaker::{CircuitBreaker, CircuitError, DestinationCircuits};
pub use classify::{AlertSeverity, ErrorCategory};
pub use config::{ReplicationConfig, ReplicationDirection, Route, Side};
pub use coordinator::{EngineState, ReplicationEngine, Replicator, ShutdownHandle};
pub use error::{ReplicationError, Result, TransportError, TransportErrorKind};
pub use message::{MessageBody, PropertyValue, ReplicatedMessage, SourceMessage};
pub use stats::ReplicationStats;
