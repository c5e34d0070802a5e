// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Messaging collaborator traits.
//!
//! The relay never speaks a wire protocol itself. A client adapter
//! implements these traits, converting its SDK types into
//! [`SourceMessage`] at ingress and its SDK errors into
//! [`TransportError`] at the call boundary.
//!
//! # Example
//!
//! ```rust,no_run
//! use replication_relay::broker::{BoxFuture, TopologyAdmin};
//!
//! struct StaticAdmin;
//!
//! impl TopologyAdmin for StaticAdmin {
//!     fn list_topics(&self) -> BoxFuture<'_, Vec<String>> {
//!         Box::pin(async { Ok(vec!["orders".to_string()]) })
//!     }
//!
//!     fn list_subscriptions<'a>(&'a self, _topic: &'a str) -> BoxFuture<'a, Vec<String>> {
//!         Box::pin(async { Ok(vec!["audit".to_string()]) })
//!     }
//! }
//! ```

use crate::error::TransportResult;
use crate::message::{ReplicatedMessage, SourceMessage};
use std::time::Duration;

pub use crate::error::{TransportError, TransportErrorKind};

/// Type alias for boxed async broker calls.
pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, TransportResult<T>>;

/// Peek-lock receiver on one topic subscription.
///
/// Every message returned by [`receive_batch`](Self::receive_batch) must be
/// settled exactly once with `complete` or `abandon`.
pub trait MessageSource: Send {
    /// Pull up to `max_count` messages, waiting at most `max_wait` for the first.
    ///
    /// An empty batch means the subscription is drained for now.
    fn receive_batch(
        &mut self,
        max_count: usize,
        max_wait: Duration,
    ) -> BoxFuture<'_, Vec<SourceMessage>>;

    /// Remove the message from the subscription.
    fn complete<'a>(&'a mut self, message: &'a SourceMessage) -> BoxFuture<'a, ()>;

    /// Release the lock so the broker redelivers (or dead-letters) the message.
    fn abandon<'a>(&'a mut self, message: &'a SourceMessage) -> BoxFuture<'a, ()>;

    /// Release the receiver. Dropping without closing must also release it.
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Opens receivers on a namespace.
pub trait SourceConnector: Send + Sync + 'static {
    fn open_receiver<'a>(
        &'a self,
        topic: &'a str,
        subscription: &'a str,
    ) -> BoxFuture<'a, Box<dyn MessageSource>>;
}

/// Sender bound to one destination topic.
pub trait MessageSender: Send {
    fn send(&mut self, message: ReplicatedMessage) -> BoxFuture<'_, ()>;

    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Connection to a destination namespace.
pub trait DestinationConnection: Send {
    fn sender<'a>(&'a mut self, destination: &'a str) -> BoxFuture<'a, Box<dyn MessageSender>>;

    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Opens destination connections.
pub trait DestinationConnector: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'_, Box<dyn DestinationConnection>>;
}

/// Administrative view used for topology discovery.
pub trait TopologyAdmin: Send + Sync + 'static {
    fn list_topics(&self) -> BoxFuture<'_, Vec<String>>;

    fn list_subscriptions<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Vec<String>>;
}

/// Everything the engine needs from one side of the pair.
pub trait Namespace: SourceConnector + DestinationConnector + TopologyAdmin {
    /// Human-readable name for logs. Never the connection string.
    fn name(&self) -> &str;
}
