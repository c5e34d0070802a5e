// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process namespace implementing every broker trait.
//!
//! Behaves like a peek-lock topic broker:
//!
//! - publishing to a topic fans out to each of its subscriptions
//! - received messages stay locked until completed or abandoned
//! - abandon bumps the delivery count and dead-letters the message once it
//!   reaches `max_delivery_count`
//!
//! Every connection, sender and receiver is counted while alive, so tests
//! can assert that no handle leaks on any exit path. Faults can be queued
//! per operation.
//!
//! # Example
//!
//! ```rust
//! use replication_relay::memory::InMemoryNamespace;
//! use replication_relay::message::SourceMessage;
//!
//! let ns = InMemoryNamespace::new("primary");
//! ns.create_subscription("orders", "audit");
//! ns.publish("orders", SourceMessage::new("hello").with_message_id("m-1"));
//! assert_eq!(ns.pending("orders", "audit"), 1);
//! ```

use crate::broker::{
    BoxFuture, DestinationConnection, DestinationConnector, MessageSender, MessageSource,
    Namespace, SourceConnector, TopologyAdmin,
};
use crate::error::{TransportError, TransportResult};
use crate::message::{MessageBody, ReplicatedMessage, SourceMessage};
use chrono::Utc;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Connection descriptor scheme served by [`InMemoryNamespace`].
pub const MEMORY_SCHEME: &str = "memory://";

const DEFAULT_MAX_DELIVERY_COUNT: u32 = 10;

#[derive(Default)]
struct Subscription {
    ready: VecDeque<SourceMessage>,
    locked: BTreeMap<i64, SourceMessage>,
    dead_letters: Vec<SourceMessage>,
    completed: u64,
    abandoned: u64,
}

#[derive(Default)]
struct Topic {
    subscriptions: BTreeMap<String, Subscription>,
    sent: Vec<ReplicatedMessage>,
}

#[derive(Default)]
struct Faults {
    connect: VecDeque<TransportError>,
    send: VecDeque<TransportError>,
    receive: VecDeque<TransportError>,
    list_topics: Option<TransportError>,
    list_subscriptions: Option<TransportError>,
    send_delay: Option<Duration>,
}

struct State {
    topics: BTreeMap<String, Topic>,
    next_sequence: i64,
    max_delivery_count: u32,
    send_attempts: u64,
    faults: Faults,
}

#[derive(Default)]
struct HandleCounters {
    connections: Arc<AtomicUsize>,
    senders: Arc<AtomicUsize>,
    receivers: Arc<AtomicUsize>,
}

/// Live handle counts, for leak assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenHandles {
    pub connections: usize,
    pub senders: usize,
    pub receivers: usize,
}

impl OpenHandles {
    pub fn total(&self) -> usize {
        self.connections + self.senders + self.receivers
    }
}

/// Decrements its counter when dropped.
struct HandleGuard(Arc<AtomicUsize>);

impl HandleGuard {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Shared {
    name: String,
    state: Mutex<State>,
    handles: HandleCounters,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process topic namespace. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct InMemoryNamespace {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for InMemoryNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryNamespace")
            .field("name", &self.shared.name)
            .finish()
    }
}

impl InMemoryNamespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(State {
                    topics: BTreeMap::new(),
                    next_sequence: 1,
                    max_delivery_count: DEFAULT_MAX_DELIVERY_COUNT,
                    send_attempts: 0,
                    faults: Faults::default(),
                }),
                handles: HandleCounters::default(),
            }),
        }
    }

    /// Build from a `memory://<name>` descriptor.
    pub fn from_descriptor(descriptor: &str) -> Option<Self> {
        let name = descriptor.strip_prefix(MEMORY_SCHEME)?.trim_end_matches('/');
        if name.is_empty() {
            return None;
        }
        Some(Self::new(name))
    }

    // =========================================================================
    // Topology
    // =========================================================================

    pub fn create_topic(&self, topic: &str) {
        self.shared.state().topics.entry(topic.to_string()).or_default();
    }

    pub fn create_subscription(&self, topic: &str, subscription: &str) {
        self.shared
            .state()
            .topics
            .entry(topic.to_string())
            .or_default()
            .subscriptions
            .entry(subscription.to_string())
            .or_default();
    }

    pub fn set_max_delivery_count(&self, max_delivery_count: u32) {
        self.shared.state().max_delivery_count = max_delivery_count.max(1);
    }

    /// Publish to every subscription of `topic`. Returns the fan-out count.
    pub fn publish(&self, topic: &str, message: SourceMessage) -> usize {
        let mut state = self.shared.state();
        publish_locked(&mut state, topic, message)
    }

    // =========================================================================
    // Fault injection
    // =========================================================================

    /// Fail the next `count` sends with `error`.
    pub fn fail_next_sends(&self, error: TransportError, count: usize) {
        let mut state = self.shared.state();
        state.faults.send.extend(std::iter::repeat(error).take(count));
    }

    pub fn fail_next_connects(&self, error: TransportError, count: usize) {
        let mut state = self.shared.state();
        state.faults.connect.extend(std::iter::repeat(error).take(count));
    }

    pub fn fail_next_receives(&self, error: TransportError, count: usize) {
        let mut state = self.shared.state();
        state.faults.receive.extend(std::iter::repeat(error).take(count));
    }

    /// Make `list_topics` fail until cleared with `None`.
    pub fn fail_topic_listing(&self, error: Option<TransportError>) {
        self.shared.state().faults.list_topics = error;
    }

    /// Make `list_subscriptions` fail until cleared with `None`.
    pub fn fail_subscription_listing(&self, error: Option<TransportError>) {
        self.shared.state().faults.list_subscriptions = error;
    }

    /// Delay every send, to widen cancellation windows in tests.
    pub fn set_send_delay(&self, delay: Option<Duration>) {
        self.shared.state().faults.send_delay = delay;
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Messages accepted by senders for `topic`, in send order.
    pub fn sent_to(&self, topic: &str) -> Vec<ReplicatedMessage> {
        self.shared
            .state()
            .topics
            .get(topic)
            .map(|t| t.sent.clone())
            .unwrap_or_default()
    }

    pub fn send_attempts(&self) -> u64 {
        self.shared.state().send_attempts
    }

    pub fn pending(&self, topic: &str, subscription: &str) -> usize {
        self.with_subscription(topic, subscription, |s| s.ready.len())
    }

    pub fn locked(&self, topic: &str, subscription: &str) -> usize {
        self.with_subscription(topic, subscription, |s| s.locked.len())
    }

    pub fn completed(&self, topic: &str, subscription: &str) -> u64 {
        self.with_subscription(topic, subscription, |s| s.completed)
    }

    pub fn abandoned(&self, topic: &str, subscription: &str) -> u64 {
        self.with_subscription(topic, subscription, |s| s.abandoned)
    }

    pub fn dead_letters(&self, topic: &str, subscription: &str) -> Vec<SourceMessage> {
        self.with_subscription(topic, subscription, |s| s.dead_letters.clone())
    }

    pub fn open_handles(&self) -> OpenHandles {
        let h = &self.shared.handles;
        OpenHandles {
            connections: h.connections.load(Ordering::SeqCst),
            senders: h.senders.load(Ordering::SeqCst),
            receivers: h.receivers.load(Ordering::SeqCst),
        }
    }

    fn with_subscription<T: Default>(
        &self,
        topic: &str,
        subscription: &str,
        f: impl FnOnce(&Subscription) -> T,
    ) -> T {
        self.shared
            .state()
            .topics
            .get(topic)
            .and_then(|t| t.subscriptions.get(subscription))
            .map(f)
            .unwrap_or_default()
    }
}

fn publish_locked(state: &mut State, topic: &str, message: SourceMessage) -> usize {
    let Some(entry) = state.topics.get_mut(topic) else {
        return 0;
    };
    let mut fanned_out = 0;
    for subscription in entry.subscriptions.values_mut() {
        let mut copy = message.clone();
        copy.sequence_number = state.next_sequence;
        copy.enqueued_time = Some(Utc::now());
        copy.delivery_count = 0;
        state.next_sequence += 1;
        subscription.ready.push_back(copy);
        fanned_out += 1;
    }
    fanned_out
}

/// What a subscriber on the destination sees for a replica.
fn into_source_message(message: &ReplicatedMessage) -> SourceMessage {
    SourceMessage {
        body: MessageBody::Bytes(message.body.clone()),
        content_type: Some(message.content_type.clone()),
        message_id: Some(message.message_id.clone()),
        correlation_id: Some(message.correlation_id.clone()),
        subject: message.subject.clone(),
        session_id: message.session_id.clone(),
        to: message.to.clone(),
        reply_to: message.reply_to.clone(),
        reply_to_session_id: message.reply_to_session_id.clone(),
        partition_key: message.partition_key.clone(),
        scheduled_enqueue_time: message.scheduled_enqueue_time,
        application_properties: Some(message.application_properties.clone()),
        delivery_count: 0,
        sequence_number: 0,
        enqueued_time: None,
    }
}

// =============================================================================
// Receiver
// =============================================================================

struct InMemoryReceiver {
    shared: Arc<Shared>,
    topic: String,
    subscription: String,
    _guard: HandleGuard,
}

impl InMemoryReceiver {
    fn settle(&self, message: &SourceMessage, complete: bool) -> TransportResult<()> {
        let mut state = self.shared.state();
        let max_delivery_count = state.max_delivery_count;
        let sub = state
            .topics
            .get_mut(&self.topic)
            .and_then(|t| t.subscriptions.get_mut(&self.subscription))
            .ok_or_else(|| {
                TransportError::not_found(format!("{}/{}", self.topic, self.subscription))
            })?;
        let Some(locked) = sub.locked.remove(&message.sequence_number) else {
            return Err(TransportError::broker(
                format!("lock lost for sequence {}", message.sequence_number),
                Some(410),
            ));
        };
        if complete {
            sub.completed += 1;
        } else {
            sub.abandoned += 1;
            if locked.delivery_count >= max_delivery_count {
                sub.dead_letters.push(locked);
            } else {
                sub.ready.push_front(locked);
            }
        }
        Ok(())
    }
}

impl MessageSource for InMemoryReceiver {
    fn receive_batch(
        &mut self,
        max_count: usize,
        _max_wait: Duration,
    ) -> BoxFuture<'_, Vec<SourceMessage>> {
        Box::pin(async move {
            let mut state = self.shared.state();
            if let Some(err) = state.faults.receive.pop_front() {
                return Err(err);
            }
            let sub = state
                .topics
                .get_mut(&self.topic)
                .and_then(|t| t.subscriptions.get_mut(&self.subscription))
                .ok_or_else(|| {
                    TransportError::not_found(format!("{}/{}", self.topic, self.subscription))
                })?;
            let mut batch = Vec::new();
            while batch.len() < max_count {
                let Some(mut message) = sub.ready.pop_front() else {
                    break;
                };
                message.delivery_count += 1;
                sub.locked.insert(message.sequence_number, message.clone());
                batch.push(message);
            }
            Ok(batch)
        })
    }

    fn complete<'a>(&'a mut self, message: &'a SourceMessage) -> BoxFuture<'a, ()> {
        Box::pin(async move { self.settle(message, true) })
    }

    fn abandon<'a>(&'a mut self, message: &'a SourceMessage) -> BoxFuture<'a, ()> {
        Box::pin(async move { self.settle(message, false) })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            // Unsettled locks return to the queue, as when a lock expires.
            let mut state = self.shared.state();
            if let Some(sub) = state
                .topics
                .get_mut(&self.topic)
                .and_then(|t| t.subscriptions.get_mut(&self.subscription))
            {
                let expired: Vec<_> = std::mem::take(&mut sub.locked).into_values().collect();
                for message in expired.into_iter().rev() {
                    sub.ready.push_front(message);
                }
            }
            Ok(())
        })
    }
}

// =============================================================================
// Sender and connection
// =============================================================================

struct InMemorySender {
    shared: Arc<Shared>,
    topic: String,
    _guard: HandleGuard,
}

impl MessageSender for InMemorySender {
    fn send(&mut self, message: ReplicatedMessage) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let delay = {
                let mut state = self.shared.state();
                state.send_attempts += 1;
                if let Some(err) = state.faults.send.pop_front() {
                    return Err(err);
                }
                state.faults.send_delay
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let mut state = self.shared.state();
            let topic = state.topics.get_mut(&self.topic).ok_or_else(|| {
                TransportError::not_found(format!("topic '{}' does not exist", self.topic))
            })?;
            topic.sent.push(message.clone());
            publish_locked(&mut state, &self.topic, into_source_message(&message));
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

struct InMemoryConnection {
    shared: Arc<Shared>,
    _guard: HandleGuard,
}

impl DestinationConnection for InMemoryConnection {
    fn sender<'a>(&'a mut self, destination: &'a str) -> BoxFuture<'a, Box<dyn MessageSender>> {
        Box::pin(async move {
            let sender: Box<dyn MessageSender> = Box::new(InMemorySender {
                shared: Arc::clone(&self.shared),
                topic: destination.to_string(),
                _guard: HandleGuard::acquire(&self.shared.handles.senders),
            });
            Ok(sender)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

// =============================================================================
// Trait impls
// =============================================================================

impl SourceConnector for InMemoryNamespace {
    fn open_receiver<'a>(
        &'a self,
        topic: &'a str,
        subscription: &'a str,
    ) -> BoxFuture<'a, Box<dyn MessageSource>> {
        Box::pin(async move {
            let exists = self
                .shared
                .state()
                .topics
                .get(topic)
                .is_some_and(|t| t.subscriptions.contains_key(subscription));
            if !exists {
                return Err(TransportError::not_found(format!(
                    "subscription '{topic}/{subscription}' does not exist"
                )));
            }
            let receiver: Box<dyn MessageSource> = Box::new(InMemoryReceiver {
                shared: Arc::clone(&self.shared),
                topic: topic.to_string(),
                subscription: subscription.to_string(),
                _guard: HandleGuard::acquire(&self.shared.handles.receivers),
            });
            Ok(receiver)
        })
    }
}

impl DestinationConnector for InMemoryNamespace {
    fn connect(&self) -> BoxFuture<'_, Box<dyn DestinationConnection>> {
        Box::pin(async move {
            if let Some(err) = self.shared.state().faults.connect.pop_front() {
                return Err(err);
            }
            let connection: Box<dyn DestinationConnection> = Box::new(InMemoryConnection {
                shared: Arc::clone(&self.shared),
                _guard: HandleGuard::acquire(&self.shared.handles.connections),
            });
            Ok(connection)
        })
    }
}

impl TopologyAdmin for InMemoryNamespace {
    fn list_topics(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move {
            let state = self.shared.state();
            if let Some(err) = &state.faults.list_topics {
                return Err(err.clone());
            }
            Ok(state.topics.keys().cloned().collect())
        })
    }

    fn list_subscriptions<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Vec<String>> {
        Box::pin(async move {
            let state = self.shared.state();
            if let Some(err) = &state.faults.list_subscriptions {
                return Err(err.clone());
            }
            state
                .topics
                .get(topic)
                .map(|t| t.subscriptions.keys().cloned().collect())
                .ok_or_else(|| TransportError::not_found(format!("topic '{topic}' does not exist")))
        })
    }
}

impl Namespace for InMemoryNamespace {
    fn name(&self) -> &str {
        &self.shared.name
    }
}
