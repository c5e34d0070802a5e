// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-message replication pipeline.
//!
//! [`Replicator`] runs one source message through
//! `received → transformed → sent → acknowledged`, or abandons it on any
//! failure. The source is completed only after the destination accepted the
//! copy.
//!
//! Two entry points:
//!
//! - [`Replicator::process_message`] settles the message with its receiver
//!   and never returns an error (the outcome says what happened).
//! - [`Replicator::replicate_message`] is for hosted triggers: it transforms
//!   and sends, and hands the classified error back to the host, which owns
//!   settlement.

use crate::broker::{DestinationConnector, MessageSource};
use crate::circuit_breaker::{CircuitError, DestinationCircuits};
use crate::classify::{classify, report_error, ErrorCategory, ErrorContext};
use crate::config::{DeadLetterSettings, LoopPreventionSettings, ReplicationConfig, Route};
use crate::coordinator::types::{MessageOutcome, MessageState};
use crate::delivery::send_message_to_destination;
use crate::error::{ReplicationError, Result, TransportError};
use crate::identity::generate_correlation_id;
use crate::message::{ReplicatedMessage, SourceMessage};
use crate::metrics;
use crate::resilience::{RateLimiter, RetryPolicy};
use crate::sanitize::{sanitize_log_message, truncate_correlation_id};
use crate::transform::{create_replicated_message, mark_replicated};
use std::time::Instant;
use tracing::{debug, info, warn};

/// What a successful replication produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationReceipt {
    pub correlation_id: String,
    pub message_id: String,
    pub body_size: usize,
}

/// A failed replication, with the stage it failed in.
struct Failure {
    stage: MessageState,
    category: ErrorCategory,
    error: ReplicationError,
}

/// Transforms, sends and settles source messages.
///
/// Shared by every worker of a cycle; holds no per-message state.
pub struct Replicator {
    retry: RetryPolicy,
    circuits: DestinationCircuits,
    rate_limiter: Option<RateLimiter>,
    ttl_seconds: u64,
    loop_prevention: LoopPreventionSettings,
    dead_letter: DeadLetterSettings,
}

impl Replicator {
    pub fn new(config: &ReplicationConfig) -> Self {
        Self {
            retry: RetryPolicy::from_settings(&config.retry),
            circuits: DestinationCircuits::new(config.circuit_breaker.clone()),
            rate_limiter: config
                .concurrency
                .send_rate_limit
                .clone()
                .map(RateLimiter::new),
            ttl_seconds: config.ttl_seconds(),
            loop_prevention: config.loop_prevention.clone(),
            dead_letter: config.dead_letter.clone(),
        }
    }

    /// Replace the retry policy (tests use near-zero delays).
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn circuits(&self) -> &DestinationCircuits {
        &self.circuits
    }

    /// False when the message is itself a replica from an earlier pass.
    pub fn should_replicate_message(&self, message: &SourceMessage) -> bool {
        if !self.loop_prevention.enabled {
            return true;
        }
        !message
            .property(&self.loop_prevention.marker_property)
            .is_some_and(|v| v.is_truthy())
    }

    /// Transform `source` and send it to `topic` on `destination`.
    ///
    /// Errors are logged once and returned classified; the caller decides
    /// what to do with the source message.
    pub async fn replicate_message<D>(
        &self,
        source: &SourceMessage,
        destination: &D,
        topic: &str,
        route: Route,
    ) -> Result<ReplicationReceipt>
    where
        D: DestinationConnector + ?Sized,
    {
        let correlation_id = generate_correlation_id(source);
        self.replicate(source, &correlation_id, destination, topic, route)
            .await
            .map_err(|failure| failure.error)
    }

    /// Run the full state machine for one received message and settle it.
    ///
    /// The correlation id is inherited or minted, never empty, so a
    /// `TransformFailed` outcome only arises from a replica that cannot be
    /// built at all; it is settled like a send failure.
    pub async fn process_message<D>(
        &self,
        receiver: &mut dyn MessageSource,
        source: &SourceMessage,
        destination: &D,
        topic: &str,
        route: Route,
    ) -> MessageOutcome
    where
        D: DestinationConnector + ?Sized,
    {
        if !self.should_replicate_message(source) {
            debug!(
                message_id = source.message_id.as_deref().unwrap_or("<none>"),
                marker = %self.loop_prevention.marker_property,
                stage = %MessageState::Skipped,
                "Skipping message already replicated"
            );
            complete(receiver, source).await;
            metrics::record_message_outcome(route.tag(), topic, "skipped");
            return MessageOutcome::Skipped;
        }

        let correlation_id = generate_correlation_id(source);
        self.replicate_and_settle(receiver, source, &correlation_id, destination, topic, route)
            .await
    }

    async fn replicate_and_settle<D>(
        &self,
        receiver: &mut dyn MessageSource,
        source: &SourceMessage,
        correlation_id: &str,
        destination: &D,
        topic: &str,
        route: Route,
    ) -> MessageOutcome
    where
        D: DestinationConnector + ?Sized,
    {
        match self.replicate(source, correlation_id, destination, topic, route).await {
            Ok(_) => {
                let settled = complete(receiver, source).await;
                metrics::record_message_outcome(route.tag(), topic, "replicated");
                MessageOutcome::Replicated { settled }
            }
            Err(failure) => {
                if self.dead_letter.is_final_delivery(source.delivery_count) {
                    warn!(
                        message_id = source.message_id.as_deref().unwrap_or("<none>"),
                        delivery_count = source.delivery_count,
                        max_delivery_count = self.dead_letter.max_delivery_count,
                        alert_severity = "high",
                        "Message reached max delivery count and will be dead-lettered"
                    );
                }
                abandon(receiver, source, failure.stage).await;
                metrics::record_message_outcome(route.tag(), topic, "failed");
                MessageOutcome::Failed {
                    stage: failure.stage,
                    category: failure.category,
                }
            }
        }
    }

    async fn replicate<D>(
        &self,
        source: &SourceMessage,
        correlation_id: &str,
        destination: &D,
        topic: &str,
        route: Route,
    ) -> std::result::Result<ReplicationReceipt, Failure>
    where
        D: DestinationConnector + ?Sized,
    {
        let ctx = ErrorContext {
            correlation_id,
            direction: route.label(),
            destination: topic,
        };
        let failed = |stage: MessageState, err: ReplicationError| {
            let category = classify(&err);
            Failure {
                stage,
                category,
                error: report_error(err, &ctx),
            }
        };

        info!(
            correlation_id = %correlation_id,
            direction = route.label(),
            destination = topic,
            original_message_id = source.message_id.as_deref().unwrap_or("<none>"),
            delivery_count = source.delivery_count,
            stage = %MessageState::Received,
            "Replicating message"
        );

        let mut replica = create_replicated_message(source, correlation_id, Some(self.ttl_seconds))
            .map_err(|e| failed(MessageState::TransformFailed, e))?;
        if self.loop_prevention.enabled {
            mark_replicated(&mut replica, &self.loop_prevention.marker_property, route.tag());
        }
        debug!(
            correlation_id = %correlation_id,
            replicated_message_id = %replica.message_id,
            stage = %MessageState::Transformed,
            "Replica built"
        );

        let receipt = ReplicationReceipt {
            correlation_id: correlation_id.to_string(),
            message_id: replica.message_id.clone(),
            body_size: replica.body_size(),
        };
        let content_type = replica.content_type.clone();

        self.send_with_retry(destination, topic, &replica)
            .await
            .map_err(|e| failed(MessageState::SendFailed, e))?;

        info!(
            correlation_id = %truncate_correlation_id(correlation_id, 36),
            direction = route.label(),
            destination = topic,
            original_message_id = source.message_id.as_deref().unwrap_or("<none>"),
            replicated_message_id = %receipt.message_id,
            body_type = source.body.kind(),
            body_size = receipt.body_size,
            content_type = %content_type,
            ttl_seconds = self.ttl_seconds,
            stage = %MessageState::Sent,
            "Message replicated successfully"
        );
        metrics::record_message_bytes(route.tag(), receipt.body_size);
        Ok(receipt)
    }

    /// Each attempt passes the rate limiter, then the destination circuit.
    async fn send_with_retry<D>(
        &self,
        destination: &D,
        topic: &str,
        replica: &ReplicatedMessage,
    ) -> Result<()>
    where
        D: DestinationConnector + ?Sized,
    {
        let circuit = self.circuits.get(topic);
        let circuit = &circuit;

        self.retry
            .execute(|| {
                let message = replica.clone();
                async move {
                    if let Some(limiter) = &self.rate_limiter {
                        limiter.acquire().await;
                    }
                    let started = Instant::now();
                    match circuit
                        .call(|| send_message_to_destination(destination, topic, message))
                        .await
                    {
                        Ok(()) => {
                            metrics::record_send_attempt(topic, true);
                            metrics::record_send_latency(topic, started.elapsed());
                            Ok(())
                        }
                        Err(CircuitError::Rejected) => Err(TransportError::service_request(
                            format!("circuit open for destination '{topic}'"),
                        )),
                        Err(CircuitError::Inner(e)) => {
                            metrics::record_send_attempt(topic, false);
                            Err(e)
                        }
                    }
                }
            })
            .await
    }
}

async fn complete(receiver: &mut dyn MessageSource, message: &SourceMessage) -> bool {
    match receiver.complete(message).await {
        Ok(()) => {
            metrics::record_settlement("complete", true);
            debug!(
                message_id = message.message_id.as_deref().unwrap_or("<none>"),
                stage = %MessageState::Acknowledged,
                "Source message completed"
            );
            true
        }
        Err(e) => {
            metrics::record_settlement("complete", false);
            // The copy is already sent; the redelivered source produces the
            // same replica id, so destination duplicate detection absorbs it.
            warn!(
                message_id = message.message_id.as_deref().unwrap_or("<none>"),
                error = %sanitize_log_message(&e.to_string()),
                "Failed to complete source message"
            );
            false
        }
    }
}

async fn abandon(receiver: &mut dyn MessageSource, message: &SourceMessage, stage: MessageState) {
    match receiver.abandon(message).await {
        Ok(()) => {
            metrics::record_settlement("abandon", true);
            debug!(
                message_id = message.message_id.as_deref().unwrap_or("<none>"),
                stage = %MessageState::Abandoned,
                failed_stage = %stage,
                "Source message abandoned"
            );
        }
        Err(e) => {
            metrics::record_settlement("abandon", false);
            warn!(
                message_id = message.message_id.as_deref().unwrap_or("<none>"),
                error = %sanitize_log_message(&e.to_string()),
                "Failed to abandon source message; lock will expire"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::SourceConnector;
    use crate::error::TransportErrorKind;
    use crate::memory::InMemoryNamespace;
    use crate::transform::PROP_ORIGINAL_MESSAGE_ID;
    use std::time::Duration;

    fn config() -> ReplicationConfig {
        ReplicationConfig::for_testing("memory://primary", "memory://secondary")
    }

    fn replicator() -> Replicator {
        Replicator::new(&config()).with_retry_policy(RetryPolicy::new(3, Duration::from_millis(1)))
    }

    fn namespaces() -> (InMemoryNamespace, InMemoryNamespace) {
        let primary = InMemoryNamespace::new("primary");
        let secondary = InMemoryNamespace::new("secondary");
        primary.create_subscription("orders", "audit");
        secondary.create_topic("orders");
        (primary, secondary)
    }

    async fn receive_one(ns: &InMemoryNamespace) -> (Box<dyn MessageSource>, SourceMessage) {
        let mut receiver = ns.open_receiver("orders", "audit").await.unwrap();
        let mut batch = receiver
            .receive_batch(1, Duration::from_millis(10))
            .await
            .unwrap();
        (receiver, batch.remove(0))
    }

    #[test]
    fn test_should_replicate_checks_marker_truthiness() {
        let r = replicator();
        assert!(r.should_replicate_message(&SourceMessage::new("x")));
        assert!(!r.should_replicate_message(
            &SourceMessage::new("x").with_property("x-replicated", "primary_to_secondary")
        ));
        assert!(!r.should_replicate_message(&SourceMessage::new("x").with_property("x-replicated", true)));
        assert!(r.should_replicate_message(&SourceMessage::new("x").with_property("x-replicated", false)));
        assert!(r.should_replicate_message(&SourceMessage::new("x").with_property("x-replicated", "")));
    }

    #[test]
    fn test_loop_prevention_disabled_replicates_everything() {
        let mut cfg = config();
        cfg.loop_prevention.enabled = false;
        let r = Replicator::new(&cfg);
        assert!(r.should_replicate_message(&SourceMessage::new("x").with_property("x-replicated", true)));
    }

    #[tokio::test]
    async fn test_process_message_completes_after_send() {
        let (primary, secondary) = namespaces();
        primary.publish("orders", SourceMessage::new("hello").with_message_id("m-1"));
        let (mut receiver, msg) = receive_one(&primary).await;

        let outcome = replicator()
            .process_message(receiver.as_mut(), &msg, &secondary, "orders", Route::PRIMARY_TO_SECONDARY)
            .await;

        assert_eq!(outcome, MessageOutcome::Replicated { settled: true });
        assert_eq!(primary.completed("orders", "audit"), 1);
        assert_eq!(primary.abandoned("orders", "audit"), 0);

        let sent = secondary.sent_to("orders");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, b"hello");
        assert_eq!(sent[0].time_to_live, Some(Duration::from_secs(720)));
        assert_eq!(
            sent[0].application_properties.get("x-replicated").and_then(|v| v.as_str()),
            Some("primary_to_secondary")
        );
        assert_eq!(
            sent[0].application_properties.get(PROP_ORIGINAL_MESSAGE_ID).and_then(|v| v.as_str()),
            Some("m-1")
        );
    }

    #[tokio::test]
    async fn test_process_message_abandons_on_send_failure() {
        let (primary, secondary) = namespaces();
        primary.publish("orders", SourceMessage::new("hello").with_message_id("m-1"));
        secondary.fail_next_sends(TransportError::service_request("connection reset"), 3);
        let (mut receiver, msg) = receive_one(&primary).await;

        let outcome = replicator()
            .process_message(receiver.as_mut(), &msg, &secondary, "orders", Route::PRIMARY_TO_SECONDARY)
            .await;

        assert_eq!(
            outcome,
            MessageOutcome::Failed {
                stage: MessageState::SendFailed,
                category: ErrorCategory::ServiceRequest,
            }
        );
        assert_eq!(primary.completed("orders", "audit"), 0);
        assert_eq!(primary.abandoned("orders", "audit"), 1);
        assert_eq!(secondary.send_attempts(), 3);
    }

    #[tokio::test]
    async fn test_transform_failure_abandons_without_sending() {
        let (primary, secondary) = namespaces();
        primary.publish("orders", SourceMessage::new("hello").with_message_id("m-1"));
        let (mut receiver, msg) = receive_one(&primary).await;

        let outcome = replicator()
            .replicate_and_settle(
                receiver.as_mut(),
                &msg,
                "",
                &secondary,
                "orders",
                Route::PRIMARY_TO_SECONDARY,
            )
            .await;

        assert_eq!(
            outcome,
            MessageOutcome::Failed {
                stage: MessageState::TransformFailed,
                category: ErrorCategory::Unexpected,
            }
        );
        assert_eq!(outcome.final_state(), MessageState::Abandoned);
        assert_eq!(primary.abandoned("orders", "audit"), 1);
        assert_eq!(primary.completed("orders", "audit"), 0);
        assert_eq!(secondary.send_attempts(), 0);
    }

    #[tokio::test]
    async fn test_process_message_skips_marked_message() {
        let (primary, secondary) = namespaces();
        primary.publish(
            "orders",
            SourceMessage::new("echo").with_property("x-replicated", "secondary_to_primary"),
        );
        let (mut receiver, msg) = receive_one(&primary).await;

        let outcome = replicator()
            .process_message(receiver.as_mut(), &msg, &secondary, "orders", Route::PRIMARY_TO_SECONDARY)
            .await;

        assert_eq!(outcome, MessageOutcome::Skipped);
        assert_eq!(primary.completed("orders", "audit"), 1);
        assert_eq!(secondary.send_attempts(), 0);
    }

    #[tokio::test]
    async fn test_replicate_message_recovers_from_transient_failure() {
        let (_, secondary) = namespaces();
        secondary.fail_next_sends(TransportError::broker("server busy", Some(503)), 1);

        let source = SourceMessage::new("hi").with_message_id("m-9").with_correlation_id("trace-abcdefgh-1");
        let receipt = replicator()
            .replicate_message(&source, &secondary, "orders", Route::PRIMARY_TO_SECONDARY)
            .await
            .unwrap();

        assert_eq!(receipt.correlation_id, "trace-abcdefgh-1");
        assert_eq!(receipt.message_id, "repl-trace-ab-m-9");
        assert_eq!(receipt.body_size, 2);
        assert_eq!(secondary.send_attempts(), 2);
    }

    #[tokio::test]
    async fn test_replicate_message_propagates_authentication_unchanged() {
        let (_, secondary) = namespaces();
        secondary.fail_next_sends(TransportError::authentication("unauthorized"), 1);

        let err = replicator()
            .replicate_message(&SourceMessage::new("x"), &secondary, "orders", Route::PRIMARY_TO_SECONDARY)
            .await
            .unwrap_err();

        match err {
            ReplicationError::Transport(e) => assert_eq!(e.kind, TransportErrorKind::Authentication),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(secondary.send_attempts(), 1);
    }

    #[tokio::test]
    async fn test_missing_destination_topic_is_not_retried() {
        let primary = InMemoryNamespace::new("primary");
        primary.create_subscription("orders", "audit");
        let secondary = InMemoryNamespace::new("secondary");
        primary.publish("orders", SourceMessage::new("x"));
        let (mut receiver, msg) = receive_one(&primary).await;

        let outcome = replicator()
            .process_message(receiver.as_mut(), &msg, &secondary, "orders", Route::PRIMARY_TO_SECONDARY)
            .await;

        assert!(matches!(
            outcome,
            MessageOutcome::Failed {
                category: ErrorCategory::ResourceNotFound,
                ..
            }
        ));
        assert_eq!(primary.abandoned("orders", "audit"), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_counts_as_transient() {
        let (_, secondary) = namespaces();
        let mut cfg = config();
        cfg.circuit_breaker.enabled = true;
        cfg.circuit_breaker.window = 1;
        cfg.circuit_breaker.open_wait = "1h".to_string();
        let r = Replicator::new(&cfg).with_retry_policy(RetryPolicy::new(3, Duration::from_millis(1)));
        secondary.fail_next_sends(TransportError::service_request("down"), 10);

        let err = r
            .replicate_message(&SourceMessage::new("x"), &secondary, "orders", Route::PRIMARY_TO_SECONDARY)
            .await
            .unwrap_err();

        assert!(matches!(err, ReplicationError::RetriesExhausted { attempts: 3, .. }));
        assert!(r.circuits().total_rejections() >= 1);
        assert!(secondary.send_attempts() < 3);
    }
}
