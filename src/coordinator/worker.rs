// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Subscription worker: drains one (topic, subscription) pair.
//!
//! Each worker owns its receiver for the whole pass and:
//! 1. Receives a batch (peek-lock) of up to `batch_size` messages
//! 2. Runs every message through the [`Replicator`] in pull order
//! 3. Stops on an empty batch, `max_batches_per_subscription`, or shutdown
//! 4. Closes the receiver, releasing any lock it still holds
//!
//! # Graceful Shutdown
//!
//! A pending receive is cancelled immediately via `tokio::select!`. A message
//! already being replicated is finished and settled; the rest of its batch
//! is abandoned untouched so the broker can hand it out again.

use crate::broker::{MessageSource, Namespace};
use crate::classify::{report_error, ErrorContext};
use crate::config::{BatchSettings, Route};
use crate::coordinator::pipeline::Replicator;
use crate::coordinator::types::MessageOutcome;
use crate::error::ReplicationError;
use crate::message::SourceMessage;
use crate::sanitize::sanitize_log_message;
use crate::stats::{ReplicationStats, StatsRecorder};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};

/// Everything a worker shares with the rest of the cycle.
pub(crate) struct WorkerContext {
    pub route: Route,
    pub source: Arc<dyn Namespace>,
    pub destination: Arc<dyn Namespace>,
    pub replicator: Arc<Replicator>,
    pub batch: BatchSettings,
    pub stats: Arc<StatsRecorder>,
}

/// Drain `topic/subscription` and return what this worker did.
///
/// Every outcome is also added to the shared recorder as it happens.
pub(crate) async fn run_subscription(
    ctx: Arc<WorkerContext>,
    topic: String,
    subscription: String,
    mut shutdown_rx: watch::Receiver<bool>,
) -> ReplicationStats {
    let span = info_span!(
        "subscription",
        direction = ctx.route.tag(),
        topic = %topic,
        subscription = %subscription
    );

    async move {
        let mut totals = ReplicationStats::default();

        let mut receiver = match ctx.source.open_receiver(&topic, &subscription).await {
            Ok(receiver) => receiver,
            Err(e) => {
                let _ = report_error(
                    ReplicationError::Transport(e),
                    &ErrorContext {
                        correlation_id: "-",
                        direction: ctx.route.label(),
                        destination: &topic,
                    },
                );
                ctx.stats.record_error();
                totals.failed += 1;
                return totals;
            }
        };

        let batch_size = ctx.batch.batch_size.max(1);
        let max_wait = ctx.batch.max_wait();
        let max_batches = ctx.batch.max_batches_per_subscription.max(1);

        for batch_index in 0..max_batches {
            if *shutdown_rx.borrow() {
                debug!("Shutdown signalled, stopping subscription");
                break;
            }

            let received = tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    debug!("Shutdown signalled during receive");
                    break;
                }

                result = receiver.receive_batch(batch_size, max_wait) => result,
            };

            let batch = match received {
                Ok(batch) => batch,
                Err(e) => {
                    let _ = report_error(
                        ReplicationError::Transport(e),
                        &ErrorContext {
                            correlation_id: "-",
                            direction: ctx.route.label(),
                            destination: &topic,
                        },
                    );
                    ctx.stats.record_error();
                    totals.failed += 1;
                    break;
                }
            };

            if batch.is_empty() {
                debug!(batches = batch_index, "Subscription drained");
                break;
            }

            let batch_stats = process_batch(&ctx, receiver.as_mut(), &topic, &batch, &shutdown_rx).await;
            debug!(
                batch = batch_index,
                size = batch.len(),
                replicated = batch_stats.stats.replicated,
                skipped = batch_stats.stats.skipped,
                failed = batch_stats.stats.failed,
                "Batch processed"
            );
            totals += batch_stats.stats;

            if batch_stats.stop {
                break;
            }
        }

        if let Err(e) = receiver.close().await {
            debug!(error = %sanitize_log_message(&e.to_string()), "Receiver close failed");
        }
        drop(receiver);

        if totals.is_active() || totals.has_failures() {
            info!(
                processed = totals.processed,
                replicated = totals.replicated,
                skipped = totals.skipped,
                failed = totals.failed,
                "Subscription pass complete"
            );
        }
        totals
    }
    .instrument(span)
    .await
}

struct BatchResult {
    stats: ReplicationStats,
    /// Stop the subscription pass after this batch.
    stop: bool,
}

async fn process_batch(
    ctx: &WorkerContext,
    receiver: &mut dyn MessageSource,
    topic: &str,
    batch: &[SourceMessage],
    shutdown_rx: &watch::Receiver<bool>,
) -> BatchResult {
    let mut stats = ReplicationStats::default();

    for (index, message) in batch.iter().enumerate() {
        if *shutdown_rx.borrow() {
            release_unprocessed(receiver, &batch[index..]).await;
            return BatchResult { stats, stop: true };
        }

        let outcome = ctx
            .replicator
            .process_message(receiver, message, ctx.destination.as_ref(), topic, ctx.route)
            .await;

        stats.processed += 1;
        debug!(
            topic,
            state = %outcome.final_state(),
            outcome = outcome.as_str(),
            "Message finished"
        );
        match outcome {
            MessageOutcome::Replicated { .. } => {
                stats.replicated += 1;
                ctx.stats.record_replicated();
            }
            MessageOutcome::Skipped => {
                stats.skipped += 1;
                ctx.stats.record_skipped();
            }
            MessageOutcome::Failed { .. } => {
                stats.failed += 1;
                ctx.stats.record_failed();
            }
        }

        if outcome.aborts_subscription() {
            warn!(
                alert_severity = "critical",
                "Authentication failure, abandoning rest of subscription pass"
            );
            release_unprocessed(receiver, &batch[index + 1..]).await;
            return BatchResult { stats, stop: true };
        }
    }

    BatchResult { stats, stop: false }
}

/// Hand back locks on messages this pass will not touch.
async fn release_unprocessed(receiver: &mut dyn MessageSource, messages: &[SourceMessage]) {
    for message in messages {
        if let Err(e) = receiver.abandon(message).await {
            debug!(
                message_id = message.message_id.as_deref().unwrap_or("<none>"),
                error = %sanitize_log_message(&e.to_string()),
                "Release of unprocessed message failed"
            );
        }
    }
    if !messages.is_empty() {
        debug!(released = messages.len(), "Released unprocessed messages");
    }
}
