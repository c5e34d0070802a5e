// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication engine coordinator.
//!
//! The orchestrator that ties together:
//! - Topology discovery via [`crate::topology::discover`]
//! - Subscription workers (one per topic/subscription pair)
//! - The per-message [`Replicator`] pipeline
//! - Run statistics via [`crate::stats::StatsRecorder`]
//!
//! # Architecture
//!
//! A cycle is one sweep over every active route:
//! 1. Discovers the source namespace topology (or uses the static lists)
//! 2. Spawns a worker per (topic, subscription), bounded by the bulkhead
//! 3. Waits for every worker to settle its messages
//! 4. Merges statistics and records cycle metrics
//!
//! A timed run repeats cycles until the replication timeout elapses or
//! shutdown is signalled, sleeping between cycles according to how busy the
//! last one was.

mod pipeline;
mod types;
mod worker;

pub use pipeline::{ReplicationReceipt, Replicator};
pub use types::{EngineState, HealthCheck, MessageOutcome, MessageState};

use crate::broker::Namespace;
use crate::classify::{report_error, ErrorContext};
use crate::config::{ReplicationConfig, Route, Side};
use crate::error::{ReplicationError, Result, TransportError};
use crate::message::SourceMessage;
use crate::metrics;
use crate::resilience::Bulkhead;
use crate::sanitize::sanitize_log_message;
use crate::stats::{ReplicationStats, StatsRecorder};
use crate::topology::{self, TopologyMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, Instrument};
use worker::WorkerContext;

/// Signals a running engine to stop, from another task.
///
/// Workers finish the message they are replicating, release the rest of
/// their batch, and the run returns its totals.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
    bulkhead: Bulkhead,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.tx.send_replace(true);
        self.bulkhead.close();
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// The replication engine.
///
/// Owns both namespaces and drives cycles over the configured direction.
/// Real broker clients and [`InMemoryNamespace`](crate::memory::InMemoryNamespace)
/// plug in through the [`Namespace`] trait.
pub struct ReplicationEngine {
    config: ReplicationConfig,

    primary: Arc<dyn Namespace>,
    secondary: Arc<dyn Namespace>,

    /// Shared by every worker of every cycle.
    replicator: Arc<Replicator>,

    /// Bounds concurrent subscription workers.
    bulkhead: Bulkhead,

    /// Totals for the whole run.
    totals: Arc<StatsRecorder>,
    cycles_completed: AtomicU64,

    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,

    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ReplicationEngine {
    /// Create an engine over two namespaces.
    ///
    /// Validates the configuration; the engine starts in `Created` state.
    pub fn new(
        config: ReplicationConfig,
        primary: Arc<dyn Namespace>,
        secondary: Arc<dyn Namespace>,
    ) -> Result<Self> {
        config.validate()?;
        let replicator = Replicator::new(&config);
        Ok(Self::with_replicator(config, primary, secondary, replicator))
    }

    /// Create an engine with a pre-built replicator (custom retry policy).
    pub fn with_replicator(
        config: ReplicationConfig,
        primary: Arc<dyn Namespace>,
        secondary: Arc<dyn Namespace>,
        replicator: Replicator,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let bulkhead = Bulkhead::new(config.concurrency.max_concurrent_subscriptions);
        metrics::set_engine_state("Created");

        Self {
            config,
            primary,
            secondary,
            replicator: Arc::new(replicator),
            bulkhead,
            totals: Arc::new(StatsRecorder::new()),
            cycles_completed: AtomicU64::new(0),
            state_tx,
            state_rx,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn replicator(&self) -> &Replicator {
        &self.replicator
    }

    pub fn namespace(&self, side: Side) -> &Arc<dyn Namespace> {
        match side {
            Side::Primary => &self.primary,
            Side::Secondary => &self.secondary,
        }
    }

    /// Get current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
            bulkhead: self.bulkhead.clone(),
        }
    }

    /// Run totals so far.
    pub fn totals(&self) -> ReplicationStats {
        self.totals.snapshot()
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    /// Status for monitoring. Performs no broker I/O.
    pub fn health_check(&self) -> HealthCheck {
        let state = self.state();
        let totals = self.totals();
        let ready = state.can_run();
        HealthCheck {
            state,
            ready,
            healthy: ready && !totals.has_failures(),
            cycles_completed: self.cycles_completed(),
            totals,
            circuit_rejections: self.replicator.circuits().total_rejections(),
            available_workers: self.bulkhead.available(),
        }
    }

    /// Check every active route before replicating.
    ///
    /// Lists topics on each source and opens then closes a connection to
    /// each destination. With a static topology the configured topics must
    /// exist on both sides and carry the configured subscriptions on the
    /// source. The first failure is reported and returned.
    pub async fn check_connections(&self) -> Result<()> {
        for route in self.config.active_routes() {
            let source = self.namespace(route.source).as_ref();
            let destination = self.namespace(route.destination).as_ref();
            let source_ctx = ErrorContext {
                correlation_id: "-",
                direction: route.label(),
                destination: source.name(),
            };
            let destination_ctx = ErrorContext {
                destination: destination.name(),
                ..source_ctx
            };

            let source_topics = source
                .list_topics()
                .await
                .map_err(|e| report_error(ReplicationError::Transport(e), &source_ctx))?;

            let mut connection = destination
                .connect()
                .await
                .map_err(|e| report_error(ReplicationError::Transport(e), &destination_ctx))?;
            if let Err(e) = connection.close().await {
                debug!(
                    namespace = destination.name(),
                    error = %sanitize_log_message(&e.to_string()),
                    "Connection close failed"
                );
            }

            if !self.config.discover_topology {
                self.check_static_topics(route, source, &source_topics, destination)
                    .await
                    .map_err(|e| report_error(e, &source_ctx))?;
            }

            info!(
                route = %route,
                source = source.name(),
                destination = destination.name(),
                topics = source_topics.len(),
                "Connection check passed"
            );
        }
        Ok(())
    }

    async fn check_static_topics(
        &self,
        route: Route,
        source: &dyn Namespace,
        source_topics: &[String],
        destination: &dyn Namespace,
    ) -> Result<()> {
        let destination_topics = destination.list_topics().await?;
        for topic in &self.config.endpoint(route.source).topics {
            if !source_topics.contains(topic) {
                return Err(TransportError::not_found(format!(
                    "topic '{topic}' not found on {}",
                    source.name()
                ))
                .into());
            }
            if !destination_topics.contains(topic) {
                return Err(TransportError::not_found(format!(
                    "topic '{topic}' not found on {}",
                    destination.name()
                ))
                .into());
            }
            let subscriptions = source.list_subscriptions(topic).await?;
            for subscription in &self.config.subscriptions {
                if !subscriptions.contains(subscription) {
                    return Err(TransportError::not_found(format!(
                        "subscription '{topic}/{subscription}' not found on {}",
                        source.name()
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }

    fn set_state(&self, state: EngineState) {
        self.state_tx.send_replace(state);
        metrics::set_engine_state(&state.to_string());
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Replicate one message pushed by a host trigger.
    ///
    /// The destination topic has the same name as `topic`. The classified
    /// error is returned so the host decides on redelivery.
    pub async fn replicate_message(
        &self,
        route: Route,
        topic: &str,
        source: &SourceMessage,
    ) -> Result<ReplicationReceipt> {
        let destination = self.namespace(route.destination);
        let result = self
            .replicator
            .replicate_message(source, destination.as_ref(), topic, route)
            .await;
        match &result {
            Ok(_) => self.totals.record_replicated(),
            Err(_) => self.totals.record_failed(),
        }
        result
    }

    /// Sweep every active route once.
    ///
    /// Discovery failures skip the route and count as a failure; message
    /// failures are counted, not returned. Errors only on shutdown, an
    /// invalid state, or a panicked worker.
    pub async fn run_cycle(&self) -> Result<ReplicationStats> {
        if self.is_shutdown() {
            return Err(ReplicationError::Shutdown);
        }
        let state = self.state();
        if !state.can_run() {
            return Err(ReplicationError::InvalidState {
                expected: "Created, Running or Waiting".to_string(),
                actual: state.to_string(),
            });
        }
        self.set_state(EngineState::Running);

        let cycle_number = self.cycles_completed() + 1;
        let span = info_span!("cycle", cycle = cycle_number, direction = self.config.direction.as_str());
        self.sweep().instrument(span).await
    }

    async fn sweep(&self) -> Result<ReplicationStats> {
        let started = Instant::now();
        let cycle = Arc::new(StatsRecorder::new());
        let mut workers = JoinSet::new();

        'routes: for route in self.config.active_routes() {
            let source = Arc::clone(self.namespace(route.source));
            let Some(topology) = self.topology_for(route, source.as_ref(), &cycle).await else {
                continue;
            };
            if topology.is_empty() {
                info!(route = %route, namespace = source.name(), "No subscriptions to replicate");
                continue;
            }

            let ctx = Arc::new(WorkerContext {
                route,
                source,
                destination: Arc::clone(self.namespace(route.destination)),
                replicator: Arc::clone(&self.replicator),
                batch: self.config.batch.clone(),
                stats: Arc::clone(&cycle),
            });

            for (topic, subscription) in topology.pairs() {
                if self.is_shutdown() {
                    break 'routes;
                }
                // Closed only by shutdown.
                let Ok(permit) = self.bulkhead.acquire().await else {
                    break 'routes;
                };
                let ctx = Arc::clone(&ctx);
                let topic = topic.to_string();
                let subscription = subscription.to_string();
                let shutdown_rx = self.shutdown_rx.clone();
                workers.spawn(async move {
                    let stats = worker::run_subscription(ctx, topic, subscription, shutdown_rx).await;
                    drop(permit);
                    stats
                });
                metrics::set_active_workers(
                    self.bulkhead.max_concurrent().saturating_sub(self.bulkhead.available()),
                );
            }
        }

        let worker_count = workers.len();
        debug!(workers = worker_count, "Waiting for subscription workers");

        let mut panicked = 0usize;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(
                    error = %sanitize_log_message(&e.to_string()),
                    alert_severity = "critical",
                    "Subscription worker failed"
                );
                cycle.record_error();
                panicked += 1;
            }
        }
        metrics::set_active_workers(0);

        let stats = cycle.snapshot();
        self.totals.add(stats);
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);

        let elapsed = started.elapsed();
        metrics::record_cycle(elapsed, stats.processed, stats.has_failures());
        info!(
            workers = worker_count,
            processed = stats.processed,
            replicated = stats.replicated,
            skipped = stats.skipped,
            failed = stats.failed,
            duration_ms = elapsed.as_millis() as u64,
            "Replication cycle complete"
        );

        if panicked > 0 {
            self.set_state(EngineState::Failed);
            return Err(ReplicationError::Internal(format!(
                "{panicked} subscription worker(s) panicked"
            )));
        }
        Ok(stats)
    }

    /// Discovered or static topology for `route`; `None` skips the route.
    async fn topology_for(
        &self,
        route: Route,
        source: &dyn Namespace,
        cycle: &StatsRecorder,
    ) -> Option<TopologyMap> {
        if !self.config.discover_topology {
            return Some(TopologyMap::from_static(
                &self.config.endpoint(route.source).topics,
                &self.config.subscriptions,
            ));
        }

        match topology::discover(source, source.name()).await {
            Ok(map) => Some(map),
            Err(e) => {
                metrics::record_discovery_failure(source.name());
                let _ = report_error(
                    ReplicationError::Discovery {
                        namespace: source.name().to_string(),
                        source: e,
                    },
                    &ErrorContext {
                        correlation_id: "-",
                        direction: route.label(),
                        destination: source.name(),
                    },
                );
                cycle.record_error();
                None
            }
        }
    }

    /// Run a single cycle, log the summary and stop.
    pub async fn run_once(&self) -> Result<ReplicationStats> {
        info!(
            direction = self.config.direction.label(),
            ttl_seconds = self.config.ttl_seconds(),
            "Starting single replication cycle"
        );
        let result = self.run_cycle().await;
        self.finish();
        let stats = result?;
        stats.log_summary(self.config.direction.label());
        Ok(stats)
    }

    /// Repeat cycles until the replication timeout elapses or shutdown.
    ///
    /// Waits `idle_wait` after an empty cycle, `active_wait` after a busy one
    /// and `error_backoff` after one with failures. Returns the run totals.
    pub async fn run_timed(&self) -> Result<ReplicationStats> {
        let schedule = &self.config.schedule;
        let timeout = schedule.replication_timeout();
        let deadline = Instant::now() + timeout;
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(
            direction = self.config.direction.label(),
            timeout = %humantime::format_duration(timeout),
            ttl_seconds = self.config.ttl_seconds(),
            "Starting timed replication run"
        );

        loop {
            let cycle = match self.run_cycle().await {
                Ok(stats) => stats,
                Err(ReplicationError::Shutdown) => break,
                Err(e) => {
                    self.finish();
                    return Err(e);
                }
            };

            let wait = if cycle.has_failures() {
                schedule.error_backoff()
            } else if cycle.is_active() {
                schedule.active_wait()
            } else {
                schedule.idle_wait()
            };

            let now = Instant::now();
            if now >= deadline {
                debug!("Replication timeout reached");
                break;
            }
            let wait = wait.min(deadline - now);

            self.set_state(EngineState::Waiting);
            debug!(wait_ms = wait.as_millis() as u64, "Waiting before next cycle");
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, ending run");
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            if Instant::now() >= deadline {
                debug!("Replication timeout reached");
                break;
            }
        }

        self.finish();
        let totals = self.totals();
        info!(cycles = self.cycles_completed(), "Timed replication run complete");
        totals.log_summary(self.config.direction.label());
        Ok(totals)
    }

    /// Signal shutdown from the owning task.
    pub fn shutdown(&self) {
        match self.state() {
            EngineState::Created | EngineState::Stopped => {
                self.shutdown_handle().shutdown();
                self.set_state(EngineState::Stopped);
            }
            EngineState::Failed => self.shutdown_handle().shutdown(),
            _ => {
                self.shutdown_handle().shutdown();
                self.set_state(EngineState::ShuttingDown);
            }
        }
    }

    fn finish(&self) {
        if self.state() != EngineState::Failed {
            self.set_state(EngineState::Stopped);
            info!("Replication engine stopped");
        }
    }
}
