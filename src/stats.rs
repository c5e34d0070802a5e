// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication statistics.
//!
//! Workers share one [`StatsRecorder`] (atomic counters); a
//! [`ReplicationStats`] snapshot is taken for logging and CI outputs.

use serde::Serialize;
use std::io::Write;
use std::ops::AddAssign;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// Counter snapshot for a batch, cycle or whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationStats {
    pub processed: u64,
    pub replicated: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl ReplicationStats {
    /// `replicated / processed * 100`, or `0.0` when nothing was processed.
    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            return 0.0;
        }
        self.replicated as f64 / self.processed as f64 * 100.0
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// True when the cycle touched any message at all.
    pub fn is_active(&self) -> bool {
        self.processed > 0
    }

    pub fn log_summary(&self, label: &str) {
        info!(
            direction = label,
            processed = self.processed,
            replicated = self.replicated,
            skipped = self.skipped,
            failed = self.failed,
            success_rate = %format!("{:.1}", self.success_rate()),
            "Replication summary"
        );
        if self.failed > 0 {
            warn!(failed = self.failed, "{} messages failed to replicate", self.failed);
        }
        if self.replicated > 0 {
            info!(replicated = self.replicated, "Successfully replicated {} messages", self.replicated);
        }
    }

    /// CI job output lines (`key=value`).
    pub fn ci_output_lines(&self) -> String {
        format!(
            "messages_processed={}\nmessages_replicated={}\nmessages_failed={}\nsuccess_rate={:.1}\n",
            self.processed,
            self.replicated,
            self.failed,
            self.success_rate()
        )
    }

    /// Append the CI output lines to `path`, creating it if needed.
    pub fn write_ci_outputs(&self, path: &Path) -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        file.write_all(self.ci_output_lines().as_bytes())
    }
}

impl AddAssign for ReplicationStats {
    fn add_assign(&mut self, other: Self) {
        self.processed += other.processed;
        self.replicated += other.replicated;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Shared atomic counters.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    processed: AtomicU64,
    replicated: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_replicated(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.replicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failure that happened outside any message (e.g. discovery).
    pub fn record_error(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, stats: ReplicationStats) {
        self.processed.fetch_add(stats.processed, Ordering::Relaxed);
        self.replicated.fetch_add(stats.replicated, Ordering::Relaxed);
        self.skipped.fetch_add(stats.skipped, Ordering::Relaxed);
        self.failed.fetch_add(stats.failed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReplicationStats {
        ReplicationStats {
            processed: self.processed.load(Ordering::Relaxed),
            replicated: self.replicated.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_success_rate() {
        let stats = ReplicationStats {
            processed: 4,
            replicated: 3,
            skipped: 0,
            failed: 1,
        };
        assert!((stats.success_rate() - 75.0).abs() < f64::EPSILON);
        assert_eq!(ReplicationStats::default().success_rate(), 0.0);
    }

    #[test]
    fn test_add_assign() {
        let mut total = ReplicationStats::default();
        total += ReplicationStats {
            processed: 2,
            replicated: 1,
            skipped: 1,
            failed: 0,
        };
        total += ReplicationStats {
            processed: 1,
            replicated: 0,
            skipped: 0,
            failed: 1,
        };
        assert_eq!(total.processed, 3);
        assert!(total.has_failures());
        assert!(total.is_active());
    }

    #[test]
    fn test_ci_output_lines() {
        let stats = ReplicationStats {
            processed: 3,
            replicated: 2,
            skipped: 0,
            failed: 1,
        };
        assert_eq!(
            stats.ci_output_lines(),
            "messages_processed=3\nmessages_replicated=2\nmessages_failed=1\nsuccess_rate=66.7\n"
        );
    }

    #[test]
    fn test_write_ci_outputs_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("github_output");
        std::fs::write(&path, "existing=1\n").unwrap();

        ReplicationStats::default().write_ci_outputs(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("existing=1\n"));
        assert!(content.contains("success_rate=0.0"));
    }

    #[test]
    fn test_recorder_concurrent_updates() {
        let recorder = Arc::new(StatsRecorder::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = Arc::clone(&recorder);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        r.record_replicated();
                        r.record_skipped();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = recorder.snapshot();
        assert_eq!(snap.processed, 1600);
        assert_eq!(snap.replicated, 800);
        assert_eq!(snap.skipped, 800);
    }

    #[test]
    fn test_record_error_does_not_count_processed() {
        let recorder = StatsRecorder::new();
        recorder.record_error();
        let snap = recorder.snapshot();
        assert_eq!(snap.processed, 0);
        assert_eq!(snap.failed, 1);
    }
}
