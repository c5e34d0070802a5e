//! Engine and message state types.
//!
//! # Engine Lifecycle
//!
//! ```text
//!                run_timed() / run_once()
//! Created ─────────────────────────────→ Running ←──────────┐
//!    │                                     │                │
//!    │ shutdown()                          │ cycle done     │ wait over
//!    ↓                                     ↓                │
//! Stopped ←──── ShuttingDown ←──────── Waiting ─────────────┘
//!                    ↑          shutdown()
//!                    └──────────────── (any state)
//! ```
//!
//! `Failed` is reached when a subscription worker panics. The cycle still
//! waits for every other worker to settle its messages first.
//!
//! # Message Lifecycle
//!
//! ```text
//! Received ──→ Transformed ──→ Sent ──→ Acknowledged
//!    │              │
//!    ↓              ↓
//! TransformFailed  SendFailed ──→ Abandoned
//!    │                               ↑
//!    └───────────────────────────────┘
//!
//! Received ──(already replicated)──→ Skipped
//! ```

use crate::classify::ErrorCategory;
use crate::stats::ReplicationStats;

/// State of the replication engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Built, no cycle run yet.
    Created,

    /// A cycle is sweeping the topology.
    Running,

    /// Sleeping between cycles of a timed run.
    Waiting,

    /// Shutdown signalled. Workers finish the message in hand and stop.
    ShuttingDown,

    /// Run finished. Safe to drop.
    Stopped,

    /// A worker panicked. No further cycles run.
    Failed,
}

impl EngineState {
    /// Whether another cycle may start from this state.
    pub fn can_run(self) -> bool {
        matches!(self, Self::Created | Self::Running | Self::Waiting)
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Created => write!(f, "Created"),
            EngineState::Running => write!(f, "Running"),
            EngineState::Waiting => write!(f, "Waiting"),
            EngineState::ShuttingDown => write!(f, "ShuttingDown"),
            EngineState::Stopped => write!(f, "Stopped"),
            EngineState::Failed => write!(f, "Failed"),
        }
    }
}

/// Point-in-time engine status for monitoring.
///
/// Built from cached counters and watch channels; no broker I/O.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub state: EngineState,

    /// Engine can run (or is running) cycles.
    pub ready: bool,

    /// Ready and no message has failed so far in this run.
    pub healthy: bool,

    pub cycles_completed: u64,

    /// Run totals so far.
    pub totals: ReplicationStats,

    /// Sends rejected by open destination circuits.
    pub circuit_rejections: u64,

    /// Free worker slots in the bulkhead.
    pub available_workers: usize,
}

/// Where a single source message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Received,
    Transformed,
    Sent,
    Acknowledged,
    TransformFailed,
    SendFailed,
    Abandoned,
    Skipped,
}

impl MessageState {
    /// Terminal states settle the source message one way or the other.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Acknowledged | Self::Abandoned | Self::Skipped)
    }
}

impl std::fmt::Display for MessageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageState::Received => "received",
            MessageState::Transformed => "transformed",
            MessageState::Sent => "sent",
            MessageState::Acknowledged => "acknowledged",
            MessageState::TransformFailed => "transform_failed",
            MessageState::SendFailed => "send_failed",
            MessageState::Abandoned => "abandoned",
            MessageState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Result of running one source message through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Sent to the destination. `settled` is false when the completion
    /// call itself failed and the broker will redeliver.
    Replicated { settled: bool },

    /// Already carried the loop-prevention marker; completed without sending.
    Skipped,

    /// Transform or send failed and the source message was abandoned.
    Failed {
        stage: MessageState,
        category: ErrorCategory,
    },
}

impl MessageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replicated { .. } => "replicated",
            Self::Skipped => "skipped",
            Self::Failed { .. } => "failed",
        }
    }

    /// Last state the message reached. A replica whose completion failed
    /// stays `Sent` until the broker redelivers it.
    pub fn final_state(&self) -> MessageState {
        match self {
            Self::Replicated { settled: true } => MessageState::Acknowledged,
            Self::Replicated { settled: false } => MessageState::Sent,
            Self::Skipped => MessageState::Skipped,
            Self::Failed { .. } => MessageState::Abandoned,
        }
    }

    /// Authentication failures will hit every later send the same way.
    pub fn aborts_subscription(&self) -> bool {
        matches!(
            self,
            Self::Failed {
                category: ErrorCategory::Authentication,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_state_display() {
        assert_eq!(EngineState::Created.to_string(), "Created");
        assert_eq!(EngineState::Running.to_string(), "Running");
        assert_eq!(EngineState::Waiting.to_string(), "Waiting");
        assert_eq!(EngineState::ShuttingDown.to_string(), "ShuttingDown");
        assert_eq!(EngineState::Stopped.to_string(), "Stopped");
        assert_eq!(EngineState::Failed.to_string(), "Failed");
    }

    #[test]
    fn test_engine_state_can_run() {
        assert!(EngineState::Created.can_run());
        assert!(EngineState::Waiting.can_run());
        assert!(!EngineState::ShuttingDown.can_run());
        assert!(!EngineState::Stopped.can_run());
        assert!(!EngineState::Failed.can_run());
    }

    #[test]
    fn test_message_state_terminal() {
        assert!(MessageState::Acknowledged.is_terminal());
        assert!(MessageState::Abandoned.is_terminal());
        assert!(MessageState::Skipped.is_terminal());
        assert!(!MessageState::Sent.is_terminal());
        assert!(!MessageState::SendFailed.is_terminal());
        assert_eq!(MessageState::TransformFailed.to_string(), "transform_failed");
    }

    #[test]
    fn test_outcome_tags() {
        assert_eq!(MessageOutcome::Replicated { settled: true }.as_str(), "replicated");
        assert_eq!(MessageOutcome::Skipped.as_str(), "skipped");
        let failed = MessageOutcome::Failed {
            stage: MessageState::SendFailed,
            category: ErrorCategory::ServiceRequest,
        };
        assert_eq!(failed.as_str(), "failed");
        assert!(!failed.aborts_subscription());
    }

    #[test]
    fn test_outcome_final_state() {
        assert_eq!(
            MessageOutcome::Replicated { settled: true }.final_state(),
            MessageState::Acknowledged
        );
        assert_eq!(
            MessageOutcome::Replicated { settled: false }.final_state(),
            MessageState::Sent
        );
        assert_eq!(MessageOutcome::Skipped.final_state(), MessageState::Skipped);
        let failed = MessageOutcome::Failed {
            stage: MessageState::TransformFailed,
            category: ErrorCategory::Unexpected,
        };
        assert_eq!(failed.final_state(), MessageState::Abandoned);
        assert!(failed.final_state().is_terminal());
        assert!(!MessageOutcome::Replicated { settled: false }.final_state().is_terminal());
    }

    #[test]
    fn test_authentication_failure_aborts_subscription() {
        let outcome = MessageOutcome::Failed {
            stage: MessageState::SendFailed,
            category: ErrorCategory::Authentication,
        };
        assert!(outcome.aborts_subscription());
    }
}
