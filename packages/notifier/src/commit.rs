//! Offset acknowledgement.
//!
//! In manual mode every message is acknowledged once its processing attempt
//! completes, whether it succeeded or not. A failed acknowledgement is logged
//! and counted; it never fails the message.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::envelope::LogMessage;
use crate::error::NotifierError;
use crate::metrics::Metrics;

/// Acknowledges one record back to the log.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<(), NotifierError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// The log client commits on its own.
    Auto,
    /// Acknowledge after each processing attempt.
    Manual,
}

impl CommitMode {
    pub fn from_auto_commit(auto_commit: bool) -> Self {
        if auto_commit {
            CommitMode::Auto
        } else {
            CommitMode::Manual
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Auto mode, nothing to do.
    Skipped,
    Failed(String),
}

#[derive(Clone)]
pub struct CommitCoordinator {
    mode: CommitMode,
    metrics: Arc<Metrics>,
}

impl CommitCoordinator {
    pub fn new(mode: CommitMode, metrics: Arc<Metrics>) -> Self {
        Self { mode, metrics }
    }

    pub fn mode(&self) -> CommitMode {
        self.mode
    }

    pub async fn acknowledge(&self, message: &LogMessage) -> CommitOutcome {
        if self.mode == CommitMode::Auto {
            return CommitOutcome::Skipped;
        }

        let Some(acker) = message.acker() else {
            warn!(
                topic = %message.topic,
                offset = message.offset,
                "manual commit requested but message has no acknowledgement handle"
            );
            self.metrics.record_commit_failure();
            return CommitOutcome::Failed("no acknowledgement handle".to_string());
        };

        match acker.ack().await {
            Ok(()) => {
                debug!(topic = %message.topic, offset = message.offset, "offset committed");
                CommitOutcome::Committed
            }
            Err(e) => {
                warn!(
                    topic = %message.topic,
                    offset = message.offset,
                    error = %e,
                    "failed to commit offset"
                );
                self.metrics.record_commit_failure();
                CommitOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::RecordingAcker;
    use serde_json::json;

    fn message_with(acker: Arc<RecordingAcker>) -> LogMessage {
        LogMessage::from_value("topic-notification-event", 4, json!({})).with_acker(acker)
    }

    #[tokio::test]
    async fn test_manual_mode_acknowledges() {
        let metrics = Arc::new(Metrics::new(true).unwrap());
        let coordinator = CommitCoordinator::new(CommitMode::Manual, metrics.clone());
        let acker = Arc::new(RecordingAcker::new());

        let outcome = coordinator.acknowledge(&message_with(acker.clone())).await;
        assert_eq!(outcome, CommitOutcome::Committed);
        assert_eq!(acker.ack_count(), 1);
        assert_eq!(metrics.commit_failures(), 0);
    }

    #[tokio::test]
    async fn test_auto_mode_never_acknowledges() {
        let metrics = Arc::new(Metrics::new(true).unwrap());
        let coordinator = CommitCoordinator::new(CommitMode::Auto, metrics);
        let acker = Arc::new(RecordingAcker::new());

        let outcome = coordinator.acknowledge(&message_with(acker.clone())).await;
        assert_eq!(outcome, CommitOutcome::Skipped);
        assert_eq!(acker.ack_count(), 0);
    }

    #[tokio::test]
    async fn test_ack_failure_is_counted_not_raised() {
        let metrics = Arc::new(Metrics::new(true).unwrap());
        let coordinator = CommitCoordinator::new(CommitMode::Manual, metrics.clone());
        let acker = Arc::new(RecordingAcker::failing());

        let outcome = coordinator.acknowledge(&message_with(acker.clone())).await;
        assert!(matches!(outcome, CommitOutcome::Failed(_)));
        assert_eq!(acker.ack_count(), 1);
        assert_eq!(metrics.commit_failures(), 1);
    }
}
