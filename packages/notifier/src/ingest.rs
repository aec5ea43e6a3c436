//! The ingestion loop: fetch a batch, hand it to the handler, repeat.
//!
//! Shutdown is observed only between batches. A batch that has been fetched
//! is always processed to the end.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::envelope::LogMessage;
use crate::error::NotifierError;
use crate::handler::{consume_message, DispatcherContext};

/// A durable log the notifier consumes from.
#[async_trait]
pub trait MessageSource: Send + Sync {
    fn topic(&self) -> &str;

    /// Next batch of records; empty when nothing arrived before the fetch
    /// timeout.
    async fn next_batch(&self) -> Result<Vec<LogMessage>, NotifierError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub batches: u64,
    pub messages: u64,
    /// Batches with at least one failed message.
    pub failed_batches: u64,
    pub read_errors: u64,
}

pub struct IngestionLoop {
    source: Arc<dyn MessageSource>,
    ctx: Arc<DispatcherContext>,
    shutdown: watch::Receiver<bool>,
    error_backoff: Duration,
}

impl IngestionLoop {
    pub fn new(
        source: Arc<dyn MessageSource>,
        ctx: Arc<DispatcherContext>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            ctx,
            shutdown,
            error_backoff: Duration::from_secs(1),
        }
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub async fn run(mut self) -> IngestStats {
        let mut stats = IngestStats::default();
        info!(topic = %self.source.topic(), "ingestion loop started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let batch = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                batch = self.source.next_batch() => batch,
            };

            match batch {
                Ok(messages) if messages.is_empty() => continue,
                Ok(messages) => {
                    stats.batches += 1;
                    stats.messages += messages.len() as u64;
                    debug!(count = messages.len(), "batch received");
                    if let Ok(false) = consume_message(&self.ctx, Ok(messages)).await {
                        stats.failed_batches += 1;
                    }
                }
                Err(e) => {
                    stats.read_errors += 1;
                    if let Err(e) = consume_message(&self.ctx, Err(e)).await {
                        warn!(error = %e, backoff_ms = self.error_backoff.as_millis() as u64, "batch read failed, backing off");
                    }
                    tokio::select! {
                        _ = self.shutdown.changed() => break,
                        _ = tokio::time::sleep(self.error_backoff) => {}
                    }
                }
            }
        }

        if stats.read_errors > 0 {
            warn!(read_errors = stats.read_errors, "ingestion loop saw read errors");
        }
        info!(
            batches = stats.batches,
            messages = stats.messages,
            failed_batches = stats.failed_batches,
            "ingestion loop stopped"
        );
        stats
    }
}
