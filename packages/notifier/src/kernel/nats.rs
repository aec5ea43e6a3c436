//! NATS JetStream as the durable log.
//!
//! Each topic is a subject captured by a stream of the same (sanitized)
//! name. Notifications are read through a durable pull consumer;
//! acknowledgement is explicit in manual commit mode and disabled in auto
//! mode. Fulfil events are published with a broker ack.

use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{self, consumer, stream};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::commit::{Acknowledge, CommitMode};
use crate::envelope::LogMessage;
use crate::error::{BoxError, NotifierError};
use crate::ingest::MessageSource;
use crate::kernel::EventProducer;

/// Stream name for a topic: stream names may not contain `.`, `*`, `>` or spaces.
pub fn stream_name(topic: &str) -> String {
    topic
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' | ' ' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

async fn ensure_stream(js: &jetstream::Context, topic: &str) -> Result<stream::Stream, NotifierError> {
    let name = stream_name(topic);
    let stream = js
        .get_or_create_stream(stream::Config {
            name: name.clone(),
            subjects: vec![topic.to_string()],
            ..Default::default()
        })
        .await
        .map_err(|e| NotifierError::internal_from(format!("failed to ensure stream {}", name), e))?;
    debug!(stream = %name, topic = %topic, "stream ready");
    Ok(stream)
}

pub async fn connect(url: &str) -> Result<async_nats::Client, NotifierError> {
    let client = async_nats::connect(url)
        .await
        .map_err(|e| NotifierError::internal_from(format!("failed to connect to NATS at {}", url), e))?;
    info!(url = %url, "connected to NATS");
    Ok(client)
}

// =============================================================================
// Consumer
// =============================================================================

/// Explicit acknowledgement of one JetStream message.
pub struct JetStreamAck {
    message: jetstream::Message,
}

#[async_trait]
impl Acknowledge for JetStreamAck {
    async fn ack(&self) -> Result<(), NotifierError> {
        self.message
            .ack()
            .await
            .map_err(|e| NotifierError::internal_from("ack failed", e))
    }
}

pub struct JetStreamSource {
    topic: String,
    consumer: consumer::Consumer<consumer::pull::Config>,
    mode: CommitMode,
    batch_size: usize,
    fetch_timeout: Duration,
}

impl JetStreamSource {
    pub async fn new(
        js: &jetstream::Context,
        topic: &str,
        group: &str,
        mode: CommitMode,
        batch_size: usize,
        fetch_timeout: Duration,
    ) -> Result<Self, NotifierError> {
        let stream = ensure_stream(js, topic).await?;
        let durable = stream_name(&format!("{}-{}", group, topic));
        let ack_policy = match mode {
            CommitMode::Manual => consumer::AckPolicy::Explicit,
            CommitMode::Auto => consumer::AckPolicy::None,
        };

        let consumer = stream
            .get_or_create_consumer(
                &durable,
                consumer::pull::Config {
                    durable_name: Some(durable.clone()),
                    ack_policy,
                    deliver_policy: consumer::DeliverPolicy::All,
                    filter_subject: topic.to_string(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| NotifierError::internal_from(format!("failed to create consumer {}", durable), e))?;

        info!(topic = %topic, consumer = %durable, mode = ?mode, "consumer ready");
        Ok(Self {
            topic: topic.to_string(),
            consumer,
            mode,
            batch_size: batch_size.max(1),
            fetch_timeout,
        })
    }
}

#[async_trait]
impl MessageSource for JetStreamSource {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn next_batch(&self) -> Result<Vec<LogMessage>, NotifierError> {
        let mut batch = self
            .consumer
            .fetch()
            .max_messages(self.batch_size)
            .expires(self.fetch_timeout)
            .messages()
            .await
            .map_err(|e| NotifierError::internal_from("failed to fetch batch", e))?;

        let mode = self.mode;
        collect_batch(&mut batch, |message: jetstream::Message| {
            let offset = message.info().map(|i| i.stream_sequence).unwrap_or_default();
            let topic = message.subject.to_string();
            let payload = message.payload.clone();

            let log_message = LogMessage::new(topic, offset, payload);
            match mode {
                CommitMode::Manual => log_message.with_acker(Arc::new(JetStreamAck { message })),
                CommitMode::Auto => log_message,
            }
        })
        .await
    }
}

/// Drain one fetch. A read error after some messages arrived ends the batch
/// early and keeps what was read; the rest is left to the broker.
async fn collect_batch<S, T, E, F>(batch: &mut S, mut convert: F) -> Result<Vec<LogMessage>, NotifierError>
where
    S: Stream<Item = Result<T, E>> + Unpin,
    E: Into<BoxError>,
    F: FnMut(T) -> LogMessage,
{
    let mut messages = Vec::new();
    while let Some(next) = batch.next().await {
        match next {
            Ok(message) => messages.push(convert(message)),
            Err(e) if messages.is_empty() => {
                return Err(NotifierError::internal_from("failed to read message", e));
            }
            Err(e) => {
                let e: BoxError = e.into();
                warn!(error = %e, read = messages.len(), "batch read interrupted");
                break;
            }
        }
    }
    Ok(messages)
}

// =============================================================================
// Producer
// =============================================================================

pub struct JetStreamProducer {
    js: jetstream::Context,
}

impl JetStreamProducer {
    /// Make sure every topic produced to has a stream behind it.
    pub async fn new(js: jetstream::Context, topics: &[&str]) -> Result<Self, NotifierError> {
        for topic in topics {
            ensure_stream(&js, topic).await?;
        }
        Ok(Self { js })
    }
}

#[async_trait]
impl EventProducer for JetStreamProducer {
    async fn produce(&self, topic: &str, message: &Value) -> Result<(), NotifierError> {
        let payload = serde_json::to_vec(message)
            .map_err(|e| NotifierError::internal_from("failed to serialize event", e))?;

        let ack = self
            .js
            .publish(topic.to_string(), Bytes::from(payload))
            .await
            .map_err(|e| NotifierError::delivery_from(format!("publish to {} failed", topic), e))?
            .await
            .map_err(|e| NotifierError::delivery_from(format!("publish to {} not acknowledged", topic), e))?;

        debug!(topic = %topic, stream = %ack.stream, sequence = ack.sequence, "event produced");
        Ok(())
    }
}
