// TestDependencies - recording implementations for testing
//
// Provides collaborators that can be injected into NotifierDeps for tests.
// Each one records its calls so tests can assert on side effects.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fspiop::{EndpointType, Signer, StaticSigner};
use serde_json::Value;

use super::{
    CallbackTransport, DeliveryReceipt, DispatchSettings, EndpointLookup, EventProducer,
    NotifierDeps, OutboundRequest,
};
use crate::commit::Acknowledge;
use crate::envelope::LogMessage;
use crate::error::NotifierError;
use crate::ingest::MessageSource;
use crate::metrics::Metrics;
use crate::span::{RecordingSpanExporter, SpanCorrelator, TraceSpan, DEFAULT_TRACESTATE_VENDOR};

pub const TEST_FULFIL_TOPIC: &str = "topic-transfer-fulfil";
pub const TEST_FULFILMENT: &str = "UNlJ98hZTY_dsw0cAqw4i_UN3v4utt7CZFB4yfLbVFA";

// =============================================================================
// Mock Endpoint Lookup
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupCall {
    pub fsp: String,
    pub endpoint_type: EndpointType,
    pub transfer_id: String,
}

#[derive(Default)]
pub struct MockEndpointLookup {
    endpoints: Mutex<HashMap<(String, EndpointType), String>>,
    calls: Mutex<Vec<LookupCall>>,
}

impl MockEndpointLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a URL template (`{{transferId}}` is rendered).
    pub fn with_endpoint(self, fsp: &str, endpoint_type: EndpointType, url: &str) -> Self {
        self.endpoints
            .lock()
            .unwrap()
            .insert((fsp.to_string(), endpoint_type), url.to_string());
        self
    }

    pub fn calls(&self) -> Vec<LookupCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EndpointLookup for MockEndpointLookup {
    async fn get_endpoint(
        &self,
        fsp: &str,
        endpoint_type: EndpointType,
        transfer_id: &str,
        _span: &TraceSpan,
    ) -> Result<String, NotifierError> {
        self.calls.lock().unwrap().push(LookupCall {
            fsp: fsp.to_string(),
            endpoint_type,
            transfer_id: transfer_id.to_string(),
        });

        self.endpoints
            .lock()
            .unwrap()
            .get(&(fsp.to_string(), endpoint_type))
            .map(|url| url.replace("{{transferId}}", transfer_id))
            .ok_or_else(|| NotifierError::lookup(fsp, endpoint_type, "no endpoint registered"))
    }
}

// =============================================================================
// Recording Transport
// =============================================================================

#[derive(Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<OutboundRequest>>,
    fail_with: Mutex<Option<u16>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request with a non-2xx status.
    pub fn failing(status: u16) -> Self {
        let transport = Self::default();
        *transport.fail_with.lock().unwrap() = Some(status);
        transport
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallbackTransport for RecordingTransport {
    async fn send(&self, request: OutboundRequest) -> Result<DeliveryReceipt, NotifierError> {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);
        match *self.fail_with.lock().unwrap() {
            Some(status) => Err(NotifierError::delivery(format!(
                "callback to {} answered {}",
                url, status
            ))),
            None => Ok(DeliveryReceipt { status: 202 }),
        }
    }
}

// =============================================================================
// Recording Producer
// =============================================================================

#[derive(Debug, Clone)]
pub struct ProducedEvent {
    pub topic: String,
    pub message: Value,
}

#[derive(Default)]
pub struct RecordingProducer {
    produced: Mutex<Vec<ProducedEvent>>,
    fail: bool,
}

impl RecordingProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn produced(&self) -> Vec<ProducedEvent> {
        self.produced.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventProducer for RecordingProducer {
    async fn produce(&self, topic: &str, message: &Value) -> Result<(), NotifierError> {
        if self.fail {
            return Err(NotifierError::delivery(format!("publish to {} failed", topic)));
        }
        self.produced.lock().unwrap().push(ProducedEvent {
            topic: topic.to_string(),
            message: message.clone(),
        });
        Ok(())
    }
}

// =============================================================================
// Recording Acker
// =============================================================================

#[derive(Default)]
pub struct RecordingAcker {
    acks: AtomicUsize,
    fail: bool,
}

impl RecordingAcker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn ack_count(&self) -> usize {
        self.acks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Acknowledge for RecordingAcker {
    async fn ack(&self) -> Result<(), NotifierError> {
        self.acks.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(NotifierError::internal("broker rejected ack"));
        }
        Ok(())
    }
}

// =============================================================================
// Scripted Source
// =============================================================================

/// Hands out pre-loaded batches, then empty ones.
#[derive(Default)]
pub struct ScriptedSource {
    batches: Mutex<VecDeque<Result<Vec<LogMessage>, NotifierError>>>,
    fetches: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch(self, batch: Vec<LogMessage>) -> Self {
        self.batches.lock().unwrap().push_back(Ok(batch));
        self
    }

    pub fn with_error(self, err: NotifierError) -> Self {
        self.batches.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    fn topic(&self) -> &str {
        "topic-notification-event"
    }

    async fn next_batch(&self) -> Result<Vec<LogMessage>, NotifierError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let next = self.batches.lock().unwrap().pop_front();
        match next {
            Some(batch) => batch,
            None => {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                Ok(Vec::new())
            }
        }
    }
}

// =============================================================================
// TestDependencies
// =============================================================================

/// Builder for NotifierDeps wired with recording collaborators.
pub struct TestDependencies {
    pub endpoints: Arc<MockEndpointLookup>,
    pub transport: Arc<RecordingTransport>,
    pub producer: Arc<RecordingProducer>,
    pub signer: Arc<dyn Signer>,
    pub metrics: Arc<Metrics>,
    pub spans: Arc<RecordingSpanExporter>,
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            endpoints: Arc::new(MockEndpointLookup::new()),
            transport: Arc::new(RecordingTransport::new()),
            producer: Arc::new(RecordingProducer::new()),
            signer: Arc::new(StaticSigner::new("test-signature")),
            metrics: Arc::new(Metrics::new(true).expect("register metrics")),
            spans: Arc::new(RecordingSpanExporter::new()),
        }
    }

    pub fn endpoints(mut self, endpoints: MockEndpointLookup) -> Self {
        self.endpoints = Arc::new(endpoints);
        self
    }

    pub fn transport(mut self, transport: RecordingTransport) -> Self {
        self.transport = Arc::new(transport);
        self
    }

    pub fn producer(mut self, producer: RecordingProducer) -> Self {
        self.producer = Arc::new(producer);
        self
    }

    pub fn signer(mut self, signer: impl Signer + 'static) -> Self {
        self.signer = Arc::new(signer);
        self
    }

    pub fn into_deps(&self) -> NotifierDeps {
        NotifierDeps::new(
            self.endpoints.clone(),
            self.transport.clone(),
            self.producer.clone(),
            self.signer.clone(),
            self.metrics.clone(),
            SpanCorrelator::new("notifier-test", DEFAULT_TRACESTATE_VENDOR, self.spans.clone()),
            DispatchSettings {
                fulfilment: TEST_FULFILMENT.to_string(),
                fulfil_topic: TEST_FULFIL_TOPIC.to_string(),
                log_payloads: true,
            },
        )
    }
}
