//! Dispatcher dependencies (using traits for testability)
//!
//! Handlers receive everything they touch through [`NotifierDeps`], so tests
//! swap the production collaborators for the recording ones in
//! `test_dependencies`.

use std::sync::Arc;

use fspiop::Signer;

use crate::kernel::{CallbackTransport, EndpointLookup, EventProducer};
use crate::metrics::Metrics;
use crate::span::SpanCorrelator;

/// Values the handlers read but never change.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Fulfilment value placed in re-emitted fulfil payloads.
    pub fulfilment: String,
    /// Topic the fulfil events are produced to.
    pub fulfil_topic: String,
    /// Log full message bodies at debug.
    pub log_payloads: bool,
}

#[derive(Clone)]
pub struct NotifierDeps {
    pub endpoints: Arc<dyn EndpointLookup>,
    pub transport: Arc<dyn CallbackTransport>,
    pub producer: Arc<dyn EventProducer>,
    pub signer: Arc<dyn Signer>,
    pub metrics: Arc<Metrics>,
    pub correlator: SpanCorrelator,
    pub settings: DispatchSettings,
}

impl NotifierDeps {
    pub fn new(
        endpoints: Arc<dyn EndpointLookup>,
        transport: Arc<dyn CallbackTransport>,
        producer: Arc<dyn EventProducer>,
        signer: Arc<dyn Signer>,
        metrics: Arc<Metrics>,
        correlator: SpanCorrelator,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            endpoints,
            transport,
            producer,
            signer,
            metrics,
            correlator,
            settings,
        }
    }
}
