//! Prometheus metrics for the notification pipeline

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, TextEncoder};

/// Latency buckets in seconds
const LATENCY_BUCKETS: &[f64] = &[0.010, 0.050, 0.1, 0.5, 1.0, 2.0, 5.0];

/// All notifier metrics, in their own registry
pub struct Metrics {
    enabled: bool,
    registry: Registry,

    /// Whole consume_message call (by success, error)
    pub notification_event: HistogramVec,

    /// One message (by success, action)
    pub process_msg: HistogramVec,

    /// One callback delivery (by success, from, dest, action, status)
    pub delivery: HistogramVec,

    /// Fulfilment re-emission (by success)
    pub transfer_fulfil: HistogramVec,

    /// Prepare entered the API → notification processed
    pub tx_transfer_prepare: HistogramVec,

    /// Fulfil entered the API → notification processed
    pub tx_transfer_fulfil: HistogramVec,

    /// Prepare entered the API → fulfil notification processed
    pub tx_transfer: HistogramVec,

    /// Offset acknowledgements that failed
    pub commit_failures: IntCounter,
}

fn histogram(name: &str, help: &str, labels: &[&str]) -> prometheus::Result<HistogramVec> {
    HistogramVec::new(
        HistogramOpts::new(name, help).buckets(LATENCY_BUCKETS.to_vec()),
        labels,
    )
}

impl Metrics {
    /// Build and register all metrics. With `enabled == false` every
    /// observation is dropped.
    pub fn new(enabled: bool) -> prometheus::Result<Self> {
        let registry = Registry::new();

        let metrics = Self {
            enabled,
            notification_event: histogram(
                "notification_event",
                "Consume a notification event batch",
                &["success", "error"],
            )?,
            process_msg: histogram(
                "notification_event_process_msg",
                "Process a single notification event message",
                &["success", "action"],
            )?,
            delivery: histogram(
                "notification_event_delivery",
                "Deliver a callback to an FSP",
                &["success", "from", "dest", "action", "status"],
            )?,
            transfer_fulfil: histogram(
                "transfer_fulfil",
                "Produce a transfer fulfil event",
                &["success"],
            )?,
            tx_transfer_prepare: histogram(
                "tx_transfer_prepare",
                "Transfer prepare end-to-end latency",
                &["success"],
            )?,
            tx_transfer_fulfil: histogram(
                "tx_transfer_fulfil",
                "Transfer fulfil end-to-end latency",
                &["success"],
            )?,
            tx_transfer: histogram(
                "tx_transfer",
                "Transfer prepare to fulfil round-trip latency",
                &["success"],
            )?,
            commit_failures: IntCounter::with_opts(Opts::new(
                "notification_commit_failures_total",
                "Offset acknowledgements that failed",
            ))?,
            registry,
        };

        for collector in [
            &metrics.notification_event,
            &metrics.process_msg,
            &metrics.delivery,
            &metrics.transfer_fulfil,
            &metrics.tx_transfer_prepare,
            &metrics.tx_transfer_fulfil,
            &metrics.tx_transfer,
        ] {
            metrics.registry.register(Box::new(collector.clone()))?;
        }
        metrics
            .registry
            .register(Box::new(metrics.commit_failures.clone()))?;

        Ok(metrics)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn record_event(&self, success: bool, error: &str, seconds: f64) {
        if self.enabled {
            self.notification_event
                .with_label_values(&[bool_label(success), error])
                .observe(seconds);
        }
    }

    pub fn record_process(&self, success: bool, action: &str, seconds: f64) {
        if self.enabled {
            self.process_msg
                .with_label_values(&[bool_label(success), action])
                .observe(seconds);
        }
    }

    pub fn record_delivery(
        &self,
        success: bool,
        from: &str,
        dest: &str,
        action: &str,
        status: &str,
        seconds: f64,
    ) {
        if self.enabled {
            self.delivery
                .with_label_values(&[bool_label(success), from, dest, action, status])
                .observe(seconds);
        }
    }

    pub fn record_transfer_fulfil(&self, success: bool, seconds: f64) {
        if self.enabled {
            self.transfer_fulfil
                .with_label_values(&[bool_label(success)])
                .observe(seconds);
        }
    }

    /// Observe end-to-end latency from the API checkpoints (unix ms).
    pub fn record_transaction(
        &self,
        prepare_ms: Option<i64>,
        fulfil_ms: Option<i64>,
        now_ms: i64,
        success: bool,
    ) {
        if !self.enabled {
            return;
        }
        let label = [bool_label(success)];
        let since = |start: i64| (now_ms - start).max(0) as f64 / 1000.0;

        match (prepare_ms, fulfil_ms) {
            (Some(prepare), None) => self
                .tx_transfer_prepare
                .with_label_values(&label)
                .observe(since(prepare)),
            (prepare, Some(fulfil)) => {
                self.tx_transfer_fulfil
                    .with_label_values(&label)
                    .observe(since(fulfil));
                if let Some(prepare) = prepare {
                    self.tx_transfer
                        .with_label_values(&label)
                        .observe(since(prepare));
                }
            }
            (None, None) => {}
        }
    }

    pub fn record_commit_failure(&self) {
        if self.enabled {
            self.commit_failures.inc();
        }
    }

    pub fn commit_failures(&self) -> u64 {
        self.commit_failures.get()
    }

    /// Total number of observations across all series of a histogram.
    pub fn sample_count(&self, name: &str) -> u64 {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == name)
            .flat_map(|family| family.get_metric())
            .map(|m| m.get_histogram().get_sample_count())
            .sum()
    }

    /// Prometheus text exposition of the registry.
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

fn bool_label(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_and_exposes() {
        let metrics = Metrics::new(true).unwrap();
        metrics.record_process(true, "prepare", 0.02);
        metrics.record_delivery(true, "dfspA", "dfspB", "prepare", "success", 0.01);

        assert_eq!(metrics.sample_count("notification_event_process_msg"), 1);
        assert_eq!(metrics.sample_count("notification_event_delivery"), 1);

        let text = metrics.gather();
        assert!(text.contains("notification_event_delivery_count"));
        assert!(text.contains("dest=\"dfspB\""));
    }

    #[test]
    fn test_transaction_series() {
        let metrics = Metrics::new(true).unwrap();
        metrics.record_transaction(Some(1_000), None, 1_500, true);
        assert_eq!(metrics.sample_count("tx_transfer_prepare"), 1);
        assert_eq!(metrics.sample_count("tx_transfer"), 0);

        metrics.record_transaction(Some(1_000), Some(1_200), 1_500, true);
        assert_eq!(metrics.sample_count("tx_transfer_fulfil"), 1);
        assert_eq!(metrics.sample_count("tx_transfer"), 1);

        metrics.record_transaction(None, None, 1_500, true);
        assert_eq!(metrics.sample_count("tx_transfer_prepare"), 1);
    }

    #[test]
    fn test_disabled_drops_observations() {
        let metrics = Metrics::new(false).unwrap();
        metrics.record_event(false, "validation", 0.1);
        metrics.record_commit_failure();
        assert_eq!(metrics.sample_count("notification_event"), 0);
        assert_eq!(metrics.commit_failures(), 0);
    }
}
