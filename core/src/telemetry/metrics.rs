use std::sync::Mutex;

/// Counters for one ingestion pipeline.
pub struct MetricsRecorder {
    inner: Mutex<IngestMetrics>,
}

/// Point-in-time copy of the ingestion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestMetrics {
    pub events_dispatched: u64,
    pub events_unhandled: u64,
    pub malformed_packets: u64,
    pub transport_failures: u64,
    pub frames_decoded: u64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(IngestMetrics::default()),
        }
    }

    pub fn record_event(&self) {
        self.with(|metrics| metrics.events_dispatched += 1);
    }

    pub fn record_unhandled(&self) {
        self.with(|metrics| metrics.events_unhandled += 1);
    }

    pub fn record_malformed(&self) {
        self.with(|metrics| metrics.malformed_packets += 1);
    }

    pub fn record_transport_failure(&self) {
        self.with(|metrics| metrics.transport_failures += 1);
    }

    pub fn record_frame(&self) {
        self.with(|metrics| metrics.frames_decoded += 1);
    }

    pub fn snapshot(&self) -> IngestMetrics {
        if let Ok(metrics) = self.inner.lock() {
            *metrics
        } else {
            IngestMetrics::default()
        }
    }

    fn with(&self, update: impl FnOnce(&mut IngestMetrics)) {
        if let Ok(mut metrics) = self.inner.lock() {
            update(&mut *metrics);
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
