pub mod metrics;

pub use metrics::{IngestMetrics, MetricsRecorder};
