pub mod aggregator;
pub mod model;
pub mod style;

pub use aggregator::SnapshotAggregator;
pub use model::{TrafficSnapshot, DEFAULT_STATUS, DEFAULT_TEXT, KNOWN_CLASSES};
pub use style::{classify, StatusStyle};
