//! Telemetry ingestion core for the MetroPulse traffic dashboard.
//!
//! The modules cover the live boundary between the dashboard and the external
//! vision backend: an event channel client, an MJPEG stream viewer and the
//! aggregator that turns raw payloads into display-ready snapshots.

pub mod auth;
pub mod channel;
pub mod config;
pub mod prelude;
pub mod snapshot;
pub mod stream;
pub mod telemetry;

pub use prelude::{IngestError, IngestResult};
