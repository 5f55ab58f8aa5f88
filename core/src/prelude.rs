use crate::channel::codec::CodecError;

/// Event name the vision backend pushes traffic readings under.
pub const VEHICLE_DATA_EVENT: &str = "vehicle_data";

/// Common error type for the ingestion boundary.
///
/// Only connection-level problems are errors. Malformed telemetry is patched
/// with defaults by the aggregator and never reaches this type.
#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("invalid endpoint {0}")]
    InvalidEndpoint(String),
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("protocol error: {0}")]
    Protocol(#[from] CodecError),
    #[error("namespace connect rejected: {0}")]
    ConnectRejected(String),
    #[error("connection closed by server")]
    Closed,
    #[error("server ended the session")]
    ServerDisconnect,
    #[error("not connected")]
    NotConnected,
    #[error("gave up reconnecting after {0} attempts")]
    ReconnectExhausted(u32),
}

pub type IngestResult<T> = Result<T, IngestError>;
