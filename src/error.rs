//! Error types for Finger Flux

use thiserror::Error;

/// Errors raised at the boundaries of the pipeline.
///
/// The per-cycle stages never fail; these only come out of configuration,
/// reconfiguration, device attach and record parsing.
#[derive(Debug, Error)]
pub enum FluxError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Channel index out of range: {0}")]
    ChannelOutOfRange(usize),

    #[error("Orientation device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Failed to parse record: {0}")]
    ParseError(String),

    #[error("Invalid record: {0}")]
    Validation(String),
}
