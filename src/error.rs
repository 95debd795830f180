use thiserror::Error;

/// Errors surfaced by the fusion library.
///
/// Noisy or malformed sensor data is never an error here; it is dropped and
/// reported as a [`crate::sensor_fusion::FusionEvent`] instead.
#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FusionError>;
