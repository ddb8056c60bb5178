use thiserror::Error;

/// Error taxonomy for the peer connection and ICE signaling core, grouped by
/// kind rather than by call site so callers can match on the failure class
/// instead of threading per-function error enums through every layer.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("allocation failure: {0}")]
    Memory(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("buffer overflow: {0}")]
    BufferOverflow(String),

    #[error("library not initialized: {0}")]
    Init(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
