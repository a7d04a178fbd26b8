//! Error taxonomy for the frame bus core.
//!
//! `ResourceExists` from the design is deliberately absent here: a stale
//! named resource found at init time is recovered internally (unlink and
//! retry) and never reaches a caller.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameBusError {
    #[error("payload length {actual} does not match declared frame size {expected} bytes")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("unsupported dtype: {0}")]
    UnsupportedDtype(String),

    #[error("subscriber registration lost for '{0}'")]
    RegistrationLost(String),

    #[error("control channel closed: {0}")]
    ChannelClosed(String),

    #[error("timed out waiting for resource '{0}' to appear")]
    Timeout(String),

    #[error("invalid metadata record: {0}")]
    InvalidMetadata(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FrameBusError>;
