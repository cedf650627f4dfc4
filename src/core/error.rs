//! Error types for fedsync.

use thiserror::Error;

/// Result type alias for fedsync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating distributed training.
#[derive(Error, Debug)]
pub enum Error {
    // Session errors
    #[error("No initial download received within {0:?}")]
    ConnectionTimeout(std::time::Duration),

    #[error("Upload was not acknowledged within {0:?}")]
    UploadTimeout(std::time::Duration),

    #[error("Channel to peer closed")]
    ChannelClosed,

    #[error("Protocol violation: {0}")]
    Protocol(String),

    // Codec errors
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid serialized variable: {0}")]
    InvalidVariable(String),

    // Aggregation errors
    #[error("Unsupported aggregation: {0}")]
    UnsupportedAggregation(String),

    // Configuration errors
    #[error("Unrecognized option \"{0}\"")]
    UnrecognizedOption(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Model errors
    #[error("Training failed: {0}")]
    Training(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Snapshot {version} is corrupt: {reason}")]
    CorruptSnapshot { version: String, reason: String },

    // Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(err: ndarray::ShapeError) -> Self {
        Error::ShapeMismatch(err.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::DeserializationError(err.to_string())
    }
}

impl From<lz4_flex::block::DecompressError> for Error {
    fn from(err: lz4_flex::block::DecompressError) -> Self {
        Error::DeserializationError(err.to_string())
    }
}
