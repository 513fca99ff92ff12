//! Error types for wire encoding and decoding

use schema_rpc_protocol::{StreamError, ValueError};
use thiserror::Error;

/// Result type for wire operations
pub type WireResult<T> = Result<T, WireError>;

/// Boxed error accepted from body streams
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures of a flow-controlled pipe
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipeError {
    /// The writer aborted, or went away without closing
    #[error("Pipe aborted: {0}")]
    Aborted(String),

    /// The reader was dropped, nobody will consume further writes
    #[error("Pipe reader has gone away")]
    ReaderGone,

    /// Write after `close()`
    #[error("Pipe is closed for writing")]
    Closed,
}

impl From<PipeError> for StreamError {
    fn from(err: PipeError) -> Self {
        match err {
            PipeError::Aborted(reason) => StreamError::Aborted(reason),
            other => StreamError::Aborted(other.to_string()),
        }
    }
}

/// Errors raised while encoding or decoding a wire message
#[derive(Error, Debug)]
pub enum WireError {
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Multipart message has no '{}' part", crate::codec::BODY_PART)]
    MissingBodyPart,

    #[error("Message body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Multipart error: {0}")]
    Multipart(#[from] multer::Error),

    #[error("Failed to read message body: {0}")]
    Body(String),

    #[error("Attached stream failed: {0}")]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Value(#[from] ValueError),
}

impl WireError {
    /// Wrap a failure of the underlying body stream
    pub fn body<E: Into<BoxError>>(err: E) -> Self {
        let err: BoxError = err.into();
        WireError::Body(err.to_string())
    }
}
