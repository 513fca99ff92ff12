//! Error types for RPC client operations

use schema_rpc_protocol::{CoerceError, SchemaError, ValueError, Violation};
use schema_rpc_wire::WireError;
use thiserror::Error;

/// Result type for RPC client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Everything a call can fail with.
///
/// `Declared` is the only variant carrying an exception of the service; its
/// `kind` is one of the names in the method's `throws` list. Any other
/// server failure collapses into `Internal`. Failures that did not come from
/// a conforming server are `Transport` or `Status`.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The server rejected the arguments or context
    #[error("Call to '{method}' failed validation ({} violations)", .errors.len())]
    Validation { method: String, errors: Vec<Violation> },

    #[error("Method not supported: {0}")]
    MethodNotSupported(String),

    /// A declared exception raised by the handler
    #[error("{kind}: {message}")]
    Declared {
        kind: String,
        message: String,
        stack: Option<String>,
    },

    #[error("Internal server error: {message}")]
    Internal { message: String, stack: Option<String> },

    /// A response that does not follow the error body format
    #[error("Unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Connection error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Return value of '{method}' failed validation ({} violations)", .errors.len())]
    InvalidResponse { method: String, errors: Vec<Violation> },

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Coercion error: {0}")]
    Coerce(#[from] CoerceError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Value error: {0}")]
    Value(#[from] ValueError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Name of the declared exception, if this is one
    pub fn declared_kind(&self) -> Option<&str> {
        match self {
            Self::Declared { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Whether the failure happened below the RPC protocol
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Status { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_kind() {
        let err = ClientError::Declared {
            kind: "RuntimeError".to_string(),
            message: "heh".to_string(),
            stack: None,
        };
        assert_eq!(err.declared_kind(), Some("RuntimeError"));
        assert_eq!(err.to_string(), "RuntimeError: heh");
        assert!(!err.is_transport());
    }

    #[test]
    fn test_status_is_transport() {
        let err = ClientError::Status {
            status: 502,
            body: "Bad Gateway".to_string(),
        };
        assert!(err.is_transport());
        assert_eq!(err.declared_kind(), None);
    }
}
