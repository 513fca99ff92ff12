use schema_rpc_protocol::{SchemaError, ValueError};
use thiserror::Error;

/// Result type for server setup and transport operations
pub type Result<T> = std::result::Result<T, HttpRpcError>;

/// Errors raised while building or running a server
#[derive(Debug, Error)]
pub enum HttpRpcError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("'{class}' is not a service class")]
    NotAService { class: String },

    #[error("No handler registered for {class}.{method}")]
    MissingHandler { class: String, method: String },

    #[error("{class} has no method '{method}'")]
    UnknownMethod { class: String, method: String },

    #[error("Schema declares ServerOnlyContext but no context extractor was registered")]
    MissingContextExtractor,
}

/// Error returned by a method handler or context extractor.
///
/// `Raised` carries an exception kind. It reaches the caller under that name
/// only when the method declares the kind in its `throws` list; anything else
/// is reported as an internal server error.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("{kind}: {message}")]
    Raised {
        kind: String,
        message: String,
        stack: Option<String>,
    },

    #[error("{message}")]
    Internal {
        message: String,
        stack: Option<String>,
    },
}

impl HandlerError {
    /// Raise an exception of the given kind
    pub fn raise(kind: impl Into<String>, message: impl Into<String>) -> Self {
        HandlerError::Raised {
            kind: kind.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        HandlerError::Internal {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(self, trace: impl Into<String>) -> Self {
        let trace = Some(trace.into());
        match self {
            HandlerError::Raised { kind, message, .. } => HandlerError::Raised {
                kind,
                message,
                stack: trace,
            },
            HandlerError::Internal { message, .. } => HandlerError::Internal {
                message,
                stack: trace,
            },
        }
    }

    pub fn kind(&self) -> Option<&str> {
        match self {
            HandlerError::Raised { kind, .. } => Some(kind),
            HandlerError::Internal { .. } => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            HandlerError::Raised { message, .. } | HandlerError::Internal { message, .. } => message,
        }
    }

    pub fn stack(&self) -> Option<&str> {
        match self {
            HandlerError::Raised { stack, .. } | HandlerError::Internal { stack, .. } => stack.as_deref(),
        }
    }
}

impl From<ValueError> for HandlerError {
    fn from(err: ValueError) -> Self {
        HandlerError::internal(err.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::internal(err.to_string())
    }
}
