//! Error bodies exchanged between client and server

use serde::{Deserialize, Serialize};

use crate::validate::Violation;

/// Name reported for any failure that is not a declared exception
pub const INTERNAL_SERVER_ERROR: &str = "InternalServerError";

/// Name reported when a call is rejected by parameter validation
pub const VALIDATION_ERROR: &str = "ValidationError";

/// Name reported when a request names a method the service does not have
pub const METHOD_NOT_SUPPORTED: &str = "MethodNotSupported";

/// Name reported when a request cannot be decoded at all
pub const BAD_REQUEST: &str = "BadRequest";

/// JSON body of every non-2xx response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<Violation>>,
}

impl ErrorBody {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            method: None,
            errors: None,
        }
    }

    pub fn validation(method: &str, errors: Vec<Violation>) -> Self {
        Self {
            method: Some(method.to_string()),
            errors: Some(errors),
            ..Self::new(VALIDATION_ERROR, "Bad Request")
        }
    }

    pub fn method_not_supported(method: &str) -> Self {
        Self {
            method: Some(method.to_string()),
            ..Self::new(METHOD_NOT_SUPPORTED, "Method not supported")
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_SERVER_ERROR, message)
    }

    pub fn with_stack(mut self, stack: Option<String>) -> Self {
        self.stack = stack;
        self
    }

    pub fn is_internal(&self) -> bool {
        self.name == INTERNAL_SERVER_ERROR
    }
}
