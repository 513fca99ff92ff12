use thiserror::Error;

/// Build-time errors raised while loading, sorting or transforming a schema document.
///
/// All of these are fatal: a service must not start from a schema that produced one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("Schema document must contain a `definitions` object")]
    MissingDefinitions,

    #[error("Schema document is not valid JSON: {0}")]
    Parse(String),

    #[error("Invalid reference '{reference}' (expected '<prefix>/definitions/<name>')")]
    InvalidReference { reference: String },

    #[error("Definition '{from}' references unknown definition '{to}'")]
    DanglingReference { from: String, to: String },

    #[error("Reference cycle between definitions: {}", .definitions.join(", "))]
    ReferenceCycle { definitions: Vec<String> },

    #[error(
        "Unsupported enum type definitions found (expected string values only): {}",
        .definitions.join(", ")
    )]
    InvalidEnumType { definitions: Vec<String> },

    #[error(
        "Unsupported enum value found (does not match ^[a-z][a-z0-9_-]*$): {}",
        .definitions.join(", ")
    )]
    InvalidEnumValue { definitions: Vec<String> },

    #[error("Invalid type for items in {context}")]
    InvalidItems { context: String },

    #[error("Unknown definition '{0}'")]
    UnknownDefinition(String),

    #[error("Definition '{class}' has no method '{method}'")]
    UnknownMethod { class: String, method: String },
}

/// Errors raised while reconstructing typed values from wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoerceError {
    #[error("Unresolved reference '{0}'")]
    UnresolvedReference(String),

    #[error("No attached stream for placeholder index {0}")]
    MissingStream(usize),

    #[error("Schema nesting exceeds {0} levels")]
    DepthExceeded(usize),
}

/// Errors raised when converting between [`crate::RpcValue`] and plain data.
#[derive(Debug, Error)]
pub enum ValueError {
    #[error("Byte streams cannot be represented as plain JSON")]
    UnexpectedStream,

    #[error("Missing required argument '{0}'")]
    MissingArgument(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_definitions() {
        let err = SchemaError::ReferenceCycle {
            definitions: vec!["A".to_string(), "B".to_string()],
        };
        assert_eq!(err.to_string(), "Reference cycle between definitions: A, B");
    }

    #[test]
    fn test_enum_errors_name_definitions() {
        let err = SchemaError::InvalidEnumType {
            definitions: vec!["Numbers".to_string()],
        };
        assert!(err.to_string().contains("Numbers"));
    }
}
