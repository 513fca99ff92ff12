//! Schema document: the JSON-Schema-like input describing every type and method.

use serde_json::{Map, Value};

use crate::error::SchemaError;

const DEFINITIONS_SEGMENT: &str = "/definitions/";

/// Extract the definition name from a `$ref` value of the form `<prefix>/definitions/<name>`.
pub fn reference_name(reference: &str) -> Result<&str, SchemaError> {
    match reference.rsplit_once(DEFINITIONS_SEGMENT) {
        Some((_, name)) if !name.is_empty() => Ok(name),
        _ => Err(SchemaError::InvalidReference {
            reference: reference.to_string(),
        }),
    }
}

/// Build the canonical `$ref` string for a definition name.
pub fn definition_ref(name: &str) -> String {
    format!("#{}{}", DEFINITIONS_SEGMENT, name)
}

/// A parsed schema document.
///
/// Definition order is the order of the source document.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDocument {
    raw: Value,
    definitions: Map<String, Value>,
}

impl SchemaDocument {
    /// Wrap a JSON value, checking that it carries a `definitions` object
    pub fn from_value(raw: Value) -> Result<Self, SchemaError> {
        let definitions = raw
            .get("definitions")
            .and_then(Value::as_object)
            .cloned()
            .ok_or(SchemaError::MissingDefinitions)?;
        Ok(Self { raw, definitions })
    }

    /// Parse a document from JSON text
    pub fn from_json_str(text: &str) -> Result<Self, SchemaError> {
        let raw: Value =
            serde_json::from_str(text).map_err(|e| SchemaError::Parse(e.to_string()))?;
        Self::from_value(raw)
    }

    /// All definitions in document order
    pub fn definitions(&self) -> &Map<String, Value> {
        &self.definitions
    }

    /// Look up a definition body by name
    pub fn definition(&self, name: &str) -> Option<&Value> {
        self.definitions().get(name)
    }

    /// Resolve a `$ref` string against this document
    pub fn resolve(&self, reference: &str) -> Option<&Value> {
        reference_name(reference)
            .ok()
            .and_then(|name| self.definition(name))
    }

    /// The document as originally supplied
    pub fn as_value(&self) -> &Value {
        &self.raw
    }

    /// Compact JSON text of the whole document
    pub fn to_json_string(&self) -> String {
        self.raw.to_string()
    }
}
