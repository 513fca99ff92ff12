//! Compiled service schema
//!
//! [`ServiceSchema`] bundles the source document, its [`ServiceSpec`] and the
//! validator registry. It is built once at startup and shared read-only by
//! every call.

use serde_json::Value;

use crate::document::SchemaDocument;
use crate::error::SchemaError;
use crate::transform::{ClassSpec, Method, Parameter, ServiceSpec, transform};
use crate::validate::{MethodValidators, Validator, ValidatorRegistry};

#[derive(Debug)]
pub struct ServiceSchema {
    document: SchemaDocument,
    spec: ServiceSpec,
    validators: ValidatorRegistry,
}

/// Everything needed to encode, check and decode one method call
#[derive(Debug, Clone, Copy)]
pub struct MethodSchema<'a> {
    pub class: &'a ClassSpec,
    pub method: &'a Method,
    /// The `params` fragment
    pub params: &'a Value,
    /// The `returns` fragment
    pub returns: &'a Value,
    pub validators: &'a MethodValidators,
}

impl<'a> MethodSchema<'a> {
    pub fn name(&self) -> &'a str {
        &self.method.name
    }

    pub fn parameters(&self) -> &'a [Parameter] {
        &self.method.parameters
    }

    /// Schema fragment of one parameter
    pub fn parameter_fragment(&self, name: &str) -> Option<&'a Value> {
        self.params.get("properties").and_then(|props| props.get(name))
    }
}

impl ServiceSchema {
    /// Sort, transform and compile a document
    pub fn compile(document: SchemaDocument) -> Result<Self, SchemaError> {
        let spec = transform(&document)?;
        let validators = ValidatorRegistry::build(&document, &spec)?;
        tracing::debug!(
            classes = spec.classes.len(),
            exceptions = spec.exceptions.len(),
            "Compiled service schema"
        );
        Ok(Self {
            document,
            spec,
            validators,
        })
    }

    pub fn from_value(raw: Value) -> Result<Self, SchemaError> {
        Self::compile(SchemaDocument::from_value(raw)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self, SchemaError> {
        Self::compile(SchemaDocument::from_json_str(text)?)
    }

    pub fn document(&self) -> &SchemaDocument {
        &self.document
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    pub fn validators(&self) -> &ValidatorRegistry {
        &self.validators
    }

    pub fn class(&self, name: &str) -> Result<&ClassSpec, SchemaError> {
        self.spec
            .class(name)
            .ok_or_else(|| SchemaError::UnknownDefinition(name.to_string()))
    }

    /// Look up one method of a class
    pub fn method(&self, class: &str, method: &str) -> Result<MethodSchema<'_>, SchemaError> {
        let unknown = || SchemaError::UnknownMethod {
            class: class.to_string(),
            method: method.to_string(),
        };
        let class_spec = self.class(class)?;
        let method_spec = class_spec.method(method).ok_or_else(unknown)?;
        let member = self
            .document
            .definition(class)
            .and_then(|body| body.get("properties"))
            .and_then(|props| props.get(method))
            .and_then(|member| member.get("properties"))
            .ok_or_else(unknown)?;
        let validators = self.validators.method(class, method).ok_or_else(unknown)?;

        Ok(MethodSchema {
            class: class_spec,
            method: method_spec,
            params: member.get("params").ok_or_else(unknown)?,
            returns: member.get("returns").ok_or_else(unknown)?,
            validators,
        })
    }

    /// Validator for a whole named definition, such as the client context
    pub fn interface_validator(&self, name: &str) -> Option<Validator> {
        self.validators.interface(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calculator() -> ServiceSchema {
        ServiceSchema::from_value(json!({
            "definitions": {
                "ClientContext": {"properties": {"debugId": {"type": "string"}}, "required": ["debugId"]},
                "Calculator": {"properties": {"add": {"properties": {
                    "params": {
                        "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                        "propertyOrder": ["a", "b"],
                        "required": ["a", "b"]
                    },
                    "returns": {"type": "number"}
                }}}}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_method_lookup() {
        let schema = calculator();
        let add = schema.method("Calculator", "add").unwrap();
        assert_eq!(add.name(), "add");
        assert_eq!(add.parameters().len(), 2);
        assert_eq!(add.parameter_fragment("b"), Some(&json!({"type": "number"})));
        assert!(add.validators.params.is_valid(&json!({"a": 1, "b": 2})));
        assert!(!add.validators.params.is_valid(&json!({"a": 1})));
        assert!(add.validators.returns.is_valid(&json!(3)));
    }

    #[test]
    fn test_unknown_method() {
        let schema = calculator();
        assert!(matches!(
            schema.method("Calculator", "divide"),
            Err(SchemaError::UnknownMethod { .. })
        ));
        assert!(matches!(
            schema.method("Nope", "add"),
            Err(SchemaError::UnknownDefinition(_))
        ));
    }

    #[test]
    fn test_interface_validator() {
        let schema = calculator();
        let context = schema.interface_validator("ClientContext").unwrap();
        assert!(context.is_valid(&json!({"debugId": "666"})));
        assert!(!context.is_valid(&json!({})));
        assert!(schema.interface_validator("Missing").is_none());
    }

    #[test]
    fn test_schema_errors_abort_compilation() {
        let err = ServiceSchema::from_value(json!({
            "definitions": {"Bad": {"type": "number", "enum": [1]}}
        }))
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidEnumType { .. }));
    }
}
