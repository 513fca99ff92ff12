//! Schema document to [`ServiceSpec`] transform
//!
//! Classifies every definition as a bypass type, an enum, an exception or a
//! class, projects class members into attributes and methods, and detects the
//! two context classes. Pure and deterministic for a given document.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::document::SchemaDocument;
use crate::error::SchemaError;
use crate::refs::sort_definitions;
use crate::types::{required_names, type_to_string};

/// Name of the caller-supplied context class
pub const CLIENT_CONTEXT: &str = "ClientContext";

/// Name of the server-derived context class
pub const SERVER_ONLY_CONTEXT: &str = "ServerOnlyContext";

/// Return type string used for methods returning `null`
pub const VOID: &str = "void";

static ENUM_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[a-z][a-z0-9_-]*$").expect("enum value pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub optional: bool,
    pub last: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Method {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub return_type: String,
    pub throws: Vec<String>,
}

impl Method {
    pub fn returns_void(&self) -> bool {
        self.return_type == VOID
    }

    /// Whether `kind` is one of the declared exception names
    pub fn declares(&self, kind: &str) -> bool {
        self.throws.iter().any(|t| t == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassSpec {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub methods: Vec<Method>,
}

impl ClassSpec {
    /// A routable service: exposes methods and carries no data attributes
    pub fn is_service(&self) -> bool {
        self.attributes.is_empty() && !self.methods.is_empty()
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumSpec {
    pub name: String,
    pub def: Vec<EnumEntry>,
}

/// A union or intersection alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BypassType {
    pub name: String,
    pub def: String,
}

/// Flat, ready-to-consume description of a service schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Compact JSON text of the source document
    pub schema: String,
    pub classes: Vec<ClassSpec>,
    pub exceptions: Vec<ClassSpec>,
    pub enums: Vec<EnumSpec>,
    pub bypass_types: Vec<BypassType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_context: Option<ClassSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_only_context: Option<ClassSpec>,
    /// Type string of the effective handler context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_context: Option<String>,
}

impl ServiceSpec {
    pub fn class(&self, name: &str) -> Option<&ClassSpec> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Classes that can be routed to
    pub fn services(&self) -> impl Iterator<Item = &ClassSpec> {
        self.classes.iter().filter(|c| c.is_service())
    }

    pub fn is_exception(&self, name: &str) -> bool {
        self.exceptions.iter().any(|e| e.name == name)
    }
}

fn is_method(member: &Value) -> bool {
    member.pointer("/properties/params").is_some() && member.pointer("/properties/returns").is_some()
}

fn is_string_typed(fragment: &Value) -> bool {
    fragment.get("type").and_then(Value::as_str) == Some("string")
}

/// Exactly `name` and `message` with an optional `stack`, all strings
fn is_exception(body: &Value) -> bool {
    let Some(properties) = body.get("properties").and_then(Value::as_object) else {
        return false;
    };
    properties.contains_key("name")
        && properties.contains_key("message")
        && properties
            .iter()
            .all(|(key, fragment)| matches!(key.as_str(), "name" | "message" | "stack") && is_string_typed(fragment))
}

fn transform_method(name: &str, member: &Value) -> Result<Method, SchemaError> {
    let params = &member["properties"]["params"];
    let returns = &member["properties"]["returns"];
    let required = required_names(params);
    let order: Vec<&str> = params
        .get("propertyOrder")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut entries: Vec<(&String, &Value)> = params
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.iter().collect())
        .unwrap_or_default();
    // Stable: names missing from the order list keep document order at the end
    entries.sort_by_key(|(param, _)| {
        order
            .iter()
            .position(|o| o == param)
            .unwrap_or(usize::MAX)
    });

    let count = entries.len();
    let parameters = entries
        .into_iter()
        .enumerate()
        .map(|(i, (param, fragment))| {
            Ok(Parameter {
                name: param.clone(),
                type_name: type_to_string(fragment)?,
                optional: !required.contains(param),
                last: i + 1 == count,
            })
        })
        .collect::<Result<Vec<_>, SchemaError>>()?;

    let return_type = match type_to_string(returns)? {
        rendered if rendered == "null" => VOID.to_string(),
        rendered => rendered,
    };

    let throws = match member.pointer("/properties/throws") {
        Some(fragment) => type_to_string(fragment)?
            .split(" | ")
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    };

    Ok(Method {
        name: name.to_string(),
        parameters,
        return_type,
        throws,
    })
}

fn transform_class(name: &str, body: &Value) -> Result<ClassSpec, SchemaError> {
    let required = required_names(body);
    let mut attributes = Vec::new();
    let mut methods = Vec::new();

    if let Some(members) = body.get("properties").and_then(Value::as_object) {
        for (member_name, member) in members {
            if is_method(member) {
                methods.push(transform_method(member_name, member)?);
            } else {
                attributes.push(Attribute {
                    name: member_name.clone(),
                    type_name: type_to_string(member)?,
                    optional: !required.contains(member_name),
                });
            }
        }
    }

    Ok(ClassSpec {
        name: name.to_string(),
        attributes,
        methods,
    })
}

fn check_enums(definitions: &[(String, Value)]) -> Result<Vec<EnumSpec>, SchemaError> {
    let enum_defs: Vec<(&String, &Value, &Vec<Value>)> = definitions
        .iter()
        .filter_map(|(name, body)| {
            body.get("enum")
                .and_then(Value::as_array)
                .map(|values| (name, body, values))
        })
        .collect();

    let wrong_type: Vec<String> = enum_defs
        .iter()
        .filter(|(_, body, _)| !is_string_typed(body))
        .map(|(name, _, _)| (*name).clone())
        .collect();
    if !wrong_type.is_empty() {
        return Err(SchemaError::InvalidEnumType {
            definitions: wrong_type,
        });
    }

    let wrong_value: Vec<String> = enum_defs
        .iter()
        .filter(|(_, _, values)| {
            values
                .iter()
                .any(|v| !v.as_str().is_some_and(|s| ENUM_VALUE.is_match(s)))
        })
        .map(|(name, _, _)| (*name).clone())
        .collect();
    if !wrong_value.is_empty() {
        return Err(SchemaError::InvalidEnumValue {
            definitions: wrong_value,
        });
    }

    Ok(enum_defs
        .into_iter()
        .map(|(name, _, values)| EnumSpec {
            name: name.clone(),
            def: values
                .iter()
                .filter_map(Value::as_str)
                .map(|value| EnumEntry {
                    key: value.to_uppercase(),
                    value: value.to_string(),
                })
                .collect(),
        })
        .collect())
}

/// Build the [`ServiceSpec`] for a schema document
pub fn transform(document: &SchemaDocument) -> Result<ServiceSpec, SchemaError> {
    let sorted = sort_definitions(document)?;

    let bypass_types = sorted
        .iter()
        .filter(|(_, body)| body.get("anyOf").is_some() || body.get("allOf").is_some())
        .map(|(name, body)| {
            Ok(BypassType {
                name: name.clone(),
                def: type_to_string(body)?,
            })
        })
        .collect::<Result<Vec<_>, SchemaError>>()?;

    let enums = check_enums(&sorted)?;

    let mut classes = Vec::new();
    let mut exceptions = Vec::new();
    for (name, body) in sorted.iter().filter(|(_, body)| body.get("properties").is_some()) {
        let spec = transform_class(name, body)?;
        if is_exception(body) {
            exceptions.push(spec);
        } else {
            classes.push(spec);
        }
    }

    let client_context = classes.iter().find(|c| c.name == CLIENT_CONTEXT).cloned();
    let server_only_context = classes
        .iter()
        .find(|c| c.name == SERVER_ONLY_CONTEXT)
        .cloned();
    let server_context = match (&client_context, &server_only_context) {
        (Some(_), Some(_)) => Some(format!("{} & {}", CLIENT_CONTEXT, SERVER_ONLY_CONTEXT)),
        (Some(_), None) => Some(CLIENT_CONTEXT.to_string()),
        (None, Some(_)) => Some(SERVER_ONLY_CONTEXT.to_string()),
        (None, None) => None,
    };

    Ok(ServiceSpec {
        schema: document.to_json_string(),
        classes,
        exceptions,
        enums,
        bypass_types,
        client_context,
        server_only_context,
        server_context,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exception_schema() -> Value {
        json!({
            "properties": {
                "message": {"type": "string"},
                "name": {"type": "string"},
                "stack": {"type": "string"}
            },
            "propertyOrder": ["name", "message", "stack"],
            "required": ["message", "name"],
            "type": "object"
        })
    }

    fn run(doc: Value) -> Result<ServiceSpec, SchemaError> {
        transform(&SchemaDocument::from_value(doc).unwrap())
    }

    #[test]
    fn test_simple_class_with_attribute() {
        let spec = run(json!({
            "definitions": {"Test": {"properties": {"x": {"type": "number"}}}}
        }))
        .unwrap();
        assert_eq!(
            spec.classes,
            vec![ClassSpec {
                name: "Test".to_string(),
                attributes: vec![Attribute {
                    name: "x".to_string(),
                    type_name: "number".to_string(),
                    optional: true,
                }],
                methods: vec![],
            }]
        );
        assert!(spec.exceptions.is_empty());
        assert!(spec.server_context.is_none());
        assert!(!spec.classes[0].is_service());
    }

    #[test]
    fn test_method_parameters_follow_declared_order() {
        let spec = run(json!({
            "definitions": {"Test": {"properties": {"add": {
                "type": "object",
                "properties": {
                    "params": {
                        "type": "object",
                        "properties": {"b": {"type": "integer"}, "a": {"type": "integer"}},
                        "propertyOrder": ["a", "b"],
                        "required": ["b"]
                    },
                    "returns": {"type": "integer"}
                }
            }}}}
        }))
        .unwrap();

        let method = &spec.classes[0].methods[0];
        assert_eq!(method.name, "add");
        assert_eq!(method.return_type, "number");
        assert_eq!(
            method.parameters,
            vec![
                Parameter {
                    name: "a".to_string(),
                    type_name: "number".to_string(),
                    optional: true,
                    last: false,
                },
                Parameter {
                    name: "b".to_string(),
                    type_name: "number".to_string(),
                    optional: false,
                    last: true,
                },
            ]
        );
        assert!(spec.classes[0].is_service());
    }

    #[test]
    fn test_unlisted_parameters_go_last() {
        let spec = run(json!({
            "definitions": {"Test": {"properties": {"f": {"properties": {
                "params": {
                    "properties": {"z": {"type": "string"}, "y": {"type": "string"}, "x": {"type": "string"}},
                    "propertyOrder": ["x"]
                },
                "returns": {"type": "null"}
            }}}}}
        }))
        .unwrap();
        let method = &spec.classes[0].methods[0];
        let names: Vec<&str> = method.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["x", "z", "y"]);
        assert!(method.returns_void());
    }

    #[test]
    fn test_classes_are_sorted_by_reference() {
        let spec = run(json!({
            "definitions": {
                "A": {"properties": {"foo": {"type": "object", "properties": {
                    "params": {"properties": {"b": {"$ref": "#/definitions/B"}}, "propertyOrder": ["b"]},
                    "returns": {"type": "string"}
                }}}},
                "B": {"properties": {"bar": {"type": "object", "properties": {
                    "params": {"properties": {"c": {"$ref": "#/definitions/C"}}, "propertyOrder": ["c"]},
                    "returns": {"type": "string"}
                }}}},
                "C": {"properties": {"baz": {"type": "string"}}}
            }
        }))
        .unwrap();
        let names: Vec<&str> = spec.classes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["C", "B", "A"]);
    }

    #[test]
    fn test_exceptions_are_classified_structurally() {
        let spec = run(json!({
            "definitions": {
                "Test": {"properties": {"add": {"type": "object", "properties": {
                    "params": {"type": "object", "properties": {}},
                    "returns": {"type": "integer"},
                    "throws": {"$ref": "#/definitions/RuntimeError"}
                }}}},
                "RuntimeError": exception_schema()
            }
        }))
        .unwrap();

        assert_eq!(spec.exceptions.len(), 1);
        let exception = &spec.exceptions[0];
        assert_eq!(exception.name, "RuntimeError");
        let attrs: Vec<(&str, bool)> = exception
            .attributes
            .iter()
            .map(|a| (a.name.as_str(), a.optional))
            .collect();
        assert_eq!(
            attrs,
            vec![("message", false), ("name", false), ("stack", true)]
        );

        assert_eq!(spec.classes.len(), 1);
        let method = &spec.classes[0].methods[0];
        assert!(method.parameters.is_empty());
        assert_eq!(method.throws, vec!["RuntimeError"]);
        assert!(method.declares("RuntimeError"));
        assert!(spec.is_exception("RuntimeError"));
    }

    #[test]
    fn test_extra_field_makes_a_class() {
        let spec = run(json!({
            "definitions": {"NotAnError": {"properties": {
                "name": {"type": "string"},
                "message": {"type": "string"},
                "code": {"type": "string"}
            }}}
        }))
        .unwrap();
        assert!(spec.exceptions.is_empty());
        assert_eq!(spec.classes[0].name, "NotAnError");
    }

    #[test]
    fn test_union_throws_are_split() {
        let spec = run(json!({
            "definitions": {
                "Svc": {"properties": {"go": {"properties": {
                    "params": {"properties": {}},
                    "returns": {"type": "null"},
                    "throws": {"anyOf": [
                        {"$ref": "#/definitions/AError"},
                        {"$ref": "#/definitions/BError"}
                    ]}
                }}}},
                "AError": exception_schema(),
                "BError": exception_schema()
            }
        }))
        .unwrap();
        assert_eq!(
            spec.class("Svc").unwrap().methods[0].throws,
            vec!["AError", "BError"]
        );
    }

    #[test]
    fn test_context_detection() {
        let spec = run(json!({
            "definitions": {
                "ClientContext": {"properties": {"foo": {"type": "string"}}, "required": ["foo"]}
            }
        }))
        .unwrap();
        assert_eq!(
            spec.client_context,
            Some(ClassSpec {
                name: "ClientContext".to_string(),
                attributes: vec![Attribute {
                    name: "foo".to_string(),
                    type_name: "string".to_string(),
                    optional: false,
                }],
                methods: vec![],
            })
        );
        assert_eq!(spec.server_context.as_deref(), Some("ClientContext"));

        let both = run(json!({
            "definitions": {
                "ClientContext": {"properties": {"debugId": {"type": "string"}}},
                "ServerOnlyContext": {"properties": {"ip": {"type": "string"}}}
            }
        }))
        .unwrap();
        assert_eq!(
            both.server_context.as_deref(),
            Some("ClientContext & ServerOnlyContext")
        );
    }

    #[test]
    fn test_rejects_non_string_enum() {
        let err = run(json!({
            "definitions": {"OneTwoThree": {"type": "number", "enum": [1, 2, 3]}}
        }))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unsupported enum type definitions found (expected string values only): OneTwoThree"
        );
    }

    #[test]
    fn test_rejects_malformed_enum_value() {
        let err = run(json!({
            "definitions": {"InvalidStringEnum": {"type": "string", "enum": ["1ss", "sss"]}}
        }))
        .unwrap_err();
        assert_eq!(
            err,
            SchemaError::InvalidEnumValue {
                definitions: vec!["InvalidStringEnum".to_string()]
            }
        );
        assert!(err.to_string().ends_with(": InvalidStringEnum"));
    }

    #[test]
    fn test_enums_and_bypass_types() {
        let spec = run(json!({
            "definitions": {
                "Color": {"type": "string", "enum": ["red", "dark-blue"]},
                "A": {"properties": {"a": {"type": "string"}}},
                "B": {"properties": {"b": {"type": "string"}}},
                "AorB": {"anyOf": [{"$ref": "#/definitions/A"}, {"$ref": "#/definitions/B"}]}
            }
        }))
        .unwrap();
        assert_eq!(
            spec.enums,
            vec![EnumSpec {
                name: "Color".to_string(),
                def: vec![
                    EnumEntry {
                        key: "RED".to_string(),
                        value: "red".to_string()
                    },
                    EnumEntry {
                        key: "DARK-BLUE".to_string(),
                        value: "dark-blue".to_string()
                    },
                ],
            }]
        );
        assert_eq!(
            spec.bypass_types,
            vec![BypassType {
                name: "AorB".to_string(),
                def: "A | B".to_string()
            }]
        );
    }

    #[test]
    fn test_schema_text_is_kept() {
        let doc = json!({"definitions": {"T": {"properties": {"x": {"type": "string"}}}}});
        let spec = run(doc.clone()).unwrap();
        assert_eq!(spec.schema, doc.to_string());
    }
}
