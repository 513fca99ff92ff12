//! Validation of wire values against compiled type descriptors
//!
//! Every definition of a document is compiled into a [`TypeDescriptor`] once.
//! [`Validator`]s share that compiled set and report every violation they
//! find, each with a JSON pointer to the offending value.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coerce::placeholder_index;
use crate::document::SchemaDocument;
use crate::error::SchemaError;
use crate::transform::ServiceSpec;
use crate::types::{LengthBounds, NumberBounds, TypeDescriptor};
use crate::value::parse_date;

const MAX_DEPTH: usize = 128;

/// One validation failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// JSON pointer to the offending value, empty for the root
    pub path: String,
    pub reason: String,
}

impl Violation {
    fn new(path: &str, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// Re-root the path under `prefix`, itself a JSON pointer
    pub fn under(mut self, prefix: &str) -> Self {
        self.path = format!("{}{}", prefix, self.path);
        self
    }
}

/// Compiled descriptors for every definition of a document
#[derive(Debug, Default)]
pub struct DescriptorSet {
    definitions: HashMap<String, TypeDescriptor>,
}

impl DescriptorSet {
    pub fn compile(document: &SchemaDocument) -> Result<Self, SchemaError> {
        let definitions = document
            .definitions()
            .iter()
            .map(|(name, body)| Ok((name.clone(), TypeDescriptor::from_schema(body)?)))
            .collect::<Result<_, SchemaError>>()?;
        Ok(Self { definitions })
    }

    pub fn get(&self, name: &str) -> Option<&TypeDescriptor> {
        self.definitions.get(name)
    }
}

/// A compiled validator for one schema fragment
#[derive(Debug, Clone)]
pub struct Validator {
    root: Arc<TypeDescriptor>,
    definitions: Arc<DescriptorSet>,
}

impl Validator {
    pub fn new(fragment: &Value, definitions: Arc<DescriptorSet>) -> Result<Self, SchemaError> {
        Ok(Self {
            root: Arc::new(TypeDescriptor::from_schema(fragment)?),
            definitions,
        })
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.root
    }

    /// Check `value`, collecting every violation
    pub fn validate(&self, value: &Value) -> Result<(), Vec<Violation>> {
        let mut violations = Vec::new();
        check(&self.root, value, "", &self.definitions, 0, &mut violations);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        self.validate(value).is_ok()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn child_path(path: &str, segment: &str) -> String {
    format!("{}/{}", path, segment.replace('~', "~0").replace('/', "~1"))
}

fn check_length(length: usize, bounds: &LengthBounds, unit: &str, path: &str, out: &mut Vec<Violation>) {
    let length = length as u64;
    if let Some(min) = bounds.min.filter(|min| length < *min) {
        out.push(Violation::new(path, format!("must NOT have fewer than {} {}", min, unit)));
    }
    if let Some(max) = bounds.max.filter(|max| length > *max) {
        out.push(Violation::new(path, format!("must NOT have more than {} {}", max, unit)));
    }
}

fn check_number(number: f64, integer: bool, bounds: &NumberBounds, path: &str, out: &mut Vec<Violation>) {
    if integer && number.fract() != 0.0 {
        out.push(Violation::new(path, "must be integer"));
    }
    if let Some(minimum) = bounds.minimum.filter(|m| number < *m) {
        out.push(Violation::new(path, format!("must be >= {}", minimum)));
    }
    if let Some(maximum) = bounds.maximum.filter(|m| number > *m) {
        out.push(Violation::new(path, format!("must be <= {}", maximum)));
    }
}

fn check(
    descriptor: &TypeDescriptor,
    value: &Value,
    path: &str,
    definitions: &DescriptorSet,
    depth: usize,
    out: &mut Vec<Violation>,
) {
    if depth > MAX_DEPTH {
        out.push(Violation::new(path, "exceeds maximum nesting depth"));
        return;
    }

    let expect = |kind: &str, out: &mut Vec<Violation>| {
        out.push(Violation::new(
            path,
            format!("must be {}, found {}", kind, json_kind(value)),
        ));
    };

    match descriptor {
        TypeDescriptor::Launch(_) | TypeDescriptor::Any => {}
        TypeDescriptor::String(bounds) => match value {
            Value::String(s) => check_length(s.chars().count(), bounds, "characters", path, out),
            _ => expect("string", out),
        },
        TypeDescriptor::Number { integer, bounds } => match value.as_f64() {
            Some(n) => check_number(n, *integer, bounds, path, out),
            _ => expect(if *integer { "integer" } else { "number" }, out),
        },
        TypeDescriptor::Boolean => {
            if !value.is_boolean() {
                expect("boolean", out);
            }
        }
        TypeDescriptor::Null => {
            if !value.is_null() {
                expect("null", out);
            }
        }
        TypeDescriptor::Date => match value.as_str() {
            Some(text) if parse_date(text).is_some() => {}
            Some(_) => out.push(Violation::new(path, "must match format \"date-time\"")),
            None => expect("string", out),
        },
        TypeDescriptor::Stream => {
            if placeholder_index(value).is_none() {
                out.push(Violation::new(path, "must be a stream placeholder"));
            }
        }
        TypeDescriptor::Enum(literals) => {
            if !literals.contains(value) {
                out.push(Violation::new(path, "must be equal to one of the allowed values"));
            }
        }
        TypeDescriptor::Reference(name) => match definitions.get(name) {
            Some(target) => check(target, value, path, definitions, depth + 1, out),
            None => out.push(Violation::new(path, format!("unknown definition '{}'", name))),
        },
        TypeDescriptor::Array { items, bounds } => match value {
            Value::Array(elements) => {
                check_length(elements.len(), bounds, "items", path, out);
                for (i, element) in elements.iter().enumerate() {
                    let element_path = child_path(path, &i.to_string());
                    check(items, element, &element_path, definitions, depth + 1, out);
                }
            }
            _ => expect("array", out),
        },
        TypeDescriptor::Tuple { items, bounds } => match value {
            Value::Array(elements) => {
                check_length(elements.len(), bounds, "items", path, out);
                for (i, (item, element)) in items.iter().zip(elements).enumerate() {
                    let element_path = child_path(path, &i.to_string());
                    check(item, element, &element_path, definitions, depth + 1, out);
                }
            }
            _ => expect("array", out),
        },
        TypeDescriptor::Object(properties) => match value {
            Value::Object(map) => {
                for property in properties {
                    match map.get(&property.name) {
                        Some(field) => {
                            let field_path = child_path(path, &property.name);
                            check(&property.descriptor, field, &field_path, definitions, depth + 1, out);
                        }
                        None if !property.optional => out.push(Violation::new(
                            path,
                            format!("must have required property '{}'", property.name),
                        )),
                        None => {}
                    }
                }
            }
            _ => expect("object", out),
        },
        TypeDescriptor::Union(variants) => {
            let matched = variants.iter().any(|variant| {
                let mut scratch = Vec::new();
                check(variant, value, path, definitions, depth + 1, &mut scratch);
                scratch.is_empty()
            });
            if !matched {
                out.push(Violation::new(path, "must match a schema in anyOf"));
            }
        }
        TypeDescriptor::Intersection(parts) => {
            for part in parts {
                check(part, value, path, definitions, depth + 1, out);
            }
        }
    }
}

/// Validators for one method
#[derive(Debug, Clone)]
pub struct MethodValidators {
    pub params: Validator,
    pub returns: Validator,
}

/// Immutable registry of compiled validators, built once per schema
#[derive(Debug)]
pub struct ValidatorRegistry {
    definitions: Arc<DescriptorSet>,
    methods: HashMap<(String, String), MethodValidators>,
}

impl ValidatorRegistry {
    /// Compile params and returns validators for every method of every class
    pub fn build(document: &SchemaDocument, spec: &ServiceSpec) -> Result<Self, SchemaError> {
        let definitions = Arc::new(DescriptorSet::compile(document)?);
        let mut methods = HashMap::new();

        for class in &spec.classes {
            let body = document
                .definition(&class.name)
                .ok_or_else(|| SchemaError::UnknownDefinition(class.name.clone()))?;
            for method in &class.methods {
                let member = &body["properties"][&method.name]["properties"];
                let validators = MethodValidators {
                    params: Validator::new(&member["params"], definitions.clone())?,
                    returns: Validator::new(&member["returns"], definitions.clone())?,
                };
                methods.insert((class.name.clone(), method.name.clone()), validators);
            }
        }

        Ok(Self {
            definitions,
            methods,
        })
    }

    pub fn method(&self, class: &str, method: &str) -> Option<&MethodValidators> {
        self.methods.get(&(class.to_string(), method.to_string()))
    }

    /// Validator for a whole named definition
    pub fn interface(&self, name: &str) -> Option<Validator> {
        self.definitions.get(name).map(|descriptor| Validator {
            root: Arc::new(descriptor.clone()),
            definitions: self.definitions.clone(),
        })
    }
}
