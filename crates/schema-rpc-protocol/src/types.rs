//! Type descriptors: the typed view of a schema fragment
//!
//! A [`TypeDescriptor`] is parsed from a JSON-Schema-like fragment and drives
//! validation and type rendering. Parsing follows the same precedence as the
//! rendered type strings: launch type, stream marker, `type` keyword,
//! `$ref`, `anyOf`, `allOf`, then bare `properties`.

use std::fmt;

use serde_json::Value;

use crate::document::reference_name;
use crate::error::SchemaError;

/// Keyword marking a fragment as carrying an out-of-band byte stream
pub const STREAM_KEYWORD: &str = "coerce-stream";

/// Keyword carrying a verbatim type string that is never interpreted
pub const LAUNCH_TYPE_KEYWORD: &str = "launchType";

/// `format` value identifying date-time strings
pub const DATE_TIME_FORMAT: &str = "date-time";

/// Optional length limits for string values
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LengthBounds {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

/// Optional inclusive limits for numeric values
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NumberBounds {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

/// A named property of an inline object type
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub descriptor: TypeDescriptor,
    pub optional: bool,
}

/// The typed shape of a schema fragment
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDescriptor {
    /// Escape hatch: emitted verbatim, accepts any value
    Launch(String),
    String(LengthBounds),
    /// `integer` and `number` both render as `number`; `integer` additionally
    /// rejects fractional values
    Number { integer: bool, bounds: NumberBounds },
    Boolean,
    Null,
    /// String in RFC 3339 form, materialized as a date-time value
    Date,
    /// Placeholder for a byte stream travelling out-of-band
    Stream,
    /// One of a fixed set of literal values
    Enum(Vec<Value>),
    /// Reference to a named definition
    Reference(String),
    /// Homogeneous array
    Array {
        items: Box<TypeDescriptor>,
        bounds: LengthBounds,
    },
    /// Fixed-arity positional array
    Tuple {
        items: Vec<TypeDescriptor>,
        bounds: LengthBounds,
    },
    Object(Vec<Property>),
    Union(Vec<TypeDescriptor>),
    Intersection(Vec<TypeDescriptor>),
    /// Fragment without recognizable shape, accepts any value
    Any,
}

impl TypeDescriptor {
    /// Parse a schema fragment
    pub fn from_schema(fragment: &Value) -> Result<Self, SchemaError> {
        let Some(map) = fragment.as_object() else {
            return Ok(TypeDescriptor::Any);
        };

        if let Some(Value::String(launch)) = map.get(LAUNCH_TYPE_KEYWORD) {
            return Ok(TypeDescriptor::Launch(launch.clone()));
        }
        if map.get(STREAM_KEYWORD) == Some(&Value::Bool(true)) {
            return Ok(TypeDescriptor::Stream);
        }
        if let Some(Value::String(ty)) = map.get("type") {
            if let Some(Value::Array(literals)) = map.get("enum") {
                return Ok(TypeDescriptor::Enum(literals.clone()));
            }
            return Self::from_typed(ty, fragment);
        }
        if let Some(Value::String(reference)) = map.get("$ref") {
            return Ok(TypeDescriptor::Reference(
                reference_name(reference)?.to_string(),
            ));
        }
        if let Some(Value::Array(variants)) = map.get("anyOf") {
            return Ok(TypeDescriptor::Union(Self::parse_all(variants)?));
        }
        if let Some(Value::Array(parts)) = map.get("allOf") {
            return Ok(TypeDescriptor::Intersection(Self::parse_all(parts)?));
        }
        if map.contains_key("properties") {
            return Self::parse_object(fragment);
        }
        Ok(TypeDescriptor::Any)
    }

    fn from_typed(ty: &str, fragment: &Value) -> Result<Self, SchemaError> {
        let descriptor = match ty {
            "object" => Self::parse_object(fragment)?,
            "array" => {
                let bounds = LengthBounds {
                    min: fragment.get("minItems").and_then(Value::as_u64),
                    max: fragment.get("maxItems").and_then(Value::as_u64),
                };
                match fragment.get("items") {
                    Some(Value::Array(items)) => TypeDescriptor::Tuple {
                        items: Self::parse_all(items)?,
                        bounds,
                    },
                    Some(items @ Value::Object(_)) => TypeDescriptor::Array {
                        items: Box::new(Self::from_schema(items)?),
                        bounds,
                    },
                    _ => {
                        return Err(SchemaError::InvalidItems {
                            context: fragment.to_string(),
                        });
                    }
                }
            }
            "integer" | "number" => TypeDescriptor::Number {
                integer: ty == "integer",
                bounds: NumberBounds {
                    minimum: fragment.get("minimum").and_then(Value::as_f64),
                    maximum: fragment.get("maximum").and_then(Value::as_f64),
                },
            },
            "string" if fragment.get("format").and_then(Value::as_str) == Some(DATE_TIME_FORMAT) => {
                TypeDescriptor::Date
            }
            "string" => TypeDescriptor::String(LengthBounds {
                min: fragment.get("minLength").and_then(Value::as_u64),
                max: fragment.get("maxLength").and_then(Value::as_u64),
            }),
            "boolean" => TypeDescriptor::Boolean,
            "null" => TypeDescriptor::Null,
            other => TypeDescriptor::Launch(other.to_string()),
        };
        Ok(descriptor)
    }

    fn parse_object(fragment: &Value) -> Result<Self, SchemaError> {
        let required = required_names(fragment);
        let properties = match fragment.get("properties").and_then(Value::as_object) {
            Some(props) => props
                .iter()
                .map(|(name, schema)| {
                    Ok(Property {
                        name: name.clone(),
                        descriptor: Self::from_schema(schema)?,
                        optional: !required.iter().any(|r| r == name),
                    })
                })
                .collect::<Result<Vec<_>, SchemaError>>()?,
            None => Vec::new(),
        };
        Ok(TypeDescriptor::Object(properties))
    }

    fn parse_all(fragments: &[Value]) -> Result<Vec<Self>, SchemaError> {
        fragments.iter().map(Self::from_schema).collect()
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, TypeDescriptor::Stream)
    }
}

/// Names listed in a fragment's `required` keyword
pub fn required_names(fragment: &Value) -> Vec<String> {
    fragment
        .get("required")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn join(f: &mut fmt::Formatter<'_>, items: &[TypeDescriptor], separator: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(separator)?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Launch(name) => f.write_str(name),
            TypeDescriptor::String(_) => f.write_str("string"),
            TypeDescriptor::Number { .. } => f.write_str("number"),
            TypeDescriptor::Boolean => f.write_str("boolean"),
            TypeDescriptor::Null => f.write_str("null"),
            TypeDescriptor::Date => f.write_str("Date"),
            TypeDescriptor::Stream => f.write_str("Stream"),
            TypeDescriptor::Enum(literals) => {
                for (i, literal) in literals.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{}", literal)?;
                }
                Ok(())
            }
            TypeDescriptor::Reference(name) => f.write_str(name),
            TypeDescriptor::Array { items, .. } => write!(f, "{}[]", items),
            TypeDescriptor::Tuple { items, .. } => {
                f.write_str("[")?;
                join(f, items, ", ")?;
                f.write_str("]")
            }
            TypeDescriptor::Object(properties) if properties.is_empty() => f.write_str("{}"),
            TypeDescriptor::Object(properties) => {
                f.write_str("{ ")?;
                for (i, property) in properties.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    let marker = if property.optional { "?" } else { "" };
                    write!(f, "{}{}: {};", property.name, marker, property.descriptor)?;
                }
                f.write_str(" }")
            }
            TypeDescriptor::Union(variants) => join(f, variants, " | "),
            TypeDescriptor::Intersection(parts) => join(f, parts, " & "),
            TypeDescriptor::Any => f.write_str("Object"),
        }
    }
}

/// Render a schema fragment as a type string
pub fn type_to_string(fragment: &Value) -> Result<String, SchemaError> {
    Ok(TypeDescriptor::from_schema(fragment)?.to_string())
}
