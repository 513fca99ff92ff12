//! Schema-directed reconstruction of typed values from wire data
//!
//! Wire values are plain JSON. [`coerce`] walks a value alongside its schema
//! fragment and rebuilds what JSON cannot carry: date-times from their string
//! form and byte streams from `{"$stream": n}` placeholders. Used for request
//! parameters on the server and return values on the client.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::document::SchemaDocument;
use crate::error::CoerceError;
use crate::types::{DATE_TIME_FORMAT, STREAM_KEYWORD};
use crate::value::{AttachedStreams, RpcValue, parse_date};

/// Key of the stream placeholder object
pub const STREAM_PLACEHOLDER_KEY: &str = "$stream";

/// Maximum schema nesting followed before giving up
pub const MAX_DEPTH: usize = 128;

/// Index carried by a stream placeholder
pub fn placeholder_index(value: &Value) -> Option<usize> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    map.get(STREAM_PLACEHOLDER_KEY)?
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
}

/// Coerce `value` against `fragment`, resolving references in `root` and
/// substituting placeholders with streams taken from `streams`.
pub fn coerce(
    fragment: &Value,
    value: Value,
    root: &SchemaDocument,
    streams: &mut AttachedStreams,
) -> Result<RpcValue, CoerceError> {
    coerce_at(fragment, value, root, streams, 0)
}

fn coerce_at(
    fragment: &Value,
    value: Value,
    root: &SchemaDocument,
    streams: &mut AttachedStreams,
    depth: usize,
) -> Result<RpcValue, CoerceError> {
    if depth > MAX_DEPTH {
        return Err(CoerceError::DepthExceeded(MAX_DEPTH));
    }

    if let Some(Value::String(reference)) = fragment.get("$ref") {
        let target = root
            .resolve(reference)
            .ok_or_else(|| CoerceError::UnresolvedReference(reference.clone()))?;
        return coerce_at(target, value, root, streams, depth + 1);
    }

    if fragment.get(STREAM_KEYWORD) == Some(&Value::Bool(true)) {
        if let Some(index) = placeholder_index(&value) {
            let stream = streams
                .take(index)
                .ok_or(CoerceError::MissingStream(index))?;
            return Ok(RpcValue::Stream(stream));
        }
        return Ok(value.into());
    }

    match value {
        Value::Array(items) => match fragment.get("items") {
            Some(Value::Array(positional)) => {
                let mut coerced = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    coerced.push(match positional.get(i) {
                        Some(item_fragment) => {
                            coerce_at(item_fragment, item, root, streams, depth + 1)?
                        }
                        None => item.into(),
                    });
                }
                Ok(RpcValue::Array(coerced))
            }
            Some(item_fragment @ Value::Object(_)) => Ok(RpcValue::Array(
                items
                    .into_iter()
                    .map(|item| coerce_at(item_fragment, item, root, streams, depth + 1))
                    .collect::<Result<_, _>>()?,
            )),
            _ => Ok(Value::Array(items).into()),
        },
        Value::Object(map) => match fragment.get("properties").and_then(Value::as_object) {
            Some(properties) => {
                let mut coerced = BTreeMap::new();
                for (key, field) in map {
                    let field = match properties.get(&key) {
                        Some(field_fragment) => {
                            coerce_at(field_fragment, field, root, streams, depth + 1)?
                        }
                        None => field.into(),
                    };
                    coerced.insert(key, field);
                }
                Ok(RpcValue::Object(coerced))
            }
            None => Ok(Value::Object(map).into()),
        },
        Value::String(text) if is_date_fragment(fragment) => Ok(match parse_date(&text) {
            Some(date) => RpcValue::DateTime(date),
            None => RpcValue::String(text),
        }),
        other => Ok(other.into()),
    }
}

fn is_date_fragment(fragment: &Value) -> bool {
    fragment.get("type").and_then(Value::as_str) == Some("string")
        && fragment.get("format").and_then(Value::as_str) == Some(DATE_TIME_FORMAT)
}
