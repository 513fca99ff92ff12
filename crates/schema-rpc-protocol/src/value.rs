//! Typed runtime values
//!
//! [`RpcValue`] is what handlers receive and return: plain JSON data extended
//! with native date-times and byte streams. Streams never appear in JSON text;
//! the wire codec swaps them for placeholders.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::error::ValueError;

/// Render a date-time the way it travels on the wire
pub fn format_date(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a wire date-time string
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Failure observed while reading a byte stream
#[derive(Debug, Error)]
pub enum StreamError {
    /// The producer went away before the stream was complete
    #[error("Stream aborted: {0}")]
    Aborted(String),

    #[error("Stream I/O error: {0}")]
    Io(#[from] io::Error),
}

type BoxedChunks = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

/// An owned, single-consumer stream of byte chunks
pub struct ByteStream {
    inner: BoxedChunks,
}

impl ByteStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, StreamError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// A stream yielding `data` as a single chunk
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self::new(stream::iter((!data.is_empty()).then_some(Ok(data))))
    }

    /// A stream yielding the given chunks in order
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
        I::IntoIter: Send + 'static,
    {
        Self::new(stream::iter(chunks.into_iter().map(Ok)))
    }

    pub fn empty() -> Self {
        Self::new(stream::empty())
    }

    /// Read the whole stream into memory
    pub async fn collect_bytes(mut self) -> Result<Bytes, StreamError> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.inner.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ByteStream { .. }")
    }
}

impl Stream for ByteStream {
    type Item = Result<Bytes, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Streams decoded from a message, keyed by placeholder index
#[derive(Debug, Default)]
pub struct AttachedStreams {
    streams: BTreeMap<usize, ByteStream>,
}

impl AttachedStreams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: usize, stream: ByteStream) {
        self.streams.insert(index, stream);
    }

    /// Remove the stream for `index`; each stream can be taken once
    pub fn take(&mut self, index: usize) -> Option<ByteStream> {
        self.streams.remove(&index)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

/// A value exchanged with handlers and callers
#[derive(Debug)]
pub enum RpcValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<RpcValue>),
    Object(BTreeMap<String, RpcValue>),
    DateTime(DateTime<Utc>),
    Stream(ByteStream),
}

impl RpcValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RpcValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RpcValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RpcValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RpcValue::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RpcValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self {
            RpcValue::DateTime(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[RpcValue]> {
        match self {
            RpcValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, RpcValue>> {
        match self {
            RpcValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&RpcValue> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Move a stream out of this value
    pub fn into_stream(self) -> Option<ByteStream> {
        match self {
            RpcValue::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    /// Whether a stream is embedded anywhere in this value
    pub fn contains_stream(&self) -> bool {
        match self {
            RpcValue::Stream(_) => true,
            RpcValue::Array(items) => items.iter().any(RpcValue::contains_stream),
            RpcValue::Object(map) => map.values().any(RpcValue::contains_stream),
            _ => false,
        }
    }

    /// Convert to plain JSON, rendering dates as wire strings
    pub fn into_json(self) -> Result<Value, ValueError> {
        Ok(match self {
            RpcValue::Null => Value::Null,
            RpcValue::Bool(b) => Value::Bool(b),
            RpcValue::Number(n) => Value::Number(n),
            RpcValue::String(s) => Value::String(s),
            RpcValue::DateTime(d) => Value::String(format_date(&d)),
            RpcValue::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(RpcValue::into_json)
                    .collect::<Result<_, _>>()?,
            ),
            RpcValue::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| Ok((k, v.into_json()?)))
                    .collect::<Result<Map<_, _>, ValueError>>()?,
            ),
            RpcValue::Stream(_) => return Err(ValueError::UnexpectedStream),
        })
    }

    /// Deserialize into a plain data type
    pub fn deserialize<T: DeserializeOwned>(self) -> Result<T, ValueError> {
        Ok(serde_json::from_value(self.into_json()?)?)
    }

    /// Build from any serializable data type
    pub fn serialize<T: Serialize>(value: &T) -> Result<Self, ValueError> {
        Ok(serde_json::to_value(value)?.into())
    }
}

/// Streams compare unequal to everything, including themselves
impl PartialEq for RpcValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RpcValue::Null, RpcValue::Null) => true,
            (RpcValue::Bool(a), RpcValue::Bool(b)) => a == b,
            (RpcValue::Number(a), RpcValue::Number(b)) => a == b,
            (RpcValue::String(a), RpcValue::String(b)) => a == b,
            (RpcValue::Array(a), RpcValue::Array(b)) => a == b,
            (RpcValue::Object(a), RpcValue::Object(b)) => a == b,
            (RpcValue::DateTime(a), RpcValue::DateTime(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Value> for RpcValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => RpcValue::Null,
            Value::Bool(b) => RpcValue::Bool(b),
            Value::Number(n) => RpcValue::Number(n),
            Value::String(s) => RpcValue::String(s),
            Value::Array(items) => RpcValue::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                RpcValue::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<()> for RpcValue {
    fn from(_: ()) -> Self {
        RpcValue::Null
    }
}

impl From<bool> for RpcValue {
    fn from(value: bool) -> Self {
        RpcValue::Bool(value)
    }
}

impl From<i64> for RpcValue {
    fn from(value: i64) -> Self {
        RpcValue::Number(value.into())
    }
}

impl From<u64> for RpcValue {
    fn from(value: u64) -> Self {
        RpcValue::Number(value.into())
    }
}

impl From<f64> for RpcValue {
    /// Non-finite values become `Null`
    fn from(value: f64) -> Self {
        Number::from_f64(value).map_or(RpcValue::Null, RpcValue::Number)
    }
}

impl From<&str> for RpcValue {
    fn from(value: &str) -> Self {
        RpcValue::String(value.to_string())
    }
}

impl From<String> for RpcValue {
    fn from(value: String) -> Self {
        RpcValue::String(value)
    }
}

impl From<DateTime<Utc>> for RpcValue {
    fn from(value: DateTime<Utc>) -> Self {
        RpcValue::DateTime(value)
    }
}

impl From<ByteStream> for RpcValue {
    fn from(value: ByteStream) -> Self {
        RpcValue::Stream(value)
    }
}

impl<T: Into<RpcValue>> From<Vec<T>> for RpcValue {
    fn from(values: Vec<T>) -> Self {
        RpcValue::Array(values.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, RpcValue>> for RpcValue {
    fn from(map: BTreeMap<String, RpcValue>) -> Self {
        RpcValue::Object(map)
    }
}
