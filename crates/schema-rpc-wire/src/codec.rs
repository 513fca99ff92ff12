//! Multiplexed wire codec
//!
//! A message is either a single JSON document or a `multipart/form-data`
//! body whose `body` part holds the JSON document and whose remaining parts,
//! named by decimal index, carry the bytes of each embedded stream. Inside
//! the JSON document every stream is replaced by `{"$stream": <index>}`.

use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use schema_rpc_protocol::{AttachedStreams, ByteStream, RpcValue, STREAM_PLACEHOLDER_KEY, format_date};
use serde_json::{Map, Value};

use crate::error::{BoxError, WireError, WireResult};
use crate::multipart;
use crate::pipe::DEFAULT_PIPE_CAPACITY;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const MULTIPART_FORM_DATA: &str = "multipart/form-data";

/// Name of the part carrying the JSON document
pub const BODY_PART: &str = "body";

/// Default limit for JSON documents
pub const DEFAULT_MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// A value split into its JSON document and the streams it referenced
#[derive(Debug)]
pub struct Encoded {
    pub body: Value,
    /// Streams in placeholder index order
    pub streams: Vec<ByteStream>,
}

/// Replace every embedded stream with a placeholder, in encounter order
pub fn serialize(value: RpcValue) -> Encoded {
    let mut streams = Vec::new();
    let body = serialize_into(value, &mut streams);
    Encoded { body, streams }
}

fn serialize_into(value: RpcValue, streams: &mut Vec<ByteStream>) -> Value {
    match value {
        RpcValue::Null => Value::Null,
        RpcValue::Bool(b) => Value::Bool(b),
        RpcValue::Number(n) => Value::Number(n),
        RpcValue::String(s) => Value::String(s),
        RpcValue::DateTime(d) => Value::String(format_date(&d)),
        RpcValue::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| serialize_into(item, streams))
                .collect(),
        ),
        RpcValue::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, serialize_into(v, streams)))
                .collect(),
        ),
        RpcValue::Stream(stream) => {
            streams.push(stream);
            let mut placeholder = Map::new();
            placeholder.insert(STREAM_PLACEHOLDER_KEY.to_string(), Value::from(streams.len() - 1));
            Value::Object(placeholder)
        }
    }
}

/// A decoded message: the JSON document plus the streams it referenced
#[derive(Debug)]
pub struct Envelope {
    pub value: Value,
    pub streams: AttachedStreams,
}

impl Envelope {
    pub fn json(value: Value) -> Self {
        Self {
            value,
            streams: AttachedStreams::new(),
        }
    }
}

/// Framing announced by a `Content-Type` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentKind {
    Json,
    Multipart { boundary: String },
}

impl ContentKind {
    /// A missing header is treated as JSON
    pub fn from_content_type(content_type: Option<&str>) -> WireResult<Self> {
        let Some(content_type) = content_type else {
            return Ok(ContentKind::Json);
        };
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            JSON_CONTENT_TYPE => Ok(ContentKind::Json),
            MULTIPART_FORM_DATA => Ok(ContentKind::Multipart {
                boundary: multer::parse_boundary(content_type)?,
            }),
            _ => Err(WireError::UnsupportedContentType(content_type.to_string())),
        }
    }
}

pub type BodyStream = Pin<Box<dyn Stream<Item = WireResult<Bytes>> + Send>>;

/// An encoded message ready to be sent
pub enum OutgoingBody {
    Json(Bytes),
    Multipart { boundary: String, stream: BodyStream },
}

impl OutgoingBody {
    pub fn content_type(&self) -> String {
        match self {
            OutgoingBody::Json(_) => JSON_CONTENT_TYPE.to_string(),
            OutgoingBody::Multipart { boundary, .. } => {
                format!("{}; boundary={}", MULTIPART_FORM_DATA, boundary)
            }
        }
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self, OutgoingBody::Multipart { .. })
    }

    /// The body as a stream of chunks
    pub fn into_stream(self) -> BodyStream {
        match self {
            OutgoingBody::Json(bytes) => Box::pin(futures::stream::once(async move { Ok(bytes) })),
            OutgoingBody::Multipart { stream, .. } => stream,
        }
    }
}

impl std::fmt::Debug for OutgoingBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutgoingBody::Json(bytes) => f.debug_tuple("Json").field(bytes).finish(),
            OutgoingBody::Multipart { boundary, .. } => f
                .debug_struct("Multipart")
                .field("boundary", boundary)
                .finish_non_exhaustive(),
        }
    }
}

/// Encode a value, choosing multipart framing only when it embeds streams
pub fn encode(value: RpcValue) -> WireResult<OutgoingBody> {
    let Encoded { body, streams } = serialize(value);
    let json = Bytes::from(serde_json::to_vec(&body)?);
    if streams.is_empty() {
        Ok(OutgoingBody::Json(json))
    } else {
        Ok(multipart::encode(json, streams))
    }
}

/// Limits applied while decoding
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    /// Maximum size of the JSON document
    pub max_body_size: usize,
    /// Buffered bytes per attached stream before the parser waits
    pub pipe_capacity: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }
}

/// Decode a message body.
///
/// For multipart bodies this returns as soon as the `body` part is parsed;
/// attached streams fill in the background as their parts arrive.
pub async fn decode<S, E>(content_type: Option<&str>, body: S, options: DecodeOptions) -> WireResult<Envelope>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    match ContentKind::from_content_type(content_type)? {
        ContentKind::Json => {
            let bytes = collect_limited(body, options.max_body_size).await?;
            Ok(Envelope::json(parse_json(&bytes)?))
        }
        ContentKind::Multipart { boundary } => multipart::decode(body, boundary, options).await,
    }
}

/// Empty documents decode as `null`
pub(crate) fn parse_json(bytes: &[u8]) -> WireResult<Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(bytes)?)
}

async fn collect_limited<S, E>(body: S, limit: usize) -> WireResult<Bytes>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
{
    let mut body = std::pin::pin!(body);
    let mut buffer = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(WireError::body)?;
        if buffer.len() + chunk.len() > limit {
            return Err(WireError::BodyTooLarge { limit });
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::convert::Infallible;

    fn body_of(bytes: &'static [u8]) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        futures::stream::iter(vec![Ok(Bytes::from_static(bytes))])
    }

    #[test]
    fn test_serialize_replaces_streams_in_order() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), RpcValue::from(ByteStream::empty()));
        map.insert(
            "b".to_string(),
            RpcValue::from(vec![RpcValue::from(1i64), RpcValue::from(ByteStream::empty())]),
        );
        map.insert(
            "at".to_string(),
            RpcValue::from(Utc.with_ymd_and_hms(2018, 1, 1, 18, 0, 0).unwrap()),
        );

        let encoded = serialize(RpcValue::Object(map));
        assert_eq!(
            encoded.body,
            json!({
                "a": {"$stream": 0},
                "at": "2018-01-01T18:00:00.000Z",
                "b": [1, {"$stream": 1}]
            })
        );
        assert_eq!(encoded.streams.len(), 2);
    }

    #[test]
    fn test_content_kind() {
        assert_eq!(ContentKind::from_content_type(None).unwrap(), ContentKind::Json);
        assert_eq!(
            ContentKind::from_content_type(Some("application/json; charset=utf-8")).unwrap(),
            ContentKind::Json
        );
        assert_eq!(
            ContentKind::from_content_type(Some("multipart/form-data; boundary=abc")).unwrap(),
            ContentKind::Multipart {
                boundary: "abc".to_string()
            }
        );
        assert!(matches!(
            ContentKind::from_content_type(Some("text/plain")),
            Err(WireError::UnsupportedContentType(_))
        ));
    }

    #[test]
    fn test_plain_values_encode_as_json() {
        let body = encode(RpcValue::from(json!({"x": 1}))).unwrap();
        assert_eq!(body.content_type(), JSON_CONTENT_TYPE);
        assert!(matches!(body, OutgoingBody::Json(bytes) if bytes == "{\"x\":1}"));
    }

    #[tokio::test]
    async fn test_json_decode_short_circuits() {
        let envelope = decode(Some(JSON_CONTENT_TYPE), body_of(b"{\"args\":{}}"), DecodeOptions::default())
            .await
            .unwrap();
        assert_eq!(envelope.value, json!({"args": {}}));
        assert!(envelope.streams.is_empty());
    }

    #[tokio::test]
    async fn test_empty_json_body_is_null() {
        let envelope = decode(None, body_of(b""), DecodeOptions::default()).await.unwrap();
        assert_eq!(envelope.value, Value::Null);
    }

    #[tokio::test]
    async fn test_json_body_limit() {
        let options = DecodeOptions {
            max_body_size: 4,
            ..DecodeOptions::default()
        };
        let err = decode(None, body_of(b"[1,2,3,4]"), options).await.unwrap_err();
        assert!(matches!(err, WireError::BodyTooLarge { limit: 4 }));
    }
}
