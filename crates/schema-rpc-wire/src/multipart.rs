//! `multipart/form-data` framing for messages carrying byte streams
//!
//! Decoding runs a background task that owns the parser. The `body` part is
//! parsed and handed back as soon as it is complete; every stream part is
//! then copied into the pipe registered for its index, so the reader applies
//! backpressure to the parser. Parts that arrive before the `body` part are
//! buffered in full because nothing can consume them yet; together they may
//! not exceed the message's body size limit.

use std::collections::{BTreeSet, HashMap};

use async_stream::try_stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use multer::{Constraints, Field, Multipart, SizeLimit};
use schema_rpc_protocol::{AttachedStreams, ByteStream, StreamError, placeholder_index};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::codec::{BODY_PART, DecodeOptions, Envelope, JSON_CONTENT_TYPE, OutgoingBody, parse_json};
use crate::error::{BoxError, WireError, WireResult};
use crate::pipe::{PipeReader, PipeWriter, pipe, unbounded_pipe};

const OCTET_STREAM: &str = "application/octet-stream";

pub(crate) fn encode(body: Bytes, streams: Vec<ByteStream>) -> OutgoingBody {
    let boundary = format!("schema-rpc-{}", Uuid::new_v4().simple());
    let stream = Box::pin(body_stream(boundary.clone(), body, streams));
    OutgoingBody::Multipart { boundary, stream }
}

fn part_header(boundary: &str, name: &str, content_type: &str, first: bool) -> Bytes {
    let lead = if first { "" } else { "\r\n" };
    Bytes::from(format!(
        "{lead}--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\nContent-Type: {content_type}\r\n\r\n"
    ))
}

fn body_stream(
    boundary: String,
    body: Bytes,
    streams: Vec<ByteStream>,
) -> impl Stream<Item = WireResult<Bytes>> + Send + 'static {
    try_stream! {
        yield part_header(&boundary, BODY_PART, JSON_CONTENT_TYPE, true);
        yield body;
        for (index, mut stream) in streams.into_iter().enumerate() {
            yield part_header(&boundary, &index.to_string(), OCTET_STREAM, false);
            while let Some(chunk) = stream.next().await {
                yield chunk?;
            }
        }
        yield Bytes::from(format!("\r\n--{boundary}--\r\n"));
    }
}

pub(crate) async fn decode<S, E>(body: S, boundary: String, options: DecodeOptions) -> WireResult<Envelope>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    let constraints = Constraints::new()
        .size_limit(SizeLimit::new().for_field(BODY_PART, options.max_body_size as u64));
    let multipart = Multipart::with_constraints(body, boundary, constraints);
    let (reply, envelope) = oneshot::channel();
    tokio::spawn(pump(multipart, reply, options));
    envelope.await.map_err(|_| WireError::MissingBodyPart)?
}

async fn pump(mut multipart: Multipart<'static>, reply: oneshot::Sender<WireResult<Envelope>>, options: DecodeOptions) {
    let mut demux = Demux {
        reply: Some(reply),
        pipe_capacity: options.pipe_capacity,
        body_limit: options.max_body_size,
        early_budget: options.max_body_size,
        early: HashMap::new(),
        expected: HashMap::new(),
    };
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return demux.fail(err.into()),
        };
        if let Err(err) = demux.route(field).await {
            return demux.fail(err);
        }
    }
    demux.finish();
}

/// Every distinct placeholder index in a document
fn placeholder_indices(value: &Value) -> BTreeSet<usize> {
    fn walk(value: &Value, found: &mut BTreeSet<usize>) {
        if let Some(index) = placeholder_index(value) {
            found.insert(index);
            return;
        }
        match value {
            Value::Array(items) => items.iter().for_each(|item| walk(item, found)),
            Value::Object(map) => map.values().for_each(|item| walk(item, found)),
            _ => {}
        }
    }
    let mut found = BTreeSet::new();
    walk(value, &mut found);
    found
}

struct Demux {
    /// Present until the body part has been delivered
    reply: Option<oneshot::Sender<WireResult<Envelope>>>,
    pipe_capacity: usize,
    body_limit: usize,
    /// Bytes still allowed for stream parts arriving before the body part
    early_budget: usize,
    /// Stream parts that arrived before the body part
    early: HashMap<usize, PipeReader>,
    /// Stream parts referenced by the body that have not arrived yet
    expected: HashMap<usize, PipeWriter>,
}

impl Demux {
    async fn route(&mut self, field: Field<'static>) -> WireResult<()> {
        let name = field.name().unwrap_or_default().to_string();
        if name == BODY_PART && self.reply.is_some() {
            let bytes = field.bytes().await?;
            self.deliver_body(&bytes);
            return Ok(());
        }

        let Ok(index) = name.parse::<usize>() else {
            warn!(part = %name, "Ignoring unexpected multipart part");
            return Ok(drain(field).await?);
        };

        if self.reply.is_some() {
            if self.early.contains_key(&index) {
                warn!(part = index, "Ignoring duplicate stream part");
                return Ok(drain(field).await?);
            }
            let (writer, reader) = unbounded_pipe();
            self.early.insert(index, reader);
            return buffer_early(field, writer, &mut self.early_budget, self.body_limit).await;
        }

        match self.expected.remove(&index) {
            Some(writer) => Ok(copy(field, writer).await?),
            None => {
                debug!(part = index, "Discarding stream part not referenced by the body");
                Ok(drain(field).await?)
            }
        }
    }

    fn deliver_body(&mut self, bytes: &[u8]) {
        let Some(reply) = self.reply.take() else {
            return;
        };
        let result = parse_json(bytes).map(|value| {
            let mut streams = AttachedStreams::new();
            for index in placeholder_indices(&value) {
                let reader = self.early.remove(&index).unwrap_or_else(|| {
                    let (writer, reader) = pipe(self.pipe_capacity);
                    self.expected.insert(index, writer);
                    reader
                });
                streams.insert(index, reader.into_byte_stream());
            }
            Envelope { value, streams }
        });
        if reply.send(result).is_err() {
            debug!("Decoder went away before the body part was delivered");
        }
    }

    fn fail(mut self, err: WireError) {
        let err = match err {
            WireError::Multipart(multer::Error::FieldSizeExceeded { .. }) => WireError::BodyTooLarge {
                limit: self.body_limit,
            },
            other => other,
        };
        let reason = err.to_string();
        warn!(error = %reason, "Multipart message failed");
        for (_, writer) in self.expected.drain() {
            writer.abort(reason.clone());
        }
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Err(err));
        }
    }

    fn finish(mut self) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Err(WireError::MissingBodyPart));
        }
        for (index, writer) in self.expected {
            writer.abort(format!("part {} missing from message", index));
        }
    }
}

/// Copy a part that arrived before the body, charging it against `budget`
async fn buffer_early(mut field: Field<'static>, mut writer: PipeWriter, budget: &mut usize, limit: usize) -> WireResult<()> {
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                writer.close();
                return Ok(());
            }
            Err(err) => {
                writer.abort(err.to_string());
                return Err(err.into());
            }
        };
        if chunk.len() > *budget {
            writer.abort("parts before the body exceed the size limit");
            return Err(WireError::BodyTooLarge { limit });
        }
        *budget -= chunk.len();
        writer.write(chunk).await.map_err(StreamError::from)?;
    }
}

async fn copy(mut field: Field<'static>, mut writer: PipeWriter) -> Result<(), multer::Error> {
    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                if let Err(err) = writer.write(chunk).await {
                    debug!(error = %err, "Discarding rest of stream part");
                    return drain(field).await;
                }
            }
            Ok(None) => {
                writer.close();
                return Ok(());
            }
            Err(err) => {
                writer.abort(err.to_string());
                return Err(err);
            }
        }
    }
}

async fn drain(mut field: Field<'static>) -> Result<(), multer::Error> {
    while field.chunk().await?.is_some() {}
    Ok(())
}
