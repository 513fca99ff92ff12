//! Call outcomes and their HTTP responses

use bytes::Bytes;
use futures::TryStreamExt;
use http::{HeaderValue, Response, StatusCode, header};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use schema_rpc_protocol::{ErrorBody, RpcValue};
use schema_rpc_wire::{JSON_CONTENT_TYPE, OutgoingBody, WireError, encode};
use tracing::error;

/// Body type of every response the server emits
pub type RpcBody = UnsyncBoxBody<Bytes, WireError>;

/// Terminal state of one dispatched call
#[derive(Debug)]
pub enum CallOutcome {
    /// The handler returned a value
    Success(RpcValue),
    /// The call was refused before reaching the handler
    Rejected(ErrorBody),
    /// The handler, or context extraction, failed
    Failed(ErrorBody),
}

impl CallOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            CallOutcome::Success(_) => StatusCode::OK,
            CallOutcome::Rejected(_) => StatusCode::BAD_REQUEST,
            CallOutcome::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }

    pub fn error_body(&self) -> Option<&ErrorBody> {
        match self {
            CallOutcome::Success(_) => None,
            CallOutcome::Rejected(body) | CallOutcome::Failed(body) => Some(body),
        }
    }

    pub fn into_response(self) -> Response<RpcBody> {
        let status = self.status();
        match self {
            CallOutcome::Success(value) => match encode(value) {
                Ok(body) => encoded_response(status, body),
                Err(err) => {
                    error!("Failed to encode return value: {}", err);
                    error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        &ErrorBody::internal("Internal Server Error"),
                    )
                }
            },
            CallOutcome::Rejected(body) | CallOutcome::Failed(body) => error_response(status, &body),
        }
    }
}

pub(crate) fn full_body(bytes: impl Into<Bytes>) -> RpcBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub(crate) fn empty_body() -> RpcBody {
    full_body(Bytes::new())
}

fn with_content_type(status: StatusCode, content_type: &str, body: RpcBody) -> Response<RpcBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}

fn encoded_response(status: StatusCode, body: OutgoingBody) -> Response<RpcBody> {
    let content_type = body.content_type();
    let body = match body {
        OutgoingBody::Json(bytes) => full_body(bytes),
        multipart => StreamBody::new(multipart.into_stream().map_ok(Frame::data)).boxed_unsync(),
    };
    with_content_type(status, &content_type, body)
}

/// A JSON error body with the given status
pub fn error_response(status: StatusCode, body: &ErrorBody) -> Response<RpcBody> {
    let bytes = match serde_json::to_vec(body) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("Failed to serialize error body: {}", err);
            Vec::new()
        }
    };
    with_content_type(status, JSON_CONTENT_TYPE, full_body(bytes))
}

/// A plain-text response for requests that never reach the dispatcher
pub(crate) fn text_response(status: StatusCode, text: &'static str) -> Response<RpcBody> {
    with_content_type(status, "text/plain; charset=utf-8", full_body(Bytes::from_static(text.as_bytes())))
}
