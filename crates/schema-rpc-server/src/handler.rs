//! HTTP request handling: routing, body decoding and response encoding

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::request::Parts;
use http::{HeaderValue, Method, Request, Response, StatusCode, header};
use http_body_util::BodyExt;
use hyper::body::Body;
use schema_rpc_protocol::ErrorBody;
use schema_rpc_wire::{BoxError, DecodeOptions, WireError, decode};
use tracing::{debug, warn};

use crate::cors::CorsLayer;
use crate::dispatch::Dispatcher;
use crate::request::RequestMeta;
use crate::response::{RpcBody, empty_body, error_response, text_response};
use crate::server::ServerConfig;

/// Resolve the method name from a request path below `base_path`
pub fn method_from_path<'a>(base_path: &str, path: &'a str) -> Option<&'a str> {
    let rest = path.strip_prefix(base_path.trim_end_matches('/'))?;
    let name = rest.strip_prefix('/')?;
    (!name.is_empty() && !name.contains('/')).then_some(name)
}

/// Serves one dispatcher over HTTP
#[derive(Clone)]
pub struct RpcHttpHandler {
    config: Arc<ServerConfig>,
    dispatcher: Arc<Dispatcher>,
}

impl RpcHttpHandler {
    pub fn new(config: Arc<ServerConfig>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { config, dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn handle_request<B>(&self, req: Request<B>, remote_addr: Option<SocketAddr>) -> Response<RpcBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError> + 'static,
    {
        let (parts, body) = req.into_parts();
        debug!("Handling {} {}", parts.method, parts.uri.path());

        let mut response = self.route(parts, body, remote_addr).await;
        if self.config.enable_cors {
            CorsLayer::apply_cors_headers(response.headers_mut());
        }
        response
    }

    async fn route<B>(&self, parts: Parts, body: B, remote_addr: Option<SocketAddr>) -> Response<RpcBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError> + 'static,
    {
        let path = parts.uri.path().to_string();
        let Some(method) = method_from_path(&self.config.base_path, &path) else {
            return text_response(StatusCode::NOT_FOUND, "Not Found");
        };

        if parts.method == Method::OPTIONS {
            let mut response = Response::new(empty_body());
            *response.status_mut() = StatusCode::NO_CONTENT;
            return response;
        }
        if parts.method != Method::POST {
            let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("POST, OPTIONS"));
            return response;
        }

        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());
        let options = DecodeOptions {
            max_body_size: self.config.max_body_size,
            pipe_capacity: self.config.pipe_capacity,
        };
        let envelope = match decode(content_type, body.into_data_stream(), options).await {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("Failed to decode request for '{}': {}", method, err);
                return error_response(decode_status(&err), &ErrorBody::bad_request(err.to_string()));
            }
        };

        let meta = RequestMeta {
            http_method: parts.method,
            path: path.clone(),
            headers: parts.headers,
            remote_addr,
        };
        self.dispatcher
            .dispatch(method, envelope, &meta)
            .await
            .into_response()
    }
}

fn decode_status(err: &WireError) -> StatusCode {
    match err {
        WireError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        WireError::UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        _ => StatusCode::BAD_REQUEST,
    }
}
