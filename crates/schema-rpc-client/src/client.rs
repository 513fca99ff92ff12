//! RPC client for one service class

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use schema_rpc_protocol::{
    CallArgs, ErrorBody, METHOD_NOT_SUPPORTED, MethodSchema, RpcValue, ServiceSchema, VALIDATION_ERROR,
    coerce,
};
use schema_rpc_wire::{ContentKind, DecodeOptions, Envelope, OutgoingBody, WireResult, decode, encode};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Chunks of a streamed request body buffered ahead of the connection
const REQUEST_CHUNK_BUFFER: usize = 4;

/// Builder for [`RpcClient`]
pub struct RpcClientBuilder {
    base_url: String,
    schema: Arc<ServiceSchema>,
    class: String,
    config: ClientConfig,
}

impl RpcClientBuilder {
    pub fn new(base_url: impl Into<String>, schema: Arc<ServiceSchema>, class: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            schema,
            class: class.into(),
            config: ClientConfig::default(),
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a header sent with every call
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.insert(name.into(), value.into());
        self
    }

    pub fn validate_responses(mut self, enabled: bool) -> Self {
        self.config.validate_responses = enabled;
        self
    }

    pub fn build(self) -> ClientResult<RpcClient> {
        let class = self.schema.class(&self.class)?;
        if !class.is_service() {
            return Err(ClientError::config(format!("'{}' is not a service class", self.class)));
        }

        let mut base_url = Url::parse(&self.base_url)
            .map_err(|e| ClientError::config(format!("Invalid base URL '{}': {}", self.base_url, e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &self.config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ClientError::config(format!("Invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ClientError::config(format!("Invalid value for header '{}': {}", name, e)))?;
            headers.insert(name, value);
        }

        let mut http = reqwest::Client::builder()
            .connect_timeout(self.config.timeouts.connect)
            .user_agent(self.config.user_agent.as_str())
            .default_headers(headers);
        if let Some(timeout) = self.config.timeouts.request {
            http = http.timeout(timeout);
        }

        Ok(RpcClient {
            http: http.build()?,
            base_url,
            schema: self.schema,
            class: self.class,
            config: self.config,
        })
    }
}

/// Calls the methods of one service class over HTTP
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    base_url: Url,
    schema: Arc<ServiceSchema>,
    class: String,
    config: ClientConfig,
}

impl RpcClient {
    pub fn builder(
        base_url: impl Into<String>,
        schema: Arc<ServiceSchema>,
        class: impl Into<String>,
    ) -> RpcClientBuilder {
        RpcClientBuilder::new(base_url, schema, class)
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// URL a method is served at
    pub fn endpoint(&self, method: &str) -> ClientResult<Url> {
        self.base_url
            .join(method)
            .map_err(|e| ClientError::config(format!("Invalid method name '{}': {}", method, e)))
    }

    /// Call a method and coerce its return value.
    ///
    /// `context` is sent as the call's `ClientContext`. Arguments embedding
    /// byte streams are sent as a multipart message; so are streamed return
    /// values, which are readable while their bytes are still arriving.
    pub async fn call(&self, method: &str, args: CallArgs, context: Option<RpcValue>) -> ClientResult<RpcValue> {
        let method_schema = self.schema.method(&self.class, method)?;
        let url = self.endpoint(method)?;

        let mut body = BTreeMap::new();
        body.insert("args".to_string(), RpcValue::Object(args.into_present().collect()));
        if let Some(context) = context {
            body.insert("context".to_string(), context);
        }
        let outgoing = encode(RpcValue::Object(body))?;
        debug!("Calling {}.{} ({})", self.class, method, outgoing.content_type());

        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, outgoing.content_type())
            .body(request_body(outgoing))
            .send()
            .await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        if !status.is_success() {
            let body = response.bytes().await?;
            let err = classify_failure(method_schema, status, content_type.as_deref(), &body);
            warn!("Call to {}.{} failed: {}", self.class, method, err);
            return Err(err);
        }

        let options = DecodeOptions {
            max_body_size: self.config.max_body_size,
            pipe_capacity: self.config.pipe_capacity,
        };
        let Envelope { value, mut streams } =
            decode(content_type.as_deref(), response.bytes_stream(), options).await?;

        if self.config.validate_responses {
            method_schema
                .validators
                .returns
                .validate(&value)
                .map_err(|errors| ClientError::InvalidResponse {
                    method: method.to_string(),
                    errors,
                })?;
        }

        Ok(coerce(method_schema.returns, value, self.schema.document(), &mut streams)?)
    }

    /// Call a method and deserialize its return value
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        args: CallArgs,
        context: Option<RpcValue>,
    ) -> ClientResult<T> {
        Ok(self.call(method, args, context).await?.deserialize()?)
    }
}

fn request_body(outgoing: OutgoingBody) -> reqwest::Body {
    match outgoing {
        OutgoingBody::Json(bytes) => reqwest::Body::from(bytes),
        multipart => {
            let (tx, rx) = mpsc::channel::<WireResult<Bytes>>(REQUEST_CHUNK_BUFFER);
            let mut stream = multipart.into_stream();
            tokio::spawn(async move {
                while let Some(chunk) = stream.next().await {
                    let failed = chunk.is_err();
                    if tx.send(chunk).await.is_err() || failed {
                        break;
                    }
                }
            });
            reqwest::Body::wrap_stream(ReceiverStream::new(rx))
        }
    }
}

/// Rebuild the error of a non-2xx response
fn classify_failure(
    method: MethodSchema<'_>,
    status: StatusCode,
    content_type: Option<&str>,
    body: &[u8],
) -> ClientError {
    let is_json = matches!(ContentKind::from_content_type(content_type), Ok(ContentKind::Json));
    let parsed = is_json
        .then(|| serde_json::from_slice::<ErrorBody>(body).ok())
        .flatten();

    match (status, parsed) {
        (StatusCode::BAD_REQUEST, Some(error)) if error.name == VALIDATION_ERROR => ClientError::Validation {
            method: error.method.unwrap_or_else(|| method.name().to_string()),
            errors: error.errors.unwrap_or_default(),
        },
        (StatusCode::BAD_REQUEST, Some(error)) if error.name == METHOD_NOT_SUPPORTED => {
            ClientError::MethodNotSupported(error.method.unwrap_or_else(|| method.name().to_string()))
        }
        (StatusCode::INTERNAL_SERVER_ERROR, Some(error)) if method.method.declares(&error.name) => {
            ClientError::Declared {
                kind: error.name,
                message: error.message,
                stack: error.stack,
            }
        }
        (StatusCode::INTERNAL_SERVER_ERROR, Some(error)) => ClientError::Internal {
            message: error.message,
            stack: error.stack,
        },
        _ => ClientError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(body).into_owned(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Arc<ServiceSchema> {
        Arc::new(
            ServiceSchema::from_value(json!({
                "definitions": {
                    "RuntimeError": {
                        "properties": {"name": {"type": "string"}, "message": {"type": "string"}},
                        "required": ["name", "message"]
                    },
                    "Point": {"properties": {"x": {"type": "number"}}},
                    "Test": {"properties": {"hello": {"properties": {
                        "params": {
                            "properties": {"name": {"type": "string"}},
                            "propertyOrder": ["name"],
                            "required": ["name"]
                        },
                        "returns": {"type": "string"},
                        "throws": {"$ref": "#/definitions/RuntimeError"}
                    }}}}
                }
            }))
            .unwrap(),
        )
    }

    fn classify(status: u16, content_type: Option<&str>, body: &str) -> ClientError {
        let schema = schema();
        let method = schema.method("Test", "hello").unwrap();
        classify_failure(
            method,
            StatusCode::from_u16(status).unwrap(),
            content_type,
            body.as_bytes(),
        )
    }

    #[test]
    fn test_declared_exception_is_rebuilt() {
        let err = classify(500, Some("application/json"), r#"{"name":"RuntimeError","message":"heh"}"#);
        assert!(matches!(err, ClientError::Declared { kind, message, .. } if kind == "RuntimeError" && message == "heh"));
    }

    #[test]
    fn test_undeclared_names_are_internal() {
        let err = classify(500, Some("application/json"), r#"{"name":"TypeError","message":"x"}"#);
        assert!(matches!(err, ClientError::Internal { message, .. } if message == "x"));

        let err = classify(
            500,
            Some("application/json"),
            r#"{"name":"InternalServerError","message":"Internal Server Error"}"#,
        );
        assert!(matches!(err, ClientError::Internal { .. }));
    }

    #[test]
    fn test_validation_and_unsupported_method() {
        let err = classify(
            400,
            Some("application/json"),
            r#"{"name":"ValidationError","message":"Bad Request","method":"hello","errors":[{"path":"/args/name","reason":"must be string, found number"}]}"#,
        );
        let ClientError::Validation { method, errors } = err else {
            panic!("expected validation error");
        };
        assert_eq!(method, "hello");
        assert_eq!(errors[0].path, "/args/name");

        let err = classify(
            400,
            Some("application/json"),
            r#"{"name":"MethodNotSupported","message":"Method not supported","method":"nope"}"#,
        );
        assert!(matches!(err, ClientError::MethodNotSupported(m) if m == "nope"));
    }

    #[test]
    fn test_non_conforming_responses_are_forwarded() {
        let err = classify(500, Some("text/html"), "<h1>oops</h1>");
        assert!(matches!(err, ClientError::Status { status: 500, ref body } if body == "<h1>oops</h1>"));

        let err = classify(500, Some("application/json"), "");
        assert!(matches!(err, ClientError::Status { status: 500, .. }));

        let err = classify(502, Some("application/json"), r#"{"name":"RuntimeError","message":"heh"}"#);
        assert!(matches!(err, ClientError::Status { status: 502, .. }));
    }

    #[test]
    fn test_builder_checks() {
        let client = RpcClient::builder("http://localhost:8080/api", schema(), "Test")
            .build()
            .unwrap();
        assert_eq!(client.endpoint("hello").unwrap().as_str(), "http://localhost:8080/api/hello");

        let err = RpcClient::builder("not a url", schema(), "Test").build().unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));

        let err = RpcClient::builder("http://localhost", schema(), "Point").build().unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));

        let err = RpcClient::builder("http://localhost", schema(), "Test")
            .header("bad header", "x")
            .build()
            .unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[tokio::test]
    async fn test_unknown_method_fails_locally() {
        let client = RpcClient::builder("http://localhost:1", schema(), "Test").build().unwrap();
        let err = client.call("nope", CallArgs::new(), None).await.unwrap_err();
        assert!(matches!(err, ClientError::Schema(_)));
    }
}
