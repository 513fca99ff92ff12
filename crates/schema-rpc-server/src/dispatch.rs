//! Per-call state machine of a service class.
//!
//! A call moves through `Routed → ContextAssembled → Validated → Invoked`
//! and ends as a [`CallOutcome`]. The method table is built once from the
//! compiled schema; every method the class declares must have a handler.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use schema_rpc_protocol::{
    AttachedStreams, CLIENT_CONTEXT, CallArgs, ErrorBody, MethodSchema, RpcValue, SERVER_ONLY_CONTEXT,
    ServiceSchema, Validator, Violation, coerce, definition_ref,
};
use schema_rpc_wire::Envelope;
use serde_json::{Map, Value, json};
use tracing::{debug, error, warn};

use crate::error::{HandlerError, HttpRpcError, Result};
use crate::method::{ContextExtractor, FunctionHandler, MethodHandler};
use crate::request::RequestMeta;
use crate::response::CallOutcome;

const ARGS_FIELD: &str = "args";
const CONTEXT_FIELD: &str = "context";
const ELIDED_MESSAGE: &str = "Internal Server Error";

pub struct DispatcherBuilder {
    schema: Arc<ServiceSchema>,
    class: String,
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
    extractor: Option<Arc<dyn ContextExtractor>>,
    stack_trace_in_error: bool,
}

impl DispatcherBuilder {
    pub fn new(schema: Arc<ServiceSchema>, class: impl Into<String>) -> Self {
        Self {
            schema,
            class: class.into(),
            handlers: HashMap::new(),
            extractor: None,
            stack_trace_in_error: false,
        }
    }

    /// Register a closure for one method
    pub fn method<F, Fut>(self, name: impl Into<String>, handler_fn: F) -> Self
    where
        F: Fn(Option<RpcValue>, CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<RpcValue, HandlerError>> + Send + 'static,
    {
        self.handler(name, FunctionHandler::new(handler_fn))
    }

    /// Register a handler value for one method
    pub fn handler<H>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        H: MethodHandler + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn context_extractor<E>(mut self, extractor: E) -> Self
    where
        E: ContextExtractor + 'static,
    {
        self.extractor = Some(Arc::new(extractor));
        self
    }

    /// Include messages and stack traces of internal errors in responses
    pub fn stack_trace_in_error(mut self, enabled: bool) -> Self {
        self.stack_trace_in_error = enabled;
        self
    }

    pub fn build(self) -> Result<Dispatcher> {
        let class = self.schema.class(&self.class)?;
        if !class.is_service() {
            return Err(HttpRpcError::NotAService { class: self.class });
        }
        for method in &class.methods {
            if !self.handlers.contains_key(&method.name) {
                return Err(HttpRpcError::MissingHandler {
                    class: self.class.clone(),
                    method: method.name.clone(),
                });
            }
        }
        if let Some(extra) = self.handlers.keys().find(|name| class.method(name).is_none()) {
            return Err(HttpRpcError::UnknownMethod {
                class: self.class.clone(),
                method: extra.clone(),
            });
        }

        let spec = self.schema.spec();
        if spec.server_only_context.is_some() && self.extractor.is_none() {
            return Err(HttpRpcError::MissingContextExtractor);
        }
        let client_context = spec
            .client_context
            .as_ref()
            .and_then(|_| self.schema.interface_validator(CLIENT_CONTEXT));
        let has_context = spec.server_context.is_some();
        let extractor = if spec.server_only_context.is_some() {
            self.extractor
        } else {
            None
        };

        debug!(
            class = %self.class,
            methods = self.handlers.len(),
            has_context,
            "Built dispatcher"
        );

        Ok(Dispatcher {
            schema: self.schema,
            class: self.class,
            handlers: self.handlers,
            client_context,
            extractor,
            has_context,
            stack_trace_in_error: self.stack_trace_in_error,
        })
    }
}

/// Routes calls on one service class to their handlers
pub struct Dispatcher {
    schema: Arc<ServiceSchema>,
    class: String,
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
    client_context: Option<Validator>,
    extractor: Option<Arc<dyn ContextExtractor>>,
    has_context: bool,
    stack_trace_in_error: bool,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("class", &self.class)
            .field("methods", &self.methods())
            .field("stack_trace_in_error", &self.stack_trace_in_error)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn builder(schema: Arc<ServiceSchema>, class: impl Into<String>) -> DispatcherBuilder {
        DispatcherBuilder::new(schema, class)
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn schema(&self) -> &ServiceSchema {
        &self.schema
    }

    /// Registered method names, sorted
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run one call to completion
    pub async fn dispatch(&self, method: &str, envelope: Envelope, request: &RequestMeta) -> CallOutcome {
        let (Some(handler), Ok(method_schema)) = (
            self.handlers.get(method),
            self.schema.method(&self.class, method),
        ) else {
            warn!("Method not supported: {}.{}", self.class, method);
            return CallOutcome::Rejected(ErrorBody::method_not_supported(method));
        };
        debug!("Dispatching {}.{}", self.class, method);

        let Envelope { value, mut streams } = envelope;
        let (args, client_context) = match split_body(value) {
            Ok(parts) => parts,
            Err(violation) => return self.reject(method, vec![violation]),
        };

        let mut violations = Vec::new();
        if let Some(validator) = &self.client_context {
            let context = client_context.clone().unwrap_or_else(|| json!({}));
            if let Err(errors) = validator.validate(&context) {
                violations.extend(errors.into_iter().map(|e| e.under("/context")));
            }
        }
        if let Err(errors) = method_schema.validators.params.validate(&args) {
            violations.extend(errors.into_iter().map(|e| e.under("/args")));
        }
        if !violations.is_empty() {
            return self.reject(method, violations);
        }

        let context = match self
            .assemble_context(method, client_context, request, &mut streams)
            .await
        {
            Ok(context) => context,
            Err(outcome) => return outcome,
        };

        let call_args = match self.coerce_args(method_schema, args, &mut streams) {
            Ok(call_args) => call_args,
            Err(violation) => return self.reject(method, vec![violation]),
        };

        match AssertUnwindSafe(handler.call(context, call_args)).catch_unwind().await {
            Ok(Ok(value)) => CallOutcome::Success(value),
            Ok(Err(err)) => CallOutcome::Failed(self.classify(method_schema, err)),
            Err(panic) => {
                let err = HandlerError::internal(format!("handler panicked: {}", panic_message(panic.as_ref())));
                error!("{}.{} {}", self.class, method, err);
                CallOutcome::Failed(self.internal(&err))
            }
        }
    }

    fn reject(&self, method: &str, violations: Vec<Violation>) -> CallOutcome {
        warn!(
            "Rejected {}.{}: {} violation(s)",
            self.class,
            method,
            violations.len()
        );
        CallOutcome::Rejected(ErrorBody::validation(method, violations))
    }

    /// Merge the caller's context with the server-derived one, server fields winning
    async fn assemble_context(
        &self,
        method: &str,
        client_context: Option<Value>,
        request: &RequestMeta,
        streams: &mut AttachedStreams,
    ) -> std::result::Result<Option<RpcValue>, CallOutcome> {
        if !self.has_context {
            return Ok(None);
        }

        let mut merged = BTreeMap::new();
        if self.client_context.is_some() {
            let fragment = json!({ "$ref": definition_ref(CLIENT_CONTEXT) });
            let value = client_context.unwrap_or_else(|| json!({}));
            match coerce(&fragment, value, self.schema.document(), streams) {
                Ok(RpcValue::Object(fields)) => merged.extend(fields),
                Ok(_) => {}
                Err(err) => {
                    return Err(self.reject(method, vec![violation("/context", err.to_string())]));
                }
            }
        }

        if let Some(extractor) = &self.extractor {
            let extracted = extractor.extract(request).await.map_err(|err| {
                warn!("Context extraction failed: {}", err);
                CallOutcome::Failed(self.internal(&err))
            })?;
            let fragment = json!({ "$ref": definition_ref(SERVER_ONLY_CONTEXT) });
            match coerce(&fragment, extracted, self.schema.document(), streams) {
                Ok(RpcValue::Object(fields)) => merged.extend(fields),
                Ok(_) => warn!("Context extractor returned a non-object value"),
                Err(err) => {
                    return Err(CallOutcome::Failed(
                        self.internal(&HandlerError::internal(err.to_string())),
                    ));
                }
            }
        }

        Ok(Some(RpcValue::Object(merged)))
    }

    fn coerce_args(
        &self,
        method: MethodSchema<'_>,
        args: Value,
        streams: &mut AttachedStreams,
    ) -> std::result::Result<CallArgs, Violation> {
        let mut supplied = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let mut call_args = CallArgs::new();
        for parameter in method.parameters() {
            let value = match (supplied.remove(&parameter.name), method.parameter_fragment(&parameter.name)) {
                (Some(raw), Some(fragment)) => Some(
                    coerce(fragment, raw, self.schema.document(), streams)
                        .map_err(|err| violation(&format!("/args/{}", parameter.name), err.to_string()))?,
                ),
                (Some(raw), None) => Some(RpcValue::from(raw)),
                (None, _) => None,
            };
            call_args.push(parameter.name.clone(), value);
        }
        Ok(call_args)
    }

    /// Map a handler error to the body reported to the caller
    fn classify(&self, method: MethodSchema<'_>, err: HandlerError) -> ErrorBody {
        match err.kind() {
            Some(kind) if method.method.declares(kind) => {
                debug!("{}.{} raised declared {}", self.class, method.name(), kind);
                let stack = err
                    .stack()
                    .filter(|_| self.stack_trace_in_error)
                    .map(str::to_string);
                ErrorBody::new(kind, err.message()).with_stack(stack)
            }
            _ => {
                warn!("{}.{} failed: {}", self.class, method.name(), err);
                self.internal(&err)
            }
        }
    }

    fn internal(&self, err: &HandlerError) -> ErrorBody {
        if self.stack_trace_in_error {
            ErrorBody::internal(err.message()).with_stack(err.stack().map(str::to_string))
        } else {
            ErrorBody::internal(ELIDED_MESSAGE)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Split a request document into its `args` and `context` members
fn split_body(value: Value) -> std::result::Result<(Value, Option<Value>), Violation> {
    match value {
        Value::Null => Ok((json!({}), None)),
        Value::Object(mut body) => {
            let args = match body.remove(ARGS_FIELD) {
                None | Some(Value::Null) => json!({}),
                Some(args) => args,
            };
            Ok((args, body.remove(CONTEXT_FIELD)))
        }
        _ => Err(violation("", "request body must be an object")),
    }
}

fn violation(path: &str, reason: impl Into<String>) -> Violation {
    Violation {
        path: path.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use schema_rpc_protocol::ByteStream;
    use schema_rpc_protocol::{INTERNAL_SERVER_ERROR, METHOD_NOT_SUPPORTED, VALIDATION_ERROR};

    fn schema(extra: Value) -> Arc<ServiceSchema> {
        let mut definitions = json!({
            "RuntimeError": {
                "properties": {"name": {"type": "string"}, "message": {"type": "string"}},
                "required": ["name", "message"]
            },
            "Test": {"properties": {
                "hello": {"properties": {
                    "params": {
                        "properties": {"name": {"type": "string", "minLength": 1}},
                        "propertyOrder": ["name"],
                        "required": ["name"]
                    },
                    "returns": {"type": "string"},
                    "throws": {"$ref": "#/definitions/RuntimeError"}
                }},
                "later": {"properties": {
                    "params": {
                        "properties": {
                            "at": {"type": "string", "format": "date-time"},
                            "note": {"type": "string"}
                        },
                        "propertyOrder": ["at", "note"],
                        "required": ["at"]
                    },
                    "returns": {"type": "string", "format": "date-time"}
                }}
            }}
        });
        if let (Some(defs), Value::Object(extra)) = (definitions.as_object_mut(), extra) {
            defs.extend(extra);
        }
        Arc::new(ServiceSchema::from_value(json!({ "definitions": definitions })).unwrap())
    }

    fn dispatcher(schema: Arc<ServiceSchema>) -> DispatcherBuilder {
        Dispatcher::builder(schema, "Test")
            .method("hello", |context: Option<RpcValue>, mut args: CallArgs| async move {
                let name = args.take_required("name")?;
                match name.as_str() {
                    Some("throw") => Err(HandlerError::raise("RuntimeError", "heh")),
                    Some("crash") => Err(HandlerError::raise("TypeError", "secret").with_stack("at crash")),
                    Some(name) => {
                        let suffix = context
                            .as_ref()
                            .map(|ctx| {
                                format!(
                                    " {} {}",
                                    ctx.get("debugId").and_then(RpcValue::as_str).unwrap_or("-"),
                                    ctx.get("ip").and_then(RpcValue::as_str).unwrap_or("-")
                                )
                            })
                            .unwrap_or_default();
                        Ok(RpcValue::from(format!("Hello {}{}", name, suffix)))
                    }
                    None => Err(HandlerError::internal("name is not a string")),
                }
            })
            .method("later", |_context: Option<RpcValue>, args: CallArgs| async move {
                let at = args.get("at").and_then(RpcValue::as_datetime).copied();
                assert!(args.get("note").is_none());
                let at = at.ok_or_else(|| HandlerError::internal("at was not coerced"))?;
                Ok::<_, HandlerError>(RpcValue::from(at + chrono::Duration::hours(1)))
            })
    }

    async fn call(dispatcher: &Dispatcher, method: &str, body: Value) -> CallOutcome {
        dispatcher
            .dispatch(method, Envelope::json(body), &RequestMeta::new(format!("/{}", method)))
            .await
    }

    #[tokio::test]
    async fn test_success() {
        let d = dispatcher(schema(json!({}))).build().unwrap();
        let outcome = call(&d, "hello", json!({"args": {"name": "vova"}})).await;
        assert!(matches!(outcome, CallOutcome::Success(v) if v == RpcValue::from("Hello vova")));
    }

    #[tokio::test]
    async fn test_date_arguments_are_coerced() {
        let d = dispatcher(schema(json!({}))).build().unwrap();
        let outcome = call(&d, "later", json!({"args": {"at": "2018-01-01T18:00:00.000Z"}})).await;
        let CallOutcome::Success(value) = outcome else {
            panic!("expected success");
        };
        assert_eq!(
            value.as_datetime().copied(),
            Some(Utc.with_ymd_and_hms(2018, 1, 1, 19, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let d = dispatcher(schema(json!({}))).build().unwrap();
        let outcome = call(&d, "nope", json!({"args": {}})).await;
        assert_eq!(outcome.status(), http::StatusCode::BAD_REQUEST);
        let body = outcome.error_body().unwrap();
        assert_eq!(body.name, METHOD_NOT_SUPPORTED);
        assert_eq!(body.message, "Method not supported");
        assert_eq!(body.method.as_deref(), Some("nope"));
    }

    #[tokio::test]
    async fn test_validation_failure() {
        let d = dispatcher(schema(json!({}))).build().unwrap();
        let outcome = call(&d, "hello", json!({"args": {"name": ""}})).await;
        assert_eq!(outcome.status(), http::StatusCode::BAD_REQUEST);
        let body = outcome.error_body().unwrap();
        assert_eq!(body.name, VALIDATION_ERROR);
        assert_eq!(body.method.as_deref(), Some("hello"));
        let errors = body.errors.as_ref().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "/args/name");

        let outcome = call(&d, "hello", json!(["not", "an", "object"])).await;
        assert_eq!(outcome.error_body().unwrap().name, VALIDATION_ERROR);

        let outcome = call(&d, "hello", Value::Null).await;
        let errors = outcome.error_body().unwrap().errors.clone().unwrap();
        assert_eq!(errors[0].reason, "must have required property 'name'");
    }

    #[tokio::test]
    async fn test_declared_and_undeclared_errors() {
        let d = dispatcher(schema(json!({}))).build().unwrap();

        let outcome = call(&d, "hello", json!({"args": {"name": "throw"}})).await;
        assert_eq!(outcome.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
        let body = outcome.error_body().unwrap();
        assert_eq!((body.name.as_str(), body.message.as_str()), ("RuntimeError", "heh"));

        let outcome = call(&d, "hello", json!({"args": {"name": "crash"}})).await;
        let body = outcome.error_body().unwrap();
        assert_eq!(body.name, INTERNAL_SERVER_ERROR);
        assert_eq!(body.message, ELIDED_MESSAGE);
        assert_eq!(body.stack, None);
    }

    #[tokio::test]
    async fn test_stack_trace_in_error() {
        let d = dispatcher(schema(json!({})))
            .stack_trace_in_error(true)
            .build()
            .unwrap();
        let outcome = call(&d, "hello", json!({"args": {"name": "crash"}})).await;
        let body = outcome.error_body().unwrap();
        assert_eq!(body.name, INTERNAL_SERVER_ERROR);
        assert_eq!(body.message, "secret");
        assert_eq!(body.stack.as_deref(), Some("at crash"));
    }

    fn context_definitions() -> Value {
        json!({
            "ClientContext": {
                "properties": {"debugId": {"type": "string"}},
                "required": ["debugId"]
            },
            "ServerOnlyContext": {
                "properties": {"ip": {"type": "string"}},
                "required": ["ip"]
            }
        })
    }

    #[tokio::test]
    async fn test_context_merge() {
        let d = dispatcher(schema(context_definitions()))
            .context_extractor(|_: &RequestMeta| -> std::result::Result<Value, HandlerError> {
                Ok(json!({"ip": "test"}))
            })
            .build()
            .unwrap();
        let outcome = call(
            &d,
            "hello",
            json!({"args": {"name": "vova"}, "context": {"debugId": "666"}}),
        )
        .await;
        assert!(matches!(outcome, CallOutcome::Success(v) if v == RpcValue::from("Hello vova 666 test")));
    }

    #[tokio::test]
    async fn test_server_context_wins_on_collision() {
        let extra = json!({
            "ClientContext": {"properties": {"ip": {"type": "string"}}},
            "ServerOnlyContext": {"properties": {"ip": {"type": "string"}}}
        });
        let d = dispatcher(schema(extra))
            .context_extractor(|_: &RequestMeta| -> std::result::Result<Value, HandlerError> {
                Ok(json!({"ip": "server"}))
            })
            .build()
            .unwrap();
        let outcome = call(&d, "hello", json!({"args": {"name": "x"}, "context": {"ip": "client"}})).await;
        assert!(matches!(outcome, CallOutcome::Success(v) if v == RpcValue::from("Hello x - server")));
    }

    #[tokio::test]
    async fn test_invalid_client_context() {
        let extra = json!({"ClientContext": context_definitions()["ClientContext"].clone()});
        let d = dispatcher(schema(extra)).build().unwrap();
        let outcome = call(&d, "hello", json!({"args": {"name": "vova"}})).await;
        let errors = outcome.error_body().unwrap().errors.clone().unwrap();
        assert_eq!(errors[0].path, "/context");
    }

    #[test]
    fn test_build_checks_the_method_table() {
        let err = Dispatcher::builder(schema(json!({})), "Test")
            .method("hello", |_: Option<RpcValue>, _: CallArgs| async {
                Ok::<_, HandlerError>(RpcValue::Null)
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, HttpRpcError::MissingHandler { method, .. } if method == "later"));

        let err = dispatcher(schema(json!({})))
            .method("extra", |_: Option<RpcValue>, _: CallArgs| async {
                Ok::<_, HandlerError>(RpcValue::Null)
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, HttpRpcError::UnknownMethod { method, .. } if method == "extra"));

        let err = dispatcher(schema(context_definitions())).build().unwrap_err();
        assert!(matches!(err, HttpRpcError::MissingContextExtractor));

        let err = Dispatcher::builder(schema(context_definitions()), "ClientContext")
            .build()
            .unwrap_err();
        assert!(matches!(err, HttpRpcError::NotAService { .. }));

        let err = Dispatcher::builder(schema(json!({})), "RuntimeError").build().unwrap_err();
        assert!(matches!(err, HttpRpcError::Schema(_)));
    }

    #[tokio::test]
    async fn test_stream_argument_reaches_handler() {
        let extra = json!({
            "Upload": {"properties": {
                "store": {"properties": {
                    "params": {
                        "properties": {"data": {"coerce-stream": true}},
                        "propertyOrder": ["data"],
                        "required": ["data"]
                    },
                    "returns": {"type": "number"}
                }}
            }}
        });
        let d = Dispatcher::builder(schema(extra), "Upload")
            .method("store", |_: Option<RpcValue>, mut args: CallArgs| async move {
                let stream = args
                    .take_required("data")?
                    .into_stream()
                    .ok_or_else(|| HandlerError::internal("not a stream"))?;
                let bytes = stream
                    .collect_bytes()
                    .await
                    .map_err(|err| HandlerError::internal(err.to_string()))?;
                Ok::<_, HandlerError>(RpcValue::from(bytes.len() as u64))
            })
            .build()
            .unwrap();

        let mut streams = AttachedStreams::new();
        streams.insert(0, ByteStream::from_bytes(&b"12345"[..]));
        let envelope = Envelope {
            value: json!({"args": {"data": {"$stream": 0}}}),
            streams,
        };
        let outcome = d.dispatch("store", envelope, &RequestMeta::new("/store")).await;
        assert!(matches!(outcome, CallOutcome::Success(v) if v == RpcValue::from(5u64)));

        let outcome = call(&d, "store", json!({"args": {"data": {"$stream": 3}}})).await;
        let errors = outcome.error_body().unwrap().errors.clone().unwrap();
        assert_eq!(errors[0].path, "/args/data");
    }

    #[tokio::test]
    async fn test_panicking_handler_is_internal_error() {
        let extra = json!({
            "Fragile": {"properties": {
                "boom": {"properties": {
                    "params": {"properties": {}, "propertyOrder": []},
                    "returns": {"type": "number"}
                }}
            }}
        });
        let build = |stack_trace_in_error: bool| {
            Dispatcher::builder(schema(extra.clone()), "Fragile")
                .stack_trace_in_error(stack_trace_in_error)
                .method("boom", |_: Option<RpcValue>, _: CallArgs| async {
                    let empty: Vec<i64> = Vec::new();
                    Ok::<_, HandlerError>(RpcValue::from(empty[3]))
                })
                .build()
                .unwrap()
        };

        let d = build(false);
        let outcome = tokio::spawn(async move { call(&d, "boom", json!({"args": {}})).await })
            .await
            .expect("dispatch does not unwind");
        assert_eq!(outcome.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
        let body = outcome.error_body().unwrap();
        assert_eq!(body.name, INTERNAL_SERVER_ERROR);
        assert_eq!(body.message, "Internal Server Error");

        let d = build(true);
        let outcome = call(&d, "boom", json!({"args": {}})).await;
        let body = outcome.error_body().unwrap();
        assert!(body.message.starts_with("handler panicked: index out of bounds"));
    }
}
