//! Method handlers and context extraction hooks

use std::future::Future;

use async_trait::async_trait;
use schema_rpc_protocol::{CallArgs, RpcValue};
use serde_json::Value;

use crate::error::HandlerError;
use crate::request::RequestMeta;

/// Implementation of one service method.
///
/// `context` is the merged call context, present only when the schema
/// declares `ClientContext` or `ServerOnlyContext`. `args` holds the coerced
/// arguments in declared parameter order.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn call(&self, context: Option<RpcValue>, args: CallArgs) -> Result<RpcValue, HandlerError>;
}

/// A closure-based handler
pub struct FunctionHandler<F> {
    handler_fn: F,
}

impl<F, Fut> FunctionHandler<F>
where
    F: Fn(Option<RpcValue>, CallArgs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<RpcValue, HandlerError>> + Send,
{
    pub fn new(handler_fn: F) -> Self {
        Self { handler_fn }
    }
}

#[async_trait]
impl<F, Fut> MethodHandler for FunctionHandler<F>
where
    F: Fn(Option<RpcValue>, CallArgs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<RpcValue, HandlerError>> + Send,
{
    async fn call(&self, context: Option<RpcValue>, args: CallArgs) -> Result<RpcValue, HandlerError> {
        (self.handler_fn)(context, args).await
    }
}

/// Derives the `ServerOnlyContext` of a call from transport metadata
#[async_trait]
pub trait ContextExtractor: Send + Sync {
    /// Returns a JSON object whose fields are merged into the call context
    async fn extract(&self, request: &RequestMeta) -> Result<Value, HandlerError>;
}

#[async_trait]
impl<F> ContextExtractor for F
where
    F: Fn(&RequestMeta) -> Result<Value, HandlerError> + Send + Sync,
{
    async fn extract(&self, request: &RequestMeta) -> Result<Value, HandlerError> {
        self(request)
    }
}
