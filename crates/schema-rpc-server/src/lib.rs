//! # Schema RPC Server
//!
//! Serves one service class of a compiled schema over HTTP.
//!
//! Each method is exposed as `POST <base_path>/<method>`. The request body is
//! `{"args": {...}, "context": {...}}`, either as JSON or as
//! `multipart/form-data` when arguments embed byte streams. The
//! [`Dispatcher`] validates the call, assembles the context, coerces the
//! arguments and invokes the registered handler; its [`CallOutcome`] becomes
//! a `200`, `400` or `500` response.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use schema_rpc_server::prelude::*;
//!
//! # async fn run(schema: ServiceSchema) -> schema_rpc_server::Result<()> {
//! let dispatcher = Dispatcher::builder(Arc::new(schema), "Greeter")
//!     .method("hello", |_ctx: Option<RpcValue>, mut args: CallArgs| async move {
//!         let name = args.take_required("name")?;
//!         Ok::<_, HandlerError>(RpcValue::from(format!("Hello {}", name.as_str().unwrap_or("?"))))
//!     })
//!     .build()?;
//!
//! HttpRpcServer::builder(dispatcher)
//!     .bind_address("127.0.0.1:8080".parse().unwrap())
//!     .build()
//!     .run()
//!     .await
//! # }
//! ```

pub mod cors;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod method;
pub mod request;
pub mod response;
pub mod server;

pub mod prelude;

pub use cors::CorsLayer;
pub use dispatch::{Dispatcher, DispatcherBuilder};
pub use error::{HandlerError, HttpRpcError, Result};
pub use handler::{RpcHttpHandler, method_from_path};
pub use method::{ContextExtractor, FunctionHandler, MethodHandler};
pub use request::RequestMeta;
pub use response::{CallOutcome, RpcBody, error_response};
pub use server::{HttpRpcServer, HttpRpcServerBuilder, ServerConfig};

// Re-export foundational types
pub use schema_rpc_protocol::{CallArgs, ErrorBody, RpcValue, ServiceSchema};
