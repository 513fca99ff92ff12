//! # Schema RPC Server Prelude
//!
//! ```rust
//! use schema_rpc_server::prelude::*;
//! ```

pub use crate::dispatch::Dispatcher;
pub use crate::error::HandlerError;
pub use crate::method::{ContextExtractor, MethodHandler};
pub use crate::request::RequestMeta;
pub use crate::server::{HttpRpcServer, ServerConfig};

pub use schema_rpc_protocol::prelude::*;
