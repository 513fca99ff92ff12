//! # Schema RPC Protocol Prelude
//!
//! ```rust
//! use schema_rpc_protocol::prelude::*;
//! ```

pub use crate::args::CallArgs;
pub use crate::error::{CoerceError, SchemaError, ValueError};
pub use crate::failure::ErrorBody;
pub use crate::schema::{MethodSchema, ServiceSchema};
pub use crate::transform::ServiceSpec;
pub use crate::validate::Violation;
pub use crate::value::{AttachedStreams, ByteStream, RpcValue, StreamError};
