//! # Schema RPC Client
//!
//! Calls the methods of a schema-described service over HTTP. Arguments are
//! sent as `{"args": {...}, "context": {...}}`; return values are decoded
//! and coerced against the method's return schema, so dates come back as
//! [`chrono`](https://docs.rs/chrono) values and streams as readable
//! [`ByteStream`](schema_rpc_protocol::ByteStream)s.
//!
//! Errors mirror the server's classification: a declared exception comes
//! back as [`ClientError::Declared`] with its name, anything else the
//! server reports as [`ClientError::Internal`], and failures below the
//! protocol as [`ClientError::Transport`] or [`ClientError::Status`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use schema_rpc_client::prelude::*;
//!
//! # async fn run(schema: Arc<ServiceSchema>) -> ClientResult<()> {
//! let client = RpcClient::builder("http://127.0.0.1:8080", schema, "Calculator").build()?;
//! let sum = client
//!     .call("add", CallArgs::new().arg("a", 1i64).arg("b", 2i64), None)
//!     .await?;
//! assert_eq!(sum.as_i64(), Some(3));
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;

pub mod prelude;

pub use client::{RpcClient, RpcClientBuilder};
pub use config::{ClientConfig, TimeoutConfig};
pub use error::{ClientError, ClientResult};

// Re-export foundational types
pub use schema_rpc_protocol::{ByteStream, CallArgs, RpcValue, ServiceSchema};
