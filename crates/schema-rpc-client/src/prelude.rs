//! # Schema RPC Client Prelude
//!
//! ```rust
//! use schema_rpc_client::prelude::*;
//! ```

pub use crate::client::RpcClient;
pub use crate::config::ClientConfig;
pub use crate::error::{ClientError, ClientResult};

pub use schema_rpc_protocol::prelude::*;
