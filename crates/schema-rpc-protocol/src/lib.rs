//! # Schema RPC Protocol
//!
//! The transport-independent core of a schema-driven RPC service.
//!
//! A service is described by a JSON-Schema-like document whose definitions
//! are classes (attributes and methods), exceptions, enums and union or
//! intersection aliases. This crate turns that document into:
//!
//! - a flat [`ServiceSpec`] (see [`transform()`]) with definitions ordered so
//!   that referenced definitions come first
//! - compiled [`Validator`]s for every method's parameters and return value
//! - a [`coerce()`] function rebuilding dates and byte streams from wire data
//!
//! ```rust
//! use schema_rpc_protocol::ServiceSchema;
//! use serde_json::json;
//!
//! let schema = ServiceSchema::from_value(json!({
//!     "definitions": {
//!         "Calculator": {"properties": {"add": {"properties": {
//!             "params": {
//!                 "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
//!                 "propertyOrder": ["a", "b"],
//!                 "required": ["a", "b"]
//!             },
//!             "returns": {"type": "number"}
//!         }}}}
//!     }
//! }))
//! .unwrap();
//!
//! let add = schema.method("Calculator", "add").unwrap();
//! assert!(add.validators.params.is_valid(&json!({"a": 1, "b": 2})));
//! ```

pub mod args;
pub mod coerce;
pub mod document;
pub mod error;
pub mod failure;
pub mod refs;
pub mod schema;
pub mod transform;
pub mod types;
pub mod validate;
pub mod value;

pub mod prelude;

pub use args::CallArgs;
pub use coerce::{STREAM_PLACEHOLDER_KEY, coerce, placeholder_index};
pub use document::{SchemaDocument, definition_ref, reference_name};
pub use error::{CoerceError, SchemaError, ValueError};
pub use failure::{BAD_REQUEST, ErrorBody, INTERNAL_SERVER_ERROR, METHOD_NOT_SUPPORTED, VALIDATION_ERROR};
pub use refs::{find_references, sort_definitions};
pub use schema::{MethodSchema, ServiceSchema};
pub use transform::{
    Attribute, BypassType, CLIENT_CONTEXT, ClassSpec, EnumEntry, EnumSpec, Method, Parameter,
    SERVER_ONLY_CONTEXT, ServiceSpec, transform,
};
pub use types::{TypeDescriptor, type_to_string};
pub use validate::{MethodValidators, Validator, ValidatorRegistry, Violation};
pub use value::{AttachedStreams, ByteStream, RpcValue, StreamError, format_date, parse_date};
