//! # Schema RPC Wire
//!
//! Wire framing for schema RPC messages.
//!
//! - [`codec`]: JSON or `multipart/form-data` messages, with embedded byte
//!   streams replaced by `{"$stream": <index>}` placeholders
//! - [`pipe`]: the flow-controlled pipe that connects the multipart parser
//!   to the code reading each decoded stream

pub mod codec;
pub mod error;
mod multipart;
pub mod pipe;

pub use codec::{
    BODY_PART, ContentKind, DecodeOptions, Encoded, Envelope, JSON_CONTENT_TYPE, MULTIPART_FORM_DATA,
    OutgoingBody, decode, encode, serialize,
};
pub use error::{BoxError, PipeError, WireError, WireResult};
pub use pipe::{DEFAULT_PIPE_CAPACITY, PipeReader, PipeWriter, pipe};
