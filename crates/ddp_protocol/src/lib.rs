//! # DDP Protocol
//!
//! Typed messages for the DDP publish/subscribe protocol.
//!
//! This crate defines:
//! - [`ClientMessage`]: frames the client sends (connect, sub, method, ...)
//! - [`ServerMessage`]: frames the server sends (connected, added, result, ...)
//! - [`MethodError`]: the error object carried by `nosub` and `result`
//!
//! Frames are JSON objects tagged by a `msg` field. Document payloads are
//! decoded as EJSON, so `{"$date": ms}` fields arrive as dates.
//!
//! ```
//! use ddp_protocol::{ClientMessage, ServerMessage};
//!
//! let frame = ClientMessage::sub("s1", "todos", None).encode().unwrap();
//! assert_eq!(frame, r#"{"msg":"sub","id":"s1","name":"todos"}"#);
//!
//! let msg = ServerMessage::decode(r#"{"msg":"ready","subs":["s1"]}"#).unwrap();
//! assert!(matches!(msg, Some(ServerMessage::Ready { .. })));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;
mod server_error;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{ClientMessage, MessageKind, ServerMessage};
pub use server_error::{ErrorCode, MethodError};

// Re-export the value model used in document frames.
pub use ddp_ejson::{EjsonValue, Fields};
