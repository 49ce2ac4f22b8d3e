//! Lockstep Protocol
//!
//! Wire types shared by the lockstep server and its clients.
//!
//! # Components
//!
//! - [`ClientMessage`]: messages a participant sends to the server
//! - [`ServerMessage`]: messages the server sends to one or all participants
//! - [`codec`]: length-delimited CBOR framing used by the TCP transport
//!
//! Frame numbers, client ids and connection ids are plain integers. Game
//! states and events are generic: the protocol only moves them around, it
//! never looks inside.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
mod error;
mod message;

pub use error::ProtocolError;
pub use message::{ClientMessage, FrameEvent, MessageKind, ServerMessage};

/// Discrete simulation tick index.
pub type Frame = u64;

/// Identifier the session assigns to a participant on connect.
pub type ClientId = u64;

/// Identifier of a transport connection, assigned by the runtime.
pub type ConnectionId = u64;
