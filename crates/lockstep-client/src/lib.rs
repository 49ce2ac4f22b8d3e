//! Lockstep Client
//!
//! Action-based replica state machine for the lockstep session protocol.
//! Keeps a local copy of the simulation history in step with the server.
//!
//! # Architecture
//!
//! The client is a pure state machine that:
//! - Receives events from the caller (server messages, local inputs, ticks)
//! - Produces actions for the caller to execute (messages to send)
//! - Uses the `Environment` trait for time (deterministic testing)
//!
//! # Components
//!
//! - [`Client`]: Replica state machine
//! - [`ClientConfig`]: Probe cadence
//! - [`ClientEvent`]: Events fed into the client
//! - [`ClientAction`]: Actions produced by the client

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;
mod event;

pub use client::{Client, ClientConfig, DEFAULT_SYN_INTERVAL};
pub use error::ClientError;
pub use event::{ClientAction, ClientEvent};
pub use lockstep_core::Environment;
