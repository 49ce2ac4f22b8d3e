//! Deterministic simulation harness for lockstep session testing.
//!
//! Runs one [`ServerDriver`](lockstep_server::ServerDriver) and several
//! [`Client`](lockstep_client::Client) replicas in a single thread. Every
//! message is encoded with the wire codec and queued on a per-link FIFO;
//! a seeded RNG decides which link delivers next, so one seed always
//! reproduces the same interleaving.
//!
//! # Model-Based Testing
//!
//! The `model` module provides the operations proptest generates, the
//! world that applies them, and a naive replay oracle the real history
//! store is checked against.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod ledger;
pub mod model;
pub mod sim_env;

pub use ledger::{Ledger, LedgerEvent, LedgerState};
pub use model::{
    Direction, Divergence, MAX_SLOTS, Operation, OperationResult, SimWorld, Slot, WorldConfig,
    WorldError, WorldStats, replay,
};
pub use sim_env::SimEnv;
