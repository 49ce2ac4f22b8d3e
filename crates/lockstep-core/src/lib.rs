//! Lockstep Core
//!
//! Deterministic, frame-stepped simulation history with rollback repair.
//!
//! # Architecture
//!
//! ```text
//! lockstep-core
//!   ├─ Environment        (time abstraction for deterministic testing)
//!   ├─ Game               (external rules: init, update, event order)
//!   ├─ Simulator          (history store: timeframes + future queue)
//!   └─ SimulationDriver   (fixed-cadence ticking of the simulator)
//! ```
//!
//! The core performs no I/O. Callers feed it events and ticks; it answers with
//! states, snapshots and errors.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod driver;
pub mod env;
pub mod error;
pub mod game;
pub mod simulator;

pub use driver::{DEFAULT_TICK_INTERVAL, SimulationConfig, SimulationDriver};
pub use env::Environment;
pub use error::HistoryError;
pub use game::{FrameState, Game, ParticipantEvent};
pub use lockstep_proto::{ClientId, Frame, FrameEvent};
pub use simulator::{Retention, Simulator, TimeFrame};
