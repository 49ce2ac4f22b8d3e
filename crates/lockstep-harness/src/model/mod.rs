//! Model-based testing.
//!
//! Operations are generated randomly and applied to a [`SimWorld`]. After
//! the links drain, every replica must agree with the server on each frame
//! both still retain, and the server's history must equal a naive replay of
//! its retained events.

pub mod operation;
mod replay;
mod world;

pub use operation::{Direction, MAX_SLOTS, Operation, OperationResult, Slot};
pub use replay::replay;
pub use world::{Divergence, SimWorld, WorldConfig, WorldError, WorldStats};
