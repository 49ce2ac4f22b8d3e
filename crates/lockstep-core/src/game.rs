//! Contract between the history store and the simulation rules.
//!
//! The rules are external: the core only needs an initial state, a pure
//! transition function and a total order over events that share a frame.

use std::cmp::Ordering;

use lockstep_proto::{ClientId, Frame};

/// A simulation state that knows which frame it belongs to.
pub trait FrameState {
    /// Frame number of this state.
    fn frame(&self) -> Frame;
}

/// Deterministic simulation rules.
///
/// # Invariants
///
/// - `update` is pure: the same state and events always produce the same
///   result, and the result's frame is exactly one past the input's.
/// - `compare_events` is a deterministic total order.
pub trait Game {
    /// Simulation state.
    type State: FrameState + Clone + std::fmt::Debug;

    /// Input applied during a frame transition.
    type Event: Clone + std::fmt::Debug;

    /// Initial state.
    fn init(&self) -> Self::State;

    /// Compute the next state from a state and the events of its frame.
    fn update(&self, state: &Self::State, events: &[Self::Event]) -> Self::State;

    /// Order of events within one frame.
    fn compare_events(&self, a: &Self::Event, b: &Self::Event) -> Ordering;
}

/// Events the session records when participants come and go.
pub trait ParticipantEvent {
    /// Event recorded when `client` joins.
    fn connected(client: ClientId) -> Self;

    /// Event recorded when `client` leaves.
    fn disconnected(client: ClientId) -> Self;
}
