//! History Store
//!
//! Frame-indexed ledger of simulation states and the events that produced
//! each transition.
//!
//! ## Layout
//!
//! ```text
//! timeframes:    [ head (current) | head-1 | ... | tail (oldest) ]
//! future_events: [ (f1, e) (f1, e') (f2, e'') ... ]   f1 <= f2, all > head
//! ```
//!
//! The entry for frame `f` lives at index `head.frame - f`.
//!
//! ## Invariants
//!
//! - History is never empty.
//! - Contiguity: adjacent entries differ by exactly one frame.
//! - Every timeframe's state reports the timeframe's own frame.
//! - Events inside a timeframe are sorted by the game's comparator; ties keep
//!   insertion order.
//! - Every future event targets a frame newer than the head.
//! - Entries are only ever removed from the tail.

use std::{cmp::Ordering, collections::VecDeque, num::NonZeroUsize};

use lockstep_proto::{Frame, FrameEvent};
use serde::{Deserialize, Serialize};

use crate::{
    error::HistoryError,
    game::{FrameState, Game},
};

/// How much history the simulator keeps on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retention {
    /// Keep everything. Pruning is left to the caller (`dispose_before`).
    #[default]
    Unbounded,

    /// Keep at most this many timeframes, dropping the oldest after each tick.
    Frames(NonZeroUsize),
}

/// A state paired with the events applied during its frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeFrame<S, E> {
    frame: Frame,
    state: S,
    events: Vec<E>,
}

impl<S: FrameState, E> TimeFrame<S, E> {
    /// Timeframe for `state` with no events yet.
    pub fn new(state: S) -> Self {
        Self::with_events(state, Vec::new())
    }

    /// Timeframe for `state` with the given events.
    pub fn with_events(state: S, events: Vec<E>) -> Self {
        Self { frame: state.frame(), state, events }
    }
}

impl<S, E> TimeFrame<S, E> {
    /// Frame number.
    pub fn frame(&self) -> Frame {
        self.frame
    }

    /// Simulation state at the start of this frame.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Events applied when leaving this frame, in comparator order.
    pub fn events(&self) -> &[E] {
        &self.events
    }
}

/// Shorthand for the timeframe type of a game.
pub type GameTimeFrame<G> = TimeFrame<<G as Game>::State, <G as Game>::Event>;

/// Deterministic history store with rollback recomputation.
pub struct Simulator<G: Game> {
    game: G,
    /// Newest first. Never empty.
    timeframes: VecDeque<GameTimeFrame<G>>,
    /// Sorted ascending by frame, ties in insertion order.
    future_events: VecDeque<FrameEvent<G::Event>>,
    retention: Retention,
}

impl<G: Game> Simulator<G> {
    /// Create a simulator holding only the game's initial state.
    pub fn new(game: G, retention: Retention) -> Self {
        let initial = game.init();
        Self::with_state(game, initial, retention)
    }

    fn with_state(game: G, state: G::State, retention: Retention) -> Self {
        let mut timeframes = VecDeque::new();
        timeframes.push_back(TimeFrame::new(state));
        Self { game, timeframes, future_events: VecDeque::new(), retention }
    }

    /// Rebuild the present from an `initialize`/`reset` payload.
    ///
    /// Starts from `state`, schedules `events`, then ticks forward to
    /// `current_frame`.
    pub fn from_snapshot(
        game: G,
        retention: Retention,
        state: G::State,
        events: Vec<FrameEvent<G::Event>>,
        current_frame: Frame,
    ) -> Result<Self, HistoryError> {
        let mut simulator = Self::with_state(game, state, retention);
        for pending in events {
            simulator.insert_event(pending.frame, pending.event)?;
        }
        simulator.fast_forward(current_frame)?;
        Ok(simulator)
    }

    /// The simulation rules.
    pub fn game(&self) -> &G {
        &self.game
    }

    /// Retention policy.
    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Frame of the head entry.
    pub fn current_frame(&self) -> Frame {
        self.head().frame
    }

    /// Frame of the oldest retained entry.
    pub fn oldest_frame(&self) -> Frame {
        self.tail().frame
    }

    /// Newest timeframe.
    pub fn head(&self) -> &GameTimeFrame<G> {
        &self.timeframes[0]
    }

    fn tail(&self) -> &GameTimeFrame<G> {
        &self.timeframes[self.timeframes.len() - 1]
    }

    /// State at the current frame.
    pub fn current_state(&self) -> &G::State {
        &self.head().state
    }

    /// State at the oldest retained frame.
    pub fn oldest_state(&self) -> &G::State {
        &self.tail().state
    }

    /// Number of retained timeframes (always at least one).
    pub fn retained_frames(&self) -> usize {
        self.timeframes.len()
    }

    /// Retained timeframes, newest first.
    pub fn timeframes(&self) -> impl DoubleEndedIterator<Item = &GameTimeFrame<G>> {
        self.timeframes.iter()
    }

    /// Events scheduled for frames that have not been reached yet.
    pub fn future_events(&self) -> impl Iterator<Item = &FrameEvent<G::Event>> {
        self.future_events.iter()
    }

    /// Every retained event, oldest frame first, followed by the future queue.
    pub fn retained_events(&self) -> Vec<FrameEvent<G::Event>> {
        self.timeframes
            .iter()
            .rev()
            .flat_map(|tf| tf.events.iter().map(|e| FrameEvent::new(tf.frame, e.clone())))
            .chain(self.future_events.iter().cloned())
            .collect()
    }

    /// True if `frame` is older than the oldest retained entry.
    pub fn is_prehistoric(&self, frame: Frame) -> bool {
        frame < self.oldest_frame()
    }

    fn index_of(&self, frame: Frame) -> Result<usize, HistoryError> {
        let newest = self.current_frame();
        let oldest = self.oldest_frame();
        let out_of_range = || HistoryError::OutOfRange { frame, oldest, newest };

        if frame > newest || frame < oldest {
            return Err(out_of_range());
        }
        usize::try_from(newest - frame).map_err(|_| out_of_range())
    }

    /// Timeframe for `frame`.
    pub fn frame_at(&self, frame: Frame) -> Result<&GameTimeFrame<G>, HistoryError> {
        let index = self.index_of(frame)?;
        Ok(&self.timeframes[index])
    }

    /// Insert an event at the current frame.
    pub fn push_event(&mut self, event: G::Event) -> Result<(), HistoryError> {
        self.insert_event(self.current_frame(), event)
    }

    /// Insert an event into the past, present or future.
    ///
    /// Future events are queued. Events for a retained frame are sorted into
    /// that frame and every later state is recomputed. Events older than the
    /// retained window fail with [`HistoryError::PrehistoricEvent`] and leave
    /// history untouched.
    pub fn insert_event(&mut self, frame: Frame, event: G::Event) -> Result<(), HistoryError> {
        let current = self.current_frame();

        if frame > current {
            let index = self.future_events.partition_point(|pending| pending.frame <= frame);
            self.future_events.insert(index, FrameEvent::new(frame, event));
            tracing::trace!(frame, current, "queued future event");
            return Ok(());
        }

        if self.is_prehistoric(frame) {
            return Err(HistoryError::PrehistoricEvent { frame, oldest: self.oldest_frame() });
        }

        let index = self.index_of(frame)?;
        let position = insert_sorted(&self.game, &mut self.timeframes[index].events, event);

        if let Err(e) = self.recalculate_states(frame) {
            self.timeframes[index].events.remove(position);
            return Err(e);
        }

        if frame < current {
            tracing::debug!(frame, current, "rolled back and replayed history");
        }
        Ok(())
    }

    /// Recompute every state after `from` up to the head.
    ///
    /// New states are computed first and only committed once the whole chain
    /// is valid.
    fn recalculate_states(&mut self, from: Frame) -> Result<(), HistoryError> {
        let start = self.index_of(from)?;
        let mut states: Vec<G::State> = Vec::with_capacity(start);

        for index in (1..=start).rev() {
            let source = &self.timeframes[index];
            let input = states.last().unwrap_or(&source.state);
            let next = self.game.update(input, &source.events);
            check_successor(source.frame, &next)?;
            states.push(next);
        }

        for (offset, state) in states.into_iter().enumerate() {
            self.timeframes[start - 1 - offset].state = state;
        }
        Ok(())
    }

    /// Step the simulation forward by one frame.
    ///
    /// Future events destined for the new frame are moved into it exactly
    /// once. Afterwards the retention cap, if any, is applied.
    pub fn advance_one_tick(&mut self) -> Result<(), HistoryError> {
        let head = self.head();
        let next = self.game.update(&head.state, &head.events);
        check_successor(head.frame, &next)?;

        let frame = next.frame();
        self.timeframes.push_front(TimeFrame::new(next));

        while self.future_events.front().is_some_and(|pending| pending.frame == frame) {
            let Some(pending) = self.future_events.pop_front() else { break };
            insert_sorted(&self.game, &mut self.timeframes[0].events, pending.event);
        }

        self.enforce_retention();
        Ok(())
    }

    fn enforce_retention(&mut self) {
        let Retention::Frames(max) = self.retention else { return };

        while self.timeframes.len() > max.get() {
            if let Some(forgotten) = self.timeframes.pop_back() {
                tracing::trace!(
                    frame = forgotten.frame,
                    state = ?forgotten.state,
                    events = ?forgotten.events,
                    "forgot timeframe"
                );
            }
        }
    }

    /// Tick until the current frame equals `target`.
    ///
    /// A target behind the current frame is rejected; history only grows
    /// forward.
    pub fn fast_forward(&mut self, target: Frame) -> Result<(), HistoryError> {
        let start = self.current_frame();
        if target < start {
            return Err(HistoryError::RewindRejected { target, current: start });
        }

        while self.current_frame() < target {
            self.advance_one_tick()?;
        }

        if target > start {
            tracing::debug!(from = start, to = target, "fast-forwarded");
        }
        Ok(())
    }

    /// Drop every timeframe older than `frame`. Returns how many were dropped.
    ///
    /// The head is never dropped: a `frame` newer than the current frame is an
    /// [`HistoryError::InvariantViolation`] and removes nothing.
    pub fn dispose_before(&mut self, frame: Frame) -> Result<usize, HistoryError> {
        let current = self.current_frame();
        if frame > current {
            return Err(HistoryError::invariant(format!(
                "dispose_before({frame}) would drop the head at frame {current}"
            )));
        }

        let mut dropped = 0;
        while self.oldest_frame() < frame {
            self.timeframes.pop_back();
            dropped += 1;
        }
        Ok(dropped)
    }

    /// Replace all history with a single snapshot.
    ///
    /// `future_events` are re-inserted relative to the snapshot, so events at
    /// the snapshot's frame join it directly.
    pub fn reset_to_snapshot(
        &mut self,
        state: G::State,
        future_events: Vec<FrameEvent<G::Event>>,
    ) -> Result<(), HistoryError> {
        let frame = state.frame();
        if let Some(stale) = future_events.iter().find(|pending| pending.frame < frame) {
            return Err(HistoryError::PrehistoricEvent { frame: stale.frame, oldest: frame });
        }

        tracing::info!(frame, future_events = future_events.len(), "reset to snapshot");

        self.timeframes.clear();
        self.timeframes.push_back(TimeFrame::new(state));
        self.future_events.clear();

        for pending in future_events {
            self.insert_event(pending.frame, pending.event)?;
        }
        Ok(())
    }

    /// Replace all history with `timeframes` (newest first).
    ///
    /// The replacement is validated before anything is touched: it must be
    /// non-empty, contiguous, and every state must match its timeframe's
    /// frame.
    pub fn reset_to_history(
        &mut self,
        timeframes: Vec<GameTimeFrame<G>>,
        future_events: Vec<FrameEvent<G::Event>>,
    ) -> Result<(), HistoryError> {
        let Some(oldest) = timeframes.last().map(|tf| tf.frame) else {
            return Err(HistoryError::invariant("reset with empty history"));
        };

        for tf in &timeframes {
            if tf.state.frame() != tf.frame {
                return Err(HistoryError::invariant(format!(
                    "timeframe {} holds a state for frame {}",
                    tf.frame,
                    tf.state.frame()
                )));
            }
        }
        for pair in timeframes.windows(2) {
            if pair[0].frame != pair[1].frame + 1 {
                return Err(HistoryError::invariant(format!(
                    "history gap between frames {} and {}",
                    pair[1].frame, pair[0].frame
                )));
            }
        }
        if let Some(stale) = future_events.iter().find(|pending| pending.frame < oldest) {
            return Err(HistoryError::PrehistoricEvent { frame: stale.frame, oldest });
        }

        tracing::info!(
            current = timeframes[0].frame,
            timeframes = timeframes.len(),
            future_events = future_events.len(),
            "reset to history"
        );

        self.timeframes = timeframes.into();
        for tf in &mut self.timeframes {
            tf.events.sort_by(|a, b| self.game.compare_events(a, b));
        }
        self.future_events.clear();

        for pending in future_events {
            self.insert_event(pending.frame, pending.event)?;
        }
        Ok(())
    }
}

/// Insert `event` after every element that orders before or equal to it.
fn insert_sorted<G: Game>(game: &G, events: &mut Vec<G::Event>, event: G::Event) -> usize {
    let position = events
        .partition_point(|existing| game.compare_events(existing, &event) != Ordering::Greater);
    events.insert(position, event);
    position
}

fn check_successor<S: FrameState>(frame: Frame, next: &S) -> Result<(), HistoryError> {
    if next.frame() == frame + 1 {
        Ok(())
    } else {
        Err(HistoryError::invariant(format!(
            "update of frame {frame} produced frame {}",
            next.frame()
        )))
    }
}

impl<G: Game> std::fmt::Debug for Simulator<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("current_frame", &self.current_frame())
            .field("oldest_frame", &self.oldest_frame())
            .field("future_events", &self.future_events.len())
            .field("retention", &self.retention)
            .finish()
    }
}
