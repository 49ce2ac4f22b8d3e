//! Client state machine.
//!
//! The `Client` keeps a local replica of the session's history. Remote events
//! are inserted at the frame the server relays them for, local inputs at the
//! replica's current frame. Periodic probes (`syn`) let the server measure
//! progress and tell the replica how much history it may forget.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use lockstep_core::{Environment, Game, HistoryError, ParticipantEvent, Retention, Simulator};
use lockstep_proto::{ClientId, ClientMessage, Frame, FrameEvent, ServerMessage};

use crate::{
    error::ClientError,
    event::{ClientAction, ClientEvent},
};

/// Default number of ticks between two probes.
pub const DEFAULT_SYN_INTERVAL: u64 = 10;

/// Client configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Ticks between two `syn` probes. Zero is treated as one.
    pub syn_interval: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { syn_interval: DEFAULT_SYN_INTERVAL }
    }
}

type Action<G> = ClientAction<<G as Game>::Event>;

/// Replica state machine.
///
/// Pure state machine: returns actions, the caller handles I/O.
///
/// # Type Parameters
///
/// - `G`: Simulation rules, shared with the server
/// - `E`: Environment implementation for time
pub struct Client<G: Game, E: Environment> {
    game: G,
    env: E,
    config: ClientConfig,

    /// Assigned by `initialize`.
    client_id: Option<ClientId>,

    /// `None` until the first `initialize` or `reset`.
    simulator: Option<Simulator<G>>,

    /// Probes awaiting an ack, oldest first.
    probes: VecDeque<(Frame, Instant)>,
    ticks_since_syn: u64,
    latency: Option<Duration>,

    /// Server frame as of the last snapshot or ack.
    server_frame: Option<Frame>,

    /// A reset request is in flight; further prehistoric events are ignored
    /// and probes are suppressed.
    reset_requested: bool,

    /// Inputs made while a reset request is in flight, replayed on top of
    /// the snapshot.
    held_inputs: Vec<G::Event>,
}

impl<G, E> Client<G, E>
where
    G: Game + Clone,
    G::Event: ParticipantEvent,
    E: Environment,
{
    /// Create an uninitialized client.
    pub fn new(game: G, env: E, config: ClientConfig) -> Self {
        Self {
            game,
            env,
            config,
            client_id: None,
            simulator: None,
            probes: VecDeque::new(),
            ticks_since_syn: 0,
            latency: None,
            server_frame: None,
            reset_requested: false,
            held_inputs: Vec::new(),
        }
    }

    /// Participant id assigned by the server.
    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    /// Whether a snapshot has been applied.
    pub fn is_initialized(&self) -> bool {
        self.simulator.is_some()
    }

    /// Local history.
    pub fn simulator(&self) -> Option<&Simulator<G>> {
        self.simulator.as_ref()
    }

    /// Local current frame.
    pub fn current_frame(&self) -> Option<Frame> {
        self.simulator.as_ref().map(Simulator::current_frame)
    }

    /// Local current state.
    pub fn current_state(&self) -> Option<&G::State> {
        self.simulator.as_ref().map(Simulator::current_state)
    }

    /// Last measured round-trip time.
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// Server frame as of the last snapshot or ack.
    pub fn server_frame(&self) -> Option<Frame> {
        self.server_frame
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Process an event and return resulting actions.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` if the event cannot be processed. Events that
    /// predate local history are not errors: they produce a reset request.
    pub fn handle(
        &mut self,
        event: ClientEvent<G::State, G::Event>,
    ) -> Result<Vec<Action<G>>, ClientError> {
        match event {
            ClientEvent::Received(message) => self.handle_message(message),
            ClientEvent::Input(event) => self.handle_input(event),
            ClientEvent::Tick => self.handle_tick(),
            ClientEvent::Resync => {
                if self.simulator.is_none() {
                    return Err(ClientError::NotInitialized { operation: "resync" });
                }
                Ok(self.request_reset().into_iter().collect())
            },
        }
    }

    fn handle_message(
        &mut self,
        message: ServerMessage<G::State, G::Event>,
    ) -> Result<Vec<Action<G>>, ClientError> {
        match message {
            ServerMessage::Initialize { client_id, state, events, current_frame } => {
                self.client_id = Some(client_id);
                self.resynchronize(state, events, current_frame, false)
            },
            ServerMessage::Reset { current_frame, state, events } => {
                self.resynchronize(state, events, current_frame, true)
            },
            ServerMessage::Connect { client_id, frame } => {
                self.apply_remote(frame, G::Event::connected(client_id), "connect")
            },
            ServerMessage::Disconnect { client_id, frame } => {
                self.apply_remote(frame, G::Event::disconnected(client_id), "disconnect")
            },
            ServerMessage::Event { client_id, frame, event } => {
                tracing::trace!(from = client_id, frame, "remote event");
                self.apply_remote(frame, event, "event")
            },
            ServerMessage::Ack { probe_frame, current_frame, stable_frame } => {
                self.handle_ack(probe_frame, current_frame, stable_frame)
            },
        }
    }

    /// Replace local history with a server snapshot, then replay held inputs
    /// at the new current frame.
    fn resynchronize(
        &mut self,
        state: G::State,
        events: Vec<FrameEvent<G::Event>>,
        current_frame: Frame,
        probe: bool,
    ) -> Result<Vec<Action<G>>, ClientError> {
        let mut simulator = Simulator::from_snapshot(
            self.game.clone(),
            Retention::Unbounded,
            state,
            events,
            current_frame,
        )?;

        let held = std::mem::take(&mut self.held_inputs);
        let mut replayed = Vec::with_capacity(held.len());
        for event in held {
            simulator.insert_event(current_frame, event.clone())?;
            replayed.push(ClientAction::Send(ClientMessage::Event { frame: current_frame, event }));
        }

        tracing::info!(
            client_id = ?self.client_id,
            frame = current_frame,
            oldest = simulator.oldest_frame(),
            replayed = replayed.len(),
            "replica synchronized"
        );

        self.simulator = Some(simulator);
        self.server_frame = Some(current_frame);
        self.probes.clear();
        self.ticks_since_syn = 0;
        self.reset_requested = false;

        let mut actions =
            vec![ClientAction::Synchronized { client_id: self.client_id, frame: current_frame }];
        if probe {
            actions.push(self.send_probe(current_frame));
        }
        actions.extend(replayed);
        Ok(actions)
    }

    fn apply_remote(
        &mut self,
        frame: Frame,
        event: G::Event,
        operation: &'static str,
    ) -> Result<Vec<Action<G>>, ClientError> {
        let simulator =
            self.simulator.as_mut().ok_or(ClientError::NotInitialized { operation })?;

        match simulator.insert_event(frame, event) {
            Ok(()) => Ok(Vec::new()),
            Err(HistoryError::PrehistoricEvent { frame, oldest }) => {
                if self.reset_requested {
                    tracing::debug!(frame, oldest, operation, "reset pending, ignoring message");
                    return Ok(Vec::new());
                }
                tracing::warn!(frame, oldest, operation, "message predates local history");
                Ok(self.request_reset().into_iter().collect())
            },
            Err(e) => Err(e.into()),
        }
    }

    fn handle_ack(
        &mut self,
        probe_frame: Frame,
        current_frame: Frame,
        stable_frame: Frame,
    ) -> Result<Vec<Action<G>>, ClientError> {
        let now = self.env.now();
        let simulator =
            self.simulator.as_mut().ok_or(ClientError::NotInitialized { operation: "ack" })?;
        self.server_frame = Some(current_frame);

        let dropped = simulator.dispose_before(stable_frame.min(simulator.current_frame()))?;
        if dropped > 0 {
            tracing::trace!(dropped, oldest = simulator.oldest_frame(), "pruned local history");
        }

        while self.probes.front().is_some_and(|(frame, _)| *frame < probe_frame) {
            self.probes.pop_front();
        }
        let Some((_, sent_at)) = self.probes.front().copied().filter(|(f, _)| *f == probe_frame)
        else {
            tracing::debug!(probe_frame, "ack for unknown probe");
            return Ok(Vec::new());
        };
        self.probes.pop_front();

        let latency = now.saturating_duration_since(sent_at);
        self.latency = Some(latency);
        tracing::debug!(
            latency_ms = latency.as_millis(),
            lag = current_frame.saturating_sub(probe_frame),
            "probe acknowledged"
        );

        Ok(vec![ClientAction::Send(ClientMessage::Ack { latency })])
    }

    fn handle_input(&mut self, event: G::Event) -> Result<Vec<Action<G>>, ClientError> {
        let simulator =
            self.simulator.as_mut().ok_or(ClientError::NotInitialized { operation: "input" })?;

        // The snapshot on its way would discard anything applied now.
        if self.reset_requested {
            tracing::debug!(held = self.held_inputs.len() + 1, "reset pending, holding input");
            self.held_inputs.push(event);
            return Ok(Vec::new());
        }

        let frame = simulator.current_frame();
        simulator.insert_event(frame, event.clone())?;

        Ok(vec![ClientAction::Send(ClientMessage::Event { frame, event })])
    }

    fn handle_tick(&mut self) -> Result<Vec<Action<G>>, ClientError> {
        let Some(simulator) = self.simulator.as_mut() else {
            return Ok(Vec::new());
        };

        simulator.advance_one_tick()?;
        let frame = simulator.current_frame();

        self.ticks_since_syn += 1;
        if !self.reset_requested && self.ticks_since_syn >= self.config.syn_interval.max(1) {
            return Ok(vec![self.send_probe(frame)]);
        }
        Ok(Vec::new())
    }

    /// Ask for a snapshot unless one is already on its way.
    fn request_reset(&mut self) -> Option<Action<G>> {
        if self.reset_requested {
            return None;
        }
        self.reset_requested = true;
        Some(ClientAction::Send(ClientMessage::ResetRequest))
    }

    fn send_probe(&mut self, frame: Frame) -> Action<G> {
        self.ticks_since_syn = 0;
        self.probes.push_back((frame, self.env.now()));
        ClientAction::Send(ClientMessage::Syn { frame })
    }
}

impl<G: Game, E: Environment> std::fmt::Debug for Client<G, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("client_id", &self.client_id)
            .field("simulator", &self.simulator)
            .field("pending_probes", &self.probes.len())
            .field("latency", &self.latency)
            .field("reset_requested", &self.reset_requested)
            .finish_non_exhaustive()
    }
}
