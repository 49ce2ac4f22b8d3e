//! Session Protocol
//!
//! Tracks connected participants and drives the history store from their
//! messages.
//!
//! ## Responsibilities
//!
//! - Client lifecycle: connect (initialize snapshot) and disconnect
//! - Message dispatch: `syn`, `ack`, `resetrequest`, `event`
//! - Stable frame: minimum acknowledged frame across participants, used to
//!   prune history
//! - Resynchronization: full reset for participants behind the retained
//!   window; traffic sent before the reset landed is dropped
//!
//! ## Design
//!
//! - Action-based: methods return [`SessionAction`]s, never touch the
//!   transport
//! - Borrowed history: the simulator is passed in per call; the session only
//!   reads it and appends events
//! - Closed dispatch: one `match` over [`ClientMessage`] maps each message to
//!   its handler

use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use lockstep_core::{Game, HistoryError, ParticipantEvent, Simulator};
use lockstep_proto::{ClientId, ClientMessage, ConnectionId, Frame, ServerMessage};

use crate::client::{Client, ClientStatus};

/// Session action type for a game.
pub type GameAction<G> = SessionAction<<G as Game>::State, <G as Game>::Event>;

/// Actions returned by the session for the driver to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction<S, E> {
    /// Send a message on a connection.
    Send {
        /// Destination connection.
        conn_id: ConnectionId,
        /// Message to deliver.
        message: ServerMessage<S, E>,
    },

    /// A participant joined.
    ClientAdded {
        /// New participant.
        client_id: ClientId,
    },

    /// A participant left.
    ClientRemoved {
        /// Departed participant.
        client_id: ClientId,
    },

    /// The last participant left.
    SessionEmpty,
}

/// Errors from session operations.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No participant with this id.
    #[error("unknown client: {0}")]
    UnknownClient(ClientId),

    /// No participant on this connection.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// A participant already uses this connection.
    #[error("connection already registered: {0}")]
    ConnectionInUse(ConnectionId),

    /// History store failure other than a prehistoric event.
    #[error("history error: {0}")]
    History(#[from] HistoryError),
}

/// Set of connected participants plus the stability bookkeeping.
#[derive(Debug, Default)]
pub struct Session {
    /// Ordered by id, which is also join order.
    clients: BTreeMap<ClientId, Client>,
    connections: HashMap<ConnectionId, ClientId>,
    next_client_id: ClientId,
    /// Minimum acknowledged frame; `None` when nobody is connected.
    stable_frame: Option<Frame>,
}

impl Session {
    /// Create an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Participant by id.
    pub fn client(&self, client_id: ClientId) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    /// Participant using a connection.
    pub fn client_by_connection(&self, conn_id: ConnectionId) -> Option<&Client> {
        self.connections.get(&conn_id).and_then(|id| self.clients.get(id))
    }

    /// Connected participants in join order.
    pub fn clients(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    /// Number of connected participants.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// True if nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Oldest frame any participant may still need, as of the last probe.
    ///
    /// Never newer than the server's frame at that probe; this is the value
    /// the `ack` reports.
    pub fn stable_frame(&self) -> Option<Frame> {
        self.stable_frame
    }

    fn client_mut(&mut self, client_id: ClientId) -> Result<&mut Client, SessionError> {
        self.clients.get_mut(&client_id).ok_or(SessionError::UnknownClient(client_id))
    }

    /// Admit a participant on `conn_id`.
    ///
    /// Records a connect event at the current frame, tells everybody else,
    /// and sends the newcomer enough history to rebuild the present.
    pub fn connect<G>(
        &mut self,
        conn_id: ConnectionId,
        sim: &mut Simulator<G>,
    ) -> Result<(ClientId, Vec<GameAction<G>>), SessionError>
    where
        G: Game,
        G::Event: ParticipantEvent,
    {
        if self.connections.contains_key(&conn_id) {
            return Err(SessionError::ConnectionInUse(conn_id));
        }

        let client_id = self.next_client_id;
        sim.push_event(G::Event::connected(client_id))?;
        self.next_client_id += 1;

        let frame = sim.current_frame();
        let mut actions = self.broadcast(client_id, &ServerMessage::Connect { client_id, frame });

        self.clients.insert(client_id, Client::new(client_id, conn_id, frame));
        self.connections.insert(conn_id, client_id);

        actions.push(SessionAction::Send {
            conn_id,
            message: ServerMessage::Initialize {
                client_id,
                state: sim.oldest_state().clone(),
                events: sim.retained_events(),
                current_frame: frame,
            },
        });
        actions.push(SessionAction::ClientAdded { client_id });

        tracing::info!(client_id, conn_id, frame, clients = self.clients.len(), "client connected");
        Ok((client_id, actions))
    }

    /// Remove a participant.
    ///
    /// Records a disconnect event at the current frame and tells the
    /// remaining participants. The stable frame is left as is until the next
    /// probe.
    pub fn disconnect<G>(
        &mut self,
        client_id: ClientId,
        sim: &mut Simulator<G>,
    ) -> Result<Vec<GameAction<G>>, SessionError>
    where
        G: Game,
        G::Event: ParticipantEvent,
    {
        let Some(client) = self.clients.remove(&client_id) else {
            return Err(SessionError::UnknownClient(client_id));
        };
        self.connections.remove(&client.connection());

        sim.push_event(G::Event::disconnected(client_id))?;
        let frame = sim.current_frame();

        let mut actions =
            self.broadcast(client_id, &ServerMessage::Disconnect { client_id, frame });
        actions.push(SessionAction::ClientRemoved { client_id });
        if self.clients.is_empty() {
            tracing::info!("session empty");
            actions.push(SessionAction::SessionEmpty);
        }

        tracing::info!(client_id, frame, clients = self.clients.len(), "client disconnected");
        Ok(actions)
    }

    /// Dispatch one inbound message from `client_id`.
    ///
    /// While a reset is in flight only latency reports, reset requests and
    /// the probe from the frame the participant resumes at get through; other
    /// probes and events were sent before the snapshot landed and are
    /// dropped. A message that carries a frame older than retained history is
    /// never dispatched: the sender gets a full reset instead.
    pub fn handle_message<G: Game>(
        &mut self,
        client_id: ClientId,
        message: ClientMessage<G::Event>,
        sim: &mut Simulator<G>,
    ) -> Result<Vec<GameAction<G>>, SessionError> {
        let client = self.client(client_id).ok_or(SessionError::UnknownClient(client_id))?;

        if client.status() == ClientStatus::Resetting {
            let resume_frame = client.last_frame();
            let admitted = match message {
                ClientMessage::Syn { frame } => frame == resume_frame,
                ClientMessage::Ack { .. } | ClientMessage::ResetRequest => true,
                ClientMessage::Event { .. } => false,
            };
            if !admitted {
                tracing::debug!(
                    client_id,
                    resume_frame,
                    kind = %message.kind(),
                    "reset in flight, dropping message"
                );
                return Ok(Vec::new());
            }
        }

        if let Some(frame) = message.frame()
            && sim.is_prehistoric(frame)
        {
            tracing::warn!(
                client_id,
                frame,
                oldest = sim.oldest_frame(),
                kind = %message.kind(),
                "message from prehistoric frame"
            );
            return self.send_reset(client_id, sim);
        }

        match message {
            ClientMessage::Syn { frame } => self.handle_syn(client_id, frame, sim),
            ClientMessage::Ack { latency } => {
                self.handle_ack(client_id, latency)?;
                Ok(Vec::new())
            },
            ClientMessage::ResetRequest => {
                tracing::info!(client_id, "reset requested");
                self.send_reset(client_id, sim)
            },
            ClientMessage::Event { frame, event } => {
                self.handle_event(client_id, frame, event, sim)
            },
        }
    }

    fn handle_syn<G: Game>(
        &mut self,
        client_id: ClientId,
        frame: Frame,
        sim: &mut Simulator<G>,
    ) -> Result<Vec<GameAction<G>>, SessionError> {
        let client = self.client_mut(client_id)?;
        client.record_probe(frame);
        let conn_id = client.connection();

        let current = sim.current_frame();
        let bound = self.recalculate_stable_frame(current).unwrap_or(frame.min(current));
        let dropped = sim.dispose_before(bound)?;
        if dropped > 0 {
            tracing::trace!(dropped, oldest = sim.oldest_frame(), "pruned history");
        }

        Ok(vec![SessionAction::Send {
            conn_id,
            message: ServerMessage::Ack {
                probe_frame: frame,
                current_frame: current,
                stable_frame: bound,
            },
        }])
    }

    fn handle_ack(&mut self, client_id: ClientId, latency: Duration) -> Result<(), SessionError> {
        self.client_mut(client_id)?.record_latency(latency);
        tracing::debug!(client_id, latency_ms = latency.as_millis(), "latency reported");
        Ok(())
    }

    fn handle_event<G: Game>(
        &mut self,
        client_id: ClientId,
        frame: Frame,
        event: G::Event,
        sim: &mut Simulator<G>,
    ) -> Result<Vec<GameAction<G>>, SessionError> {
        match sim.insert_event(frame, event.clone()) {
            Ok(()) => {
                tracing::debug!(client_id, frame, current = sim.current_frame(), "event accepted");
                Ok(self.broadcast(client_id, &ServerMessage::Event { client_id, frame, event }))
            },
            Err(HistoryError::PrehistoricEvent { frame, oldest }) => {
                tracing::warn!(client_id, frame, oldest, "prehistoric event, resetting sender");
                self.send_reset(client_id, sim)
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Send the full retained history to `client_id` and mark it resetting.
    fn send_reset<G: Game>(
        &mut self,
        client_id: ClientId,
        sim: &Simulator<G>,
    ) -> Result<Vec<GameAction<G>>, SessionError> {
        let client = self.client_mut(client_id)?;
        client.begin_reset(sim.current_frame());
        let conn_id = client.connection();

        let events = sim.retained_events();
        tracing::info!(
            client_id,
            oldest = sim.oldest_frame(),
            events = events.len(),
            current = sim.current_frame(),
            "sending reset"
        );

        Ok(vec![SessionAction::Send {
            conn_id,
            message: ServerMessage::Reset {
                current_frame: sim.current_frame(),
                state: sim.oldest_state().clone(),
                events,
            },
        }])
    }

    /// Participants may run ahead of the server, so the minimum is capped at
    /// `current`: the head is never pruned.
    fn recalculate_stable_frame(&mut self, current: Frame) -> Option<Frame> {
        self.stable_frame =
            self.clients.values().map(Client::last_frame).min().map(|frame| frame.min(current));
        self.stable_frame
    }

    /// One `Send` per participant other than `except`.
    fn broadcast<S: Clone, E: Clone>(
        &self,
        except: ClientId,
        message: &ServerMessage<S, E>,
    ) -> Vec<SessionAction<S, E>> {
        self.clients
            .values()
            .filter(|client| client.id() != except)
            .map(|client| SessionAction::Send {
                conn_id: client.connection(),
                message: message.clone(),
            })
            .collect()
    }
}
