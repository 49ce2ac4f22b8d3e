//! Server Driver
//!
//! Sans-IO orchestrator tying the simulation clock to the session.
//!
//! The runtime translates transport callbacks and timer wakeups into
//! [`ServerEvent`]s and executes the returned
//! [`SessionAction`](crate::session::SessionAction)s. All state
//! lives here, so a single task owning the driver serializes every access to
//! history and the client set.

use std::time::Duration;

use lockstep_core::{
    Environment, Game, ParticipantEvent, SimulationConfig, SimulationDriver, Simulator,
};
use lockstep_proto::{ClientId, ClientMessage, ConnectionId};

use crate::session::{GameAction, Session, SessionError};

/// Inputs to the server driver.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent<E> {
    /// A transport connection was opened.
    ConnectionAccepted {
        /// Runtime-assigned connection id.
        conn_id: ConnectionId,
    },

    /// A decoded message arrived on a connection.
    MessageReceived {
        /// Connection the message arrived on.
        conn_id: ConnectionId,
        /// The message.
        message: ClientMessage<E>,
    },

    /// A transport connection was closed by either side.
    ConnectionClosed {
        /// Connection that closed.
        conn_id: ConnectionId,
    },

    /// The tick timer fired.
    Tick,
}

/// Session server state machine.
pub struct ServerDriver<G: Game, E: Environment> {
    simulation: SimulationDriver<G, E>,
    session: Session,
}

impl<G, E> ServerDriver<G, E>
where
    G: Game,
    G::Event: ParticipantEvent,
    E: Environment,
{
    /// Create a driver with a stopped simulation.
    pub fn new(game: G, env: E, config: SimulationConfig) -> Self {
        Self { simulation: SimulationDriver::new(game, env, config), session: Session::new() }
    }

    /// Process one event.
    ///
    /// Prehistoric traffic is handled inside the session (reset or drop) and
    /// never surfaces here. Any other error aborts only this event; the
    /// driver stays usable.
    pub fn process_event(
        &mut self,
        event: ServerEvent<G::Event>,
    ) -> Result<Vec<GameAction<G>>, SessionError> {
        match event {
            ServerEvent::ConnectionAccepted { conn_id } => {
                let (_, actions) =
                    self.session.connect(conn_id, self.simulation.simulator_mut())?;
                Ok(actions)
            },
            ServerEvent::MessageReceived { conn_id, message } => {
                let client_id = self.client_for(conn_id)?;
                tracing::trace!(client_id, conn_id, kind = %message.kind(), "message received");
                self.session.handle_message(client_id, message, self.simulation.simulator_mut())
            },
            ServerEvent::ConnectionClosed { conn_id } => {
                let client_id = self.client_for(conn_id)?;
                self.session.disconnect(client_id, self.simulation.simulator_mut())
            },
            ServerEvent::Tick => {
                self.simulation.poll()?;
                if self.session.is_empty() {
                    // Nobody connected: only the head is needed.
                    let simulator = self.simulation.simulator_mut();
                    simulator.dispose_before(simulator.current_frame())?;
                }
                Ok(Vec::new())
            },
        }
    }

    fn client_for(&self, conn_id: ConnectionId) -> Result<ClientId, SessionError> {
        self.session
            .client_by_connection(conn_id)
            .map(|client| client.id())
            .ok_or(SessionError::UnknownConnection(conn_id))
    }

    /// Start ticking.
    pub fn start(&mut self) {
        self.simulation.start();
    }

    /// Stop ticking.
    pub fn stop(&mut self) {
        self.simulation.stop();
    }

    /// Whether the simulation is ticking.
    pub fn is_running(&self) -> bool {
        self.simulation.is_running()
    }

    /// Delay until the next `Tick` is due, or `None` while stopped.
    pub fn time_until_next_tick(&self) -> Option<Duration> {
        self.simulation.time_until_next_tick()
    }

    /// The history store.
    pub fn simulator(&self) -> &Simulator<G> {
        self.simulation.simulator()
    }

    /// The connected participants.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The environment.
    pub fn env(&self) -> &E {
        self.simulation.env()
    }
}

