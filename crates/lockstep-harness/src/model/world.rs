//! Simulated world - one server, several replicas, per-link FIFOs.
//!
//! Messages are encoded with the wire codec when sent and decoded when
//! delivered, so every exchange goes through the same framing as
//! production. Each link keeps FIFO order in both directions; which link
//! moves next is the only freedom, and the seeded RNG decides it.

use std::{collections::VecDeque, time::Duration};

use bytes::{Bytes, BytesMut};
use lockstep_client::{Client, ClientAction, ClientConfig, ClientError, ClientEvent};
use lockstep_core::{DEFAULT_TICK_INTERVAL, Retention, SimulationConfig, Simulator};
use lockstep_proto::{ClientMessage, ConnectionId, Frame, ProtocolError, ServerMessage, codec};
use lockstep_server::{GameAction, ServerDriver, ServerEvent, SessionAction, SessionError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Serialize, de::DeserializeOwned};

use super::operation::{Direction, MAX_SLOTS, Operation, OperationResult, Slot};
use crate::{
    ledger::{Ledger, LedgerEvent, LedgerState},
    sim_env::SimEnv,
};

/// Upper bound on delivery rounds in [`SimWorld::quiesce`].
const MAX_QUIESCE_ROUNDS: usize = 10_000;

/// World configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldConfig {
    /// Seed for link interleaving.
    pub seed: u64,
    /// Server history retention.
    pub retention: Retention,
    /// Server tick interval (each `ServerTick` advances the clock by this).
    pub tick_interval: Duration,
    /// Replica probe interval.
    pub syn_interval: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            retention: Retention::Unbounded,
            tick_interval: DEFAULT_TICK_INTERVAL,
            syn_interval: 2,
        }
    }
}

/// Failures that indicate a bug in the code under test.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// The server rejected an event the world generated correctly.
    #[error("server: {0}")]
    Server(#[from] SessionError),

    /// A replica failed to process a message or input.
    #[error("client: {0}")]
    Client(#[from] ClientError),

    /// A frame failed to encode or decode.
    #[error("codec: {0}")]
    Protocol(#[from] ProtocolError),

    /// A queued frame decoded to nothing.
    #[error("truncated frame on link")]
    Truncated,

    /// Links kept producing traffic.
    #[error("links did not drain after {rounds} rounds")]
    NoQuiescence {
        /// Rounds attempted.
        rounds: usize,
    },
}

/// A replica that disagrees with the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    /// Replica slot.
    pub slot: usize,
    /// Frame compared.
    pub frame: Frame,
    /// Server state at `frame`, if retained.
    pub server: Option<LedgerState>,
    /// Replica state at `frame`, if retained.
    pub client: Option<LedgerState>,
}

/// Traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorldStats {
    /// Messages delivered in either direction.
    pub delivered: u64,
    /// Messages discarded because their link closed.
    pub dropped: u64,
    /// `reset` messages delivered to replicas.
    pub resets: u64,
    /// `resetrequest` messages sent by replicas.
    pub reset_requests: u64,
}

struct Link {
    conn_id: ConnectionId,
    client: Client<Ledger, SimEnv>,
    to_server: VecDeque<Bytes>,
    to_client: VecDeque<Bytes>,
}

/// Deterministic multi-replica world.
pub struct SimWorld {
    env: SimEnv,
    config: WorldConfig,
    server: ServerDriver<Ledger, SimEnv>,
    slots: Vec<Option<Link>>,
    next_conn_id: ConnectionId,
    rng: ChaCha8Rng,
    stats: WorldStats,
}

impl SimWorld {
    /// Create a world with a running server and empty slots.
    pub fn new(config: WorldConfig) -> Self {
        let env = SimEnv::new();
        let simulation =
            SimulationConfig { tick_interval: config.tick_interval, retention: config.retention };
        let mut server = ServerDriver::new(Ledger, env.clone(), simulation);
        server.start();

        Self {
            env,
            config,
            server,
            slots: (0..MAX_SLOTS).map(|_| None).collect(),
            next_conn_id: 1,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            stats: WorldStats::default(),
        }
    }

    /// The server.
    pub fn server(&self) -> &ServerDriver<Ledger, SimEnv> {
        &self.server
    }

    /// The replica in `slot`, if connected.
    pub fn client(&self, slot: Slot) -> Option<&Client<Ledger, SimEnv>> {
        self.slots.get(slot_index(slot))?.as_ref().map(|link| &link.client)
    }

    /// Traffic counters.
    pub fn stats(&self) -> WorldStats {
        self.stats
    }

    /// Whether any link has a message in flight.
    pub fn has_pending(&self) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|link| !link.to_server.is_empty() || !link.to_client.is_empty())
    }

    /// Apply an operation.
    ///
    /// # Errors
    ///
    /// Any error means the code under test misbehaved: the world only
    /// generates traffic a well-behaved transport would.
    pub fn apply(&mut self, op: &Operation) -> Result<OperationResult, WorldError> {
        match *op {
            Operation::Connect { slot } => self.connect(slot_index(slot)),
            Operation::Disconnect { slot } => self.disconnect(slot_index(slot)),
            Operation::Input { slot, amount } => self.input(slot_index(slot), i64::from(amount)),
            Operation::ServerTick => self.server_tick(),
            Operation::ClientTick { slot } => self.client_tick(slot_index(slot)),
            Operation::Resync { slot } => self.resync(slot_index(slot)),
            Operation::Deliver { slot, direction } => self.deliver(slot_index(slot), direction),
            Operation::DeliverRandom { count } => self.deliver_random(usize::from(count)),
        }
    }

    /// Deliver until every link is empty.
    pub fn quiesce(&mut self) -> Result<(), WorldError> {
        for _ in 0..MAX_QUIESCE_ROUNDS {
            if !self.has_pending() {
                return Ok(());
            }
            self.deliver_random(usize::from(u8::MAX))?;
        }
        Err(WorldError::NoQuiescence { rounds: MAX_QUIESCE_ROUNDS })
    }

    /// Compare every initialized replica with the server.
    ///
    /// The comparison frame is the older of the two current frames. Returns
    /// the number of replicas compared.
    pub fn check_convergence(&self) -> Result<usize, Divergence> {
        let server = self.server.simulator();
        let mut compared = 0;

        for (slot, link) in self.slots.iter().enumerate() {
            let Some(replica) = link.as_ref().and_then(|link| link.client.simulator()) else {
                continue;
            };

            let frame = replica.current_frame().min(server.current_frame());
            let expected = state_at(server, frame);
            let actual = state_at(replica, frame);
            if expected.is_none() || expected != actual {
                return Err(Divergence { slot, frame, server: expected, client: actual });
            }
            compared += 1;
        }

        Ok(compared)
    }

    fn connect(&mut self, slot: usize) -> Result<OperationResult, WorldError> {
        if self.slots[slot].is_some() {
            return Ok(OperationResult::Ignored);
        }

        let conn_id = self.next_conn_id;
        self.next_conn_id += 1;

        let config = ClientConfig { syn_interval: self.config.syn_interval };
        let client = Client::new(Ledger, self.env.clone(), config);
        self.slots[slot] =
            Some(Link { conn_id, client, to_server: VecDeque::new(), to_client: VecDeque::new() });

        let actions = self.server.process_event(ServerEvent::ConnectionAccepted { conn_id })?;
        self.route_server_actions(actions)?;
        Ok(OperationResult::Applied)
    }

    fn disconnect(&mut self, slot: usize) -> Result<OperationResult, WorldError> {
        let Some(link) = self.slots[slot].take() else {
            return Ok(OperationResult::Ignored);
        };

        let in_flight = link.to_server.len() + link.to_client.len();
        self.stats.dropped += in_flight as u64;

        let conn_id = link.conn_id;
        let actions = self.server.process_event(ServerEvent::ConnectionClosed { conn_id })?;
        self.route_server_actions(actions)?;
        Ok(OperationResult::Applied)
    }

    fn input(&mut self, slot: usize, amount: i64) -> Result<OperationResult, WorldError> {
        let Some(link) = self.slots[slot].as_mut() else {
            return Ok(OperationResult::Ignored);
        };
        let Some(client_id) = link.client.client_id() else {
            return Ok(OperationResult::Ignored);
        };

        let event = LedgerEvent::Deposit { client_id, amount };
        let actions = link.client.handle(ClientEvent::Input(event))?;
        route_client_actions(link, actions, &mut self.stats)?;
        Ok(OperationResult::Applied)
    }

    fn server_tick(&mut self) -> Result<OperationResult, WorldError> {
        self.env.advance(self.config.tick_interval);
        let actions = self.server.process_event(ServerEvent::Tick)?;
        self.route_server_actions(actions)?;
        Ok(OperationResult::Applied)
    }

    fn client_tick(&mut self, slot: usize) -> Result<OperationResult, WorldError> {
        let Some(link) = self.slots[slot].as_mut() else {
            return Ok(OperationResult::Ignored);
        };
        if !link.client.is_initialized() {
            return Ok(OperationResult::Ignored);
        }

        let actions = link.client.handle(ClientEvent::Tick)?;
        route_client_actions(link, actions, &mut self.stats)?;
        Ok(OperationResult::Applied)
    }

    fn resync(&mut self, slot: usize) -> Result<OperationResult, WorldError> {
        let Some(link) = self.slots[slot].as_mut() else {
            return Ok(OperationResult::Ignored);
        };
        if !link.client.is_initialized() {
            return Ok(OperationResult::Ignored);
        }

        let actions = link.client.handle(ClientEvent::Resync)?;
        route_client_actions(link, actions, &mut self.stats)?;
        Ok(OperationResult::Applied)
    }

    fn deliver(
        &mut self,
        slot: usize,
        direction: Direction,
    ) -> Result<OperationResult, WorldError> {
        match direction {
            Direction::ToServer => self.deliver_to_server(slot),
            Direction::ToClient => self.deliver_to_client(slot),
        }
    }

    fn deliver_to_server(&mut self, slot: usize) -> Result<OperationResult, WorldError> {
        let Some(link) = self.slots[slot].as_mut() else {
            return Ok(OperationResult::Ignored);
        };
        let Some(frame) = link.to_server.pop_front() else {
            return Ok(OperationResult::Ignored);
        };

        let conn_id = link.conn_id;
        let message: ClientMessage<LedgerEvent> = decode_frame(&frame)?;
        self.stats.delivered += 1;

        let actions = self.server.process_event(ServerEvent::MessageReceived { conn_id, message })?;
        self.route_server_actions(actions)?;
        Ok(OperationResult::Applied)
    }

    fn deliver_to_client(&mut self, slot: usize) -> Result<OperationResult, WorldError> {
        let Some(link) = self.slots[slot].as_mut() else {
            return Ok(OperationResult::Ignored);
        };
        let Some(frame) = link.to_client.pop_front() else {
            return Ok(OperationResult::Ignored);
        };

        let message: ServerMessage<LedgerState, LedgerEvent> = decode_frame(&frame)?;
        self.stats.delivered += 1;
        if matches!(message, ServerMessage::Reset { .. }) {
            self.stats.resets += 1;
        }

        let actions = link.client.handle(ClientEvent::Received(message))?;
        route_client_actions(link, actions, &mut self.stats)?;
        Ok(OperationResult::Applied)
    }

    fn deliver_random(&mut self, count: usize) -> Result<OperationResult, WorldError> {
        let mut result = OperationResult::Ignored;

        for _ in 0..count {
            let pending: Vec<(usize, Direction)> = self
                .slots
                .iter()
                .enumerate()
                .filter_map(|(slot, link)| link.as_ref().map(|link| (slot, link)))
                .flat_map(|(slot, link)| {
                    let up = (!link.to_server.is_empty()).then_some((slot, Direction::ToServer));
                    let down = (!link.to_client.is_empty()).then_some((slot, Direction::ToClient));
                    up.into_iter().chain(down)
                })
                .collect();

            if pending.is_empty() {
                break;
            }

            let (slot, direction) = pending[self.rng.gen_range(0..pending.len())];
            result = self.deliver(slot, direction)?;
        }

        Ok(result)
    }

    fn route_server_actions(&mut self, actions: Vec<GameAction<Ledger>>) -> Result<(), WorldError> {
        for action in actions {
            let SessionAction::Send { conn_id, message } = action else {
                continue;
            };

            let frame = encode_frame(&message)?;
            match self.slots.iter_mut().flatten().find(|link| link.conn_id == conn_id) {
                Some(link) => link.to_client.push_back(frame),
                None => self.stats.dropped += 1,
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SimWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimWorld")
            .field("config", &self.config)
            .field("frame", &self.server.simulator().current_frame())
            .field("clients", &self.slots.iter().flatten().count())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

fn route_client_actions(
    link: &mut Link,
    actions: Vec<ClientAction<LedgerEvent>>,
    stats: &mut WorldStats,
) -> Result<(), WorldError> {
    for action in actions {
        match action {
            ClientAction::Send(message) => {
                if matches!(message, ClientMessage::ResetRequest) {
                    stats.reset_requests += 1;
                }
                link.to_server.push_back(encode_frame(&message)?);
            },
            ClientAction::Synchronized { .. } => {},
        }
    }
    Ok(())
}

fn state_at(simulator: &Simulator<Ledger>, frame: Frame) -> Option<LedgerState> {
    simulator.frame_at(frame).ok().map(|tf| tf.state().clone())
}

fn slot_index(slot: Slot) -> usize {
    usize::from(slot) % MAX_SLOTS
}

fn encode_frame<T: Serialize>(message: &T) -> Result<Bytes, WorldError> {
    let mut buf = BytesMut::new();
    codec::encode(message, &mut buf)?;
    Ok(buf.freeze())
}

fn decode_frame<T: DeserializeOwned>(frame: &Bytes) -> Result<T, WorldError> {
    let mut buf = BytesMut::from(&frame[..]);
    codec::decode(&mut buf)?.ok_or(WorldError::Truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_queues_initialize_until_delivered() {
        let mut world = SimWorld::new(WorldConfig::default());

        assert!(world.apply(&Operation::Connect { slot: 0 }).unwrap().is_applied());
        assert!(world.has_pending());
        assert!(!world.client(0).unwrap().is_initialized());

        let delivered = world
            .apply(&Operation::Deliver { slot: 0, direction: Direction::ToClient })
            .unwrap();

        assert!(delivered.is_applied());
        assert!(world.client(0).unwrap().is_initialized());
        assert!(!world.has_pending());
    }

    #[test]
    fn operations_on_empty_slots_are_ignored() {
        let mut world = SimWorld::new(WorldConfig::default());

        for op in [
            Operation::Disconnect { slot: 1 },
            Operation::Input { slot: 1, amount: 3 },
            Operation::ClientTick { slot: 1 },
            Operation::Resync { slot: 1 },
            Operation::Deliver { slot: 1, direction: Direction::ToServer },
            Operation::DeliverRandom { count: 4 },
        ] {
            assert_eq!(world.apply(&op).unwrap(), OperationResult::Ignored, "{op:?}");
        }
    }

    #[test]
    fn slots_wrap_around() {
        let mut world = SimWorld::new(WorldConfig::default());
        world.apply(&Operation::Connect { slot: 5 }).unwrap();
        assert!(world.client(1).is_some());
    }

    #[test]
    fn disconnect_drops_in_flight_traffic() {
        let mut world = SimWorld::new(WorldConfig::default());
        world.apply(&Operation::Connect { slot: 0 }).unwrap();

        world.apply(&Operation::Disconnect { slot: 0 }).unwrap();

        assert_eq!(world.stats().dropped, 1);
        assert!(!world.has_pending());
        assert!(world.server().session().is_empty());
    }

    #[test]
    fn server_tick_advances_exactly_one_frame() {
        let mut world = SimWorld::new(WorldConfig::default());
        for _ in 0..3 {
            world.apply(&Operation::ServerTick).unwrap();
        }
        assert_eq!(world.server().simulator().current_frame(), 3);
    }
}
