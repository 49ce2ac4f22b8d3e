//! Lockstep session server.
//!
//! This crate provides the production server implementation using:
//! - Tokio for the async runtime and TCP transport
//! - Length-delimited CBOR frames on the wire
//! - System time for the tick cadence
//!
//! ## Architecture
//!
//! ```text
//! lockstep-server
//!   ├─ SystemEnv          (production Environment impl)
//!   ├─ TcpTransport       (listener + per-connection reader/writer tasks)
//!   ├─ ConnectionRegistry (connection id -> outbound queue)
//!   ├─ ServerDriver       (Sans-IO orchestrator)
//!   └─ Session            (participants, stable frame, resets)
//! ```
//!
//! All connection events and timer wakeups funnel through one channel into
//! the task that owns the [`ServerDriver`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
pub mod demo;
mod driver;
mod error;
mod registry;
mod session;
mod system_env;
mod transport;

use std::{net::SocketAddr, time::Duration};

use bytes::BytesMut;
pub use client::{Client, ClientStatus};
pub use driver::{ServerDriver, ServerEvent};
pub use error::ServerError;
use lockstep_core::{Environment, Game, ParticipantEvent, SimulationConfig};
use lockstep_proto::codec;
pub use registry::ConnectionRegistry;
use serde::{Serialize, de::DeserializeOwned};
pub use session::{GameAction, Session, SessionAction, SessionError};
pub use system_env::SystemEnv;
use tokio::{net::TcpStream, sync::mpsc};
pub use transport::{TcpTransport, spawn_connection};

/// Depth of the queue feeding the server task.
const EVENT_QUEUE_DEPTH: usize = 1024;

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433")
    pub bind_address: String,
    /// Tick cadence and history retention
    pub simulation: SimulationConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0:4433".to_string(), simulation: SimulationConfig::default() }
    }
}

impl ServerRuntimeConfig {
    fn validate(&self) -> Result<(), ServerError> {
        if self.bind_address.is_empty() {
            return Err(ServerError::Config("bind address is empty".to_string()));
        }
        if self.simulation.tick_interval.is_zero() {
            return Err(ServerError::Config("tick interval must be positive".to_string()));
        }
        Ok(())
    }
}

/// Production lockstep server.
///
/// Wraps `ServerDriver` with the TCP transport and system environment.
pub struct Server<G: Game> {
    driver: ServerDriver<G, SystemEnv>,
    transport: TcpTransport,
    registry: ConnectionRegistry,
}

impl<G> Server<G>
where
    G: Game,
    G::State: Serialize,
    G::Event: ParticipantEvent + Serialize + DeserializeOwned + Send + 'static,
{
    /// Create and bind a new server.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The configuration is invalid
    /// - Binding to the address fails
    pub async fn bind(config: ServerRuntimeConfig, game: G) -> Result<Self, ServerError> {
        config.validate()?;

        let driver = ServerDriver::new(game, SystemEnv::new(), config.simulation);
        let transport = TcpTransport::bind(&config.bind_address).await?;

        Ok(Self { driver, transport, registry: ConnectionRegistry::new() })
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Run the server until Ctrl-C.
    ///
    /// Starts the simulation clock, then serves connections, messages and
    /// ticks from a single task.
    pub async fn run(self) -> Result<(), ServerError> {
        let Self { mut driver, transport, mut registry } = self;
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let env = *driver.env();

        tracing::info!(addr = %transport.local_addr()?, "server running");
        driver.start();

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            let next_tick = driver.time_until_next_tick();

            tokio::select! {
                accepted = transport.accept() => match accepted {
                    Ok((stream, peer)) => {
                        accept(&mut driver, &mut registry, stream, peer, &events_tx);
                    },
                    Err(e) => tracing::error!(error = %e, "accept failed"),
                },
                Some(event) = events_rx.recv() => dispatch(&mut driver, &mut registry, event),
                () = wait_for_tick(env, next_tick) => {
                    dispatch(&mut driver, &mut registry, ServerEvent::Tick);
                },
                result = &mut shutdown => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "failed to listen for ctrl-c");
                    }
                    tracing::info!(frame = driver.simulator().current_frame(), "shutting down");
                    driver.stop();
                    break;
                },
            }
        }

        Ok(())
    }
}

async fn wait_for_tick(env: SystemEnv, delay: Option<Duration>) {
    match delay {
        Some(delay) => env.sleep(delay).await,
        None => std::future::pending().await,
    }
}

fn accept<G>(
    driver: &mut ServerDriver<G, SystemEnv>,
    registry: &mut ConnectionRegistry,
    stream: TcpStream,
    peer: SocketAddr,
    events: &mpsc::Sender<ServerEvent<G::Event>>,
) where
    G: Game,
    G::State: Serialize,
    G::Event: ParticipantEvent + Serialize + DeserializeOwned + Send + 'static,
{
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let conn_id = registry.register(outbound_tx);
    tracing::debug!(conn_id, %peer, "connection accepted");

    spawn_connection(conn_id, stream, events.clone(), outbound_rx);

    match driver.process_event(ServerEvent::ConnectionAccepted { conn_id }) {
        Ok(actions) => execute_actions(registry, actions),
        Err(e) => {
            tracing::warn!(conn_id, error = %e, "rejecting connection");
            registry.unregister(conn_id);
        },
    }
}

fn dispatch<G>(
    driver: &mut ServerDriver<G, SystemEnv>,
    registry: &mut ConnectionRegistry,
    event: ServerEvent<G::Event>,
) where
    G: Game,
    G::State: Serialize,
    G::Event: ParticipantEvent + Serialize,
{
    if let ServerEvent::ConnectionClosed { conn_id } = event {
        registry.unregister(conn_id);
        tracing::debug!(conn_id, "connection closed");
    }

    match driver.process_event(event) {
        Ok(actions) => execute_actions(registry, actions),
        Err(e) => tracing::warn!(error = %e, "event processing failed"),
    }
}

/// Execute session actions.
fn execute_actions<S, E>(registry: &ConnectionRegistry, actions: Vec<SessionAction<S, E>>)
where
    S: Serialize,
    E: Serialize,
{
    for action in actions {
        match action {
            SessionAction::Send { conn_id, message } => {
                let mut buf = BytesMut::new();
                if let Err(e) = codec::encode(&message, &mut buf) {
                    tracing::error!(conn_id, error = %e, "failed to encode message");
                    continue;
                }
                if !registry.send(conn_id, buf.freeze()) {
                    tracing::debug!(conn_id, "connection gone, message dropped");
                }
            },
            SessionAction::ClientAdded { client_id } => {
                tracing::debug!(client_id, clients = registry.len(), "client added");
            },
            SessionAction::ClientRemoved { client_id } => {
                tracing::debug!(client_id, clients = registry.len(), "client removed");
            },
            SessionAction::SessionEmpty => tracing::info!("no clients connected"),
        }
    }
}
