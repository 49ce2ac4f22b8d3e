//! Fuzz target for the server [`ServerDriver`]
//!
//! Hostile or confused peers must never corrupt the session.
//!
//! # Strategy
//!
//! - Event sequences: Arbitrary accepts, closes, ticks and messages on a
//!   small connection space so ids collide often
//! - Probes and events for any frame, past or future
//! - Raw bytes pushed through the codec before reaching the driver
//!
//! # Invariants
//!
//! - NEVER panic
//! - Prehistoric traffic never surfaces as an error
//! - Errors only for unknown or duplicate connections, as tracked here
//! - Session size matches the set of open connections
//! - History never prunes past any participant's last reported frame
//! - The current frame never moves backwards

#![no_main]

use std::{collections::BTreeSet, time::Duration};

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use lockstep_core::{Retention, SimulationConfig};
use lockstep_harness::{Ledger, LedgerEvent, SimEnv};
use lockstep_proto::{ClientMessage, ConnectionId, codec};
use lockstep_server::{ServerDriver, ServerEvent, SessionError};

#[derive(Debug, Clone, Arbitrary)]
enum FuzzEvent {
    Accept { conn: u8 },
    Close { conn: u8 },
    Tick { advance_ms: u8 },
    Message { conn: u8, message: FuzzedMessage },
}

#[derive(Debug, Clone, Arbitrary)]
enum FuzzedMessage {
    Syn { frame: u16 },
    Ack { latency_ms: u16 },
    ResetRequest,
    Event { frame: u16, client_id: u8, amount: i8 },
    RawBytes(Vec<u8>),
}

impl FuzzedMessage {
    fn into_message(self) -> Option<ClientMessage<LedgerEvent>> {
        match self {
            Self::Syn { frame } => Some(ClientMessage::Syn { frame: u64::from(frame) }),
            Self::Ack { latency_ms } => Some(ClientMessage::Ack {
                latency: Duration::from_millis(u64::from(latency_ms)),
            }),
            Self::ResetRequest => Some(ClientMessage::ResetRequest),
            Self::Event { frame, client_id, amount } => Some(ClientMessage::Event {
                frame: u64::from(frame),
                event: LedgerEvent::Deposit {
                    client_id: u64::from(client_id),
                    amount: i64::from(amount),
                },
            }),
            Self::RawBytes(bytes) => {
                let mut buf = BytesMut::from(&bytes[..]);
                codec::decode(&mut buf).ok().flatten()
            },
        }
    }
}

/// Keep the connection space small so collisions are common.
fn conn_id(conn: u8) -> ConnectionId {
    u64::from(conn % 8)
}

fuzz_target!(|events: Vec<FuzzEvent>| {
    let env = SimEnv::new();
    let config = SimulationConfig {
        tick_interval: Duration::from_millis(10),
        retention: Retention::Unbounded,
    };
    let mut driver = ServerDriver::new(Ledger, env.clone(), config);
    driver.start();

    let mut open = BTreeSet::new();
    let mut last_current = 0;

    for event in events {
        let (event, expected_error) = match event {
            FuzzEvent::Accept { conn } => {
                let conn_id = conn_id(conn);
                let error =
                    (!open.insert(conn_id)).then_some(SessionError::ConnectionInUse(conn_id));
                (ServerEvent::ConnectionAccepted { conn_id }, error)
            },
            FuzzEvent::Close { conn } => {
                let conn_id = conn_id(conn);
                let error =
                    (!open.remove(&conn_id)).then_some(SessionError::UnknownConnection(conn_id));
                (ServerEvent::ConnectionClosed { conn_id }, error)
            },
            FuzzEvent::Tick { advance_ms } => {
                env.advance(Duration::from_millis(u64::from(advance_ms)));
                (ServerEvent::Tick, None)
            },
            FuzzEvent::Message { conn, message } => {
                let Some(message) = message.into_message() else {
                    continue;
                };
                let conn_id = conn_id(conn);
                let error =
                    (!open.contains(&conn_id)).then_some(SessionError::UnknownConnection(conn_id));
                (ServerEvent::MessageReceived { conn_id, message }, error)
            },
        };

        match (driver.process_event(event), expected_error) {
            (Ok(_), None) => {},
            (Err(actual), Some(expected)) => assert_eq!(actual, expected),
            (result, expected) => panic!("expected {expected:?}, got {result:?}"),
        }

        let simulator = driver.simulator();
        let session = driver.session();

        assert_eq!(session.len(), open.len());
        assert!(simulator.current_frame() >= last_current, "current frame moved backwards");
        last_current = simulator.current_frame();

        for client in session.clients() {
            assert!(
                client.last_frame() >= simulator.oldest_frame(),
                "client {} at frame {} lost history (oldest {})",
                client.id(),
                client.last_frame(),
                simulator.oldest_frame()
            );
        }
    }
});
