//! Server driver tests

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use lockstep_core::{Environment, Retention, SimulationConfig};
use lockstep_proto::{ClientMessage, ServerMessage};
use lockstep_server::{
    ServerDriver, ServerEvent, SessionAction, SessionError,
    demo::{Arena, ArenaEvent},
};

// Test environment with a hand-driven clock
#[derive(Clone)]
struct TestEnv {
    now: Arc<Mutex<Instant>>,
}

impl TestEnv {
    fn new() -> Self {
        Self { now: Arc::new(Mutex::new(Instant::now())) }
    }

    fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Environment for TestEnv {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }
}

const TICK: Duration = Duration::from_millis(10);

fn driver(env: &TestEnv) -> ServerDriver<Arena, TestEnv> {
    let config = SimulationConfig { tick_interval: TICK, retention: Retention::Unbounded };
    ServerDriver::new(Arena, env.clone(), config)
}

#[test]
fn accepted_connection_is_initialized() {
    let env = TestEnv::new();
    let mut driver = driver(&env);

    let actions = driver.process_event(ServerEvent::ConnectionAccepted { conn_id: 3 }).unwrap();

    assert!(matches!(
        &actions[0],
        SessionAction::Send { conn_id: 3, message: ServerMessage::Initialize { client_id: 0, .. } }
    ));
    assert_eq!(driver.session().len(), 1);
}

#[test]
fn ticks_follow_the_clock_only_while_started() {
    let env = TestEnv::new();
    let mut driver = driver(&env);

    env.advance(TICK * 5);
    driver.process_event(ServerEvent::Tick).unwrap();
    assert_eq!(driver.simulator().current_frame(), 0);
    assert_eq!(driver.time_until_next_tick(), None);

    driver.start();
    assert_eq!(driver.time_until_next_tick(), Some(TICK));
    env.advance(TICK * 3);
    driver.process_event(ServerEvent::Tick).unwrap();
    assert_eq!(driver.simulator().current_frame(), 3);

    driver.stop();
    env.advance(TICK * 3);
    driver.process_event(ServerEvent::Tick).unwrap();
    assert_eq!(driver.simulator().current_frame(), 3);
    assert!(!driver.is_running());
}

#[test]
fn messages_are_routed_by_connection() {
    let env = TestEnv::new();
    let mut driver = driver(&env);
    driver.process_event(ServerEvent::ConnectionAccepted { conn_id: 3 }).unwrap();
    driver.process_event(ServerEvent::ConnectionAccepted { conn_id: 8 }).unwrap();

    let event = ArenaEvent::Move { client_id: 1, delta: 4 };
    let actions = driver
        .process_event(ServerEvent::MessageReceived {
            conn_id: 8,
            message: ClientMessage::Event { frame: 0, event: event.clone() },
        })
        .unwrap();

    assert_eq!(
        actions,
        vec![SessionAction::Send {
            conn_id: 3,
            message: ServerMessage::Event { client_id: 1, frame: 0, event },
        }]
    );
}

#[test]
fn unknown_connections_are_errors_and_leave_the_driver_usable() {
    let env = TestEnv::new();
    let mut driver = driver(&env);

    let err = driver
        .process_event(ServerEvent::MessageReceived {
            conn_id: 42,
            message: ClientMessage::Syn { frame: 0 },
        })
        .unwrap_err();
    assert_eq!(err, SessionError::UnknownConnection(42));

    let err = driver.process_event(ServerEvent::ConnectionClosed { conn_id: 42 }).unwrap_err();
    assert_eq!(err, SessionError::UnknownConnection(42));

    assert!(driver.process_event(ServerEvent::ConnectionAccepted { conn_id: 42 }).is_ok());
}

#[test]
fn closing_the_last_connection_empties_the_session() {
    let env = TestEnv::new();
    let mut driver = driver(&env);
    driver.start();
    driver.process_event(ServerEvent::ConnectionAccepted { conn_id: 1 }).unwrap();
    env.advance(TICK * 2);
    driver.process_event(ServerEvent::Tick).unwrap();

    let actions = driver.process_event(ServerEvent::ConnectionClosed { conn_id: 1 }).unwrap();

    assert_eq!(
        actions,
        vec![SessionAction::ClientRemoved { client_id: 0 }, SessionAction::SessionEmpty]
    );
    assert!(driver.session().is_empty());
    assert_eq!(driver.simulator().head().events(), &[ArenaEvent::Disconnect { client_id: 0 }]);
}

#[test]
fn prehistoric_probe_resets_instead_of_failing() {
    let env = TestEnv::new();
    let mut driver = driver(&env);
    driver.start();
    driver.process_event(ServerEvent::ConnectionAccepted { conn_id: 1 }).unwrap();
    driver.process_event(ServerEvent::ConnectionAccepted { conn_id: 2 }).unwrap();
    env.advance(TICK * 6);
    driver.process_event(ServerEvent::Tick).unwrap();

    for conn_id in [1, 2] {
        driver
            .process_event(ServerEvent::MessageReceived {
                conn_id,
                message: ClientMessage::Syn { frame: 5 },
            })
            .unwrap();
    }
    assert_eq!(driver.simulator().oldest_frame(), 5);

    let actions = driver
        .process_event(ServerEvent::MessageReceived {
            conn_id: 2,
            message: ClientMessage::Syn { frame: 1 },
        })
        .unwrap();

    assert!(matches!(
        &actions[..],
        [SessionAction::Send { conn_id: 2, message: ServerMessage::Reset { current_frame: 6, .. } }]
    ));
}

#[test]
fn idle_server_keeps_only_the_head() {
    let env = TestEnv::new();
    let mut driver = driver(&env);
    driver.start();

    env.advance(TICK * 40);
    driver.process_event(ServerEvent::Tick).unwrap();
    assert_eq!(driver.simulator().current_frame(), 40);
    assert_eq!(driver.simulator().retained_frames(), 1);

    let actions = driver.process_event(ServerEvent::ConnectionAccepted { conn_id: 1 }).unwrap();
    assert!(matches!(
        &actions[0],
        SessionAction::Send {
            message: ServerMessage::Initialize { state, current_frame: 40, .. },
            ..
        } if state.frame == 40
    ));

    env.advance(TICK * 2);
    driver.process_event(ServerEvent::Tick).unwrap();
    assert_eq!(driver.simulator().oldest_frame(), 40);
}
