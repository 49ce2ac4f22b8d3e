//! Session protocol tests

use std::{num::NonZeroUsize, time::Duration};

use lockstep_core::{Retention, Simulator};
use lockstep_proto::{ClientMessage, ConnectionId, FrameEvent, ServerMessage};
use lockstep_server::{
    ClientStatus, Session, SessionAction, SessionError,
    demo::{Arena, ArenaEvent, ArenaState},
};
use proptest::prelude::*;

type Action = SessionAction<ArenaState, ArenaEvent>;
type Message = ServerMessage<ArenaState, ArenaEvent>;

fn simulator() -> Simulator<Arena> {
    Simulator::new(Arena, Retention::Unbounded)
}

/// Every `Send` in `actions`, in order.
fn sends(actions: &[Action]) -> Vec<(ConnectionId, Message)> {
    actions
        .iter()
        .filter_map(|action| match action {
            SessionAction::Send { conn_id, message } => Some((*conn_id, message.clone())),
            _ => None,
        })
        .collect()
}

fn movement(client_id: u64, delta: i64) -> ArenaEvent {
    ArenaEvent::Move { client_id, delta }
}

#[test]
fn first_client_gets_initialize_only() {
    let mut sim = simulator();
    let mut session = Session::new();

    let (client_id, actions) = session.connect(10, &mut sim).unwrap();

    assert_eq!(client_id, 0);
    assert_eq!(
        actions,
        vec![
            SessionAction::Send {
                conn_id: 10,
                message: ServerMessage::Initialize {
                    client_id: 0,
                    state: ArenaState::default(),
                    events: vec![FrameEvent::new(0, ArenaEvent::Connect { client_id: 0 })],
                    current_frame: 0,
                },
            },
            SessionAction::ClientAdded { client_id: 0 },
        ]
    );
    assert_eq!(session.len(), 1);
}

#[test]
fn later_clients_are_announced_to_others() {
    let mut sim = simulator();
    let mut session = Session::new();
    session.connect(10, &mut sim).unwrap();
    sim.fast_forward(4).unwrap();

    let (client_id, actions) = session.connect(11, &mut sim).unwrap();
    let sent = sends(&actions);

    assert_eq!(client_id, 1);
    assert_eq!(sent[0], (10, ServerMessage::Connect { client_id: 1, frame: 4 }));
    assert!(matches!(
        &sent[1],
        (11, ServerMessage::Initialize { client_id: 1, current_frame: 4, events, .. })
            if events.len() == 2
    ));
    assert_eq!(sent.len(), 2);
}

#[test]
fn initialize_payload_rebuilds_the_present() {
    let mut sim = simulator();
    let mut session = Session::new();
    session.connect(10, &mut sim).unwrap();
    sim.fast_forward(3).unwrap();
    session
        .handle_message(0, ClientMessage::Event { frame: 2, event: movement(0, 5) }, &mut sim)
        .unwrap();
    session
        .handle_message(0, ClientMessage::Event { frame: 6, event: movement(0, 1) }, &mut sim)
        .unwrap();
    sim.fast_forward(5).unwrap();

    let (_, actions) = session.connect(11, &mut sim).unwrap();
    let Some((_, ServerMessage::Initialize { state, events, current_frame, .. })) =
        sends(&actions).into_iter().find(|(conn, _)| *conn == 11)
    else {
        panic!("no initialize sent");
    };

    let retention = Retention::Unbounded;
    let replica = Simulator::from_snapshot(Arena, retention, state, events, current_frame).unwrap();
    assert_eq!(replica.current_state(), sim.current_state());
    assert_eq!(replica.future_events().count(), 1);
}

#[test]
fn duplicate_connection_is_rejected() {
    let mut sim = simulator();
    let mut session = Session::new();
    session.connect(10, &mut sim).unwrap();

    assert_eq!(session.connect(10, &mut sim).unwrap_err(), SessionError::ConnectionInUse(10));
    assert_eq!(session.len(), 1);
}

#[test]
fn disconnect_notifies_remaining_clients() {
    let mut sim = simulator();
    let mut session = Session::new();
    session.connect(10, &mut sim).unwrap();
    session.connect(11, &mut sim).unwrap();
    session.connect(12, &mut sim).unwrap();
    sim.fast_forward(2).unwrap();

    let actions = session.disconnect(1, &mut sim).unwrap();

    assert_eq!(
        sends(&actions),
        vec![
            (10, ServerMessage::Disconnect { client_id: 1, frame: 2 }),
            (12, ServerMessage::Disconnect { client_id: 1, frame: 2 }),
        ]
    );
    assert!(actions.contains(&SessionAction::ClientRemoved { client_id: 1 }));
    assert!(!actions.contains(&SessionAction::SessionEmpty));
    assert_eq!(sim.head().events(), &[ArenaEvent::Disconnect { client_id: 1 }]);
    assert!(session.client_by_connection(11).is_none());
}

#[test]
fn last_disconnect_empties_session() {
    let mut sim = simulator();
    let mut session = Session::new();
    session.connect(10, &mut sim).unwrap();

    let actions = session.disconnect(0, &mut sim).unwrap();

    assert_eq!(actions.last(), Some(&SessionAction::SessionEmpty));
    assert!(session.is_empty());
    assert_eq!(session.disconnect(0, &mut sim).unwrap_err(), SessionError::UnknownClient(0));
}

#[test]
fn events_are_applied_and_relayed_to_others() {
    let mut sim = simulator();
    let mut session = Session::new();
    session.connect(10, &mut sim).unwrap();
    session.connect(11, &mut sim).unwrap();
    sim.fast_forward(5).unwrap();

    let actions = session
        .handle_message(0, ClientMessage::Event { frame: 3, event: movement(0, 7) }, &mut sim)
        .unwrap();

    assert_eq!(
        sends(&actions),
        vec![(11, ServerMessage::Event { client_id: 0, frame: 3, event: movement(0, 7) })]
    );
    assert_eq!(sim.frame_at(3).unwrap().events(), &[movement(0, 7)]);
    assert_eq!(sim.current_state().players.get(&0), Some(&7));
}

#[test]
fn future_events_are_queued_and_relayed() {
    let mut sim = simulator();
    let mut session = Session::new();
    session.connect(10, &mut sim).unwrap();
    session.connect(11, &mut sim).unwrap();

    let actions = session
        .handle_message(1, ClientMessage::Event { frame: 8, event: movement(1, -2) }, &mut sim)
        .unwrap();

    assert_eq!(sends(&actions).len(), 1);
    assert_eq!(sim.future_events().count(), 1);
    assert_eq!(sim.current_frame(), 0);
}

#[test]
fn syn_prunes_history_before_the_stable_frame() {
    let mut sim = simulator();
    let mut session = Session::new();
    session.connect(10, &mut sim).unwrap();
    session.connect(11, &mut sim).unwrap();
    sim.fast_forward(12).unwrap();

    let first = session.handle_message(0, ClientMessage::Syn { frame: 10 }, &mut sim).unwrap();
    assert_eq!(
        sends(&first),
        vec![(10, ServerMessage::Ack { probe_frame: 10, current_frame: 12, stable_frame: 0 })]
    );
    assert_eq!(sim.oldest_frame(), 0);

    let second = session.handle_message(1, ClientMessage::Syn { frame: 7 }, &mut sim).unwrap();
    assert_eq!(
        sends(&second),
        vec![(11, ServerMessage::Ack { probe_frame: 7, current_frame: 12, stable_frame: 7 })]
    );
    assert_eq!(session.stable_frame(), Some(7));
    assert_eq!(sim.oldest_frame(), 7);
    assert_eq!(sim.retained_frames(), 6);
}

#[test]
fn syn_ahead_of_the_server_keeps_the_head() {
    let mut sim = simulator();
    let mut session = Session::new();
    session.connect(10, &mut sim).unwrap();
    sim.fast_forward(3).unwrap();

    let actions = session.handle_message(0, ClientMessage::Syn { frame: 9 }, &mut sim).unwrap();

    assert_eq!(
        sends(&actions),
        vec![(10, ServerMessage::Ack { probe_frame: 9, current_frame: 3, stable_frame: 3 })]
    );
    assert_eq!(session.stable_frame(), Some(3));
    assert_eq!(sim.oldest_frame(), 3);
    assert_eq!(sim.current_frame(), 3);
}

#[test]
fn ack_records_latency() {
    let mut sim = simulator();
    let mut session = Session::new();
    session.connect(10, &mut sim).unwrap();

    let actions = session
        .handle_message(0, ClientMessage::Ack { latency: Duration::from_millis(40) }, &mut sim)
        .unwrap();

    assert!(actions.is_empty());
    assert_eq!(session.client(0).unwrap().latency(), Some(Duration::from_millis(40)));
}

#[test]
fn reset_request_sends_full_history() {
    let mut sim = simulator();
    let mut session = Session::new();
    session.connect(10, &mut sim).unwrap();
    sim.fast_forward(6).unwrap();
    sim.dispose_before(2).unwrap();

    let actions = session.handle_message(0, ClientMessage::ResetRequest, &mut sim).unwrap();

    assert_eq!(
        sends(&actions),
        vec![(
            10,
            ServerMessage::Reset {
                current_frame: 6,
                state: sim.oldest_state().clone(),
                events: sim.retained_events(),
            }
        )]
    );
    assert_eq!(session.client(0).unwrap().status(), ClientStatus::Resetting);
}

#[test]
fn prehistoric_message_triggers_reset_instead_of_dispatch() {
    let mut sim = simulator();
    let mut session = Session::new();
    session.connect(10, &mut sim).unwrap();
    session.connect(11, &mut sim).unwrap();
    sim.fast_forward(6).unwrap();
    sim.dispose_before(4).unwrap();
    let before: Vec<_> = sim.timeframes().cloned().collect();

    let actions = session
        .handle_message(0, ClientMessage::Event { frame: 2, event: movement(0, 1) }, &mut sim)
        .unwrap();

    let sent = sends(&actions);
    assert_eq!(sent.len(), 1, "only the sender hears about it");
    assert!(matches!(sent[0], (10, ServerMessage::Reset { current_frame: 6, .. })));
    assert_eq!(sim.timeframes().cloned().collect::<Vec<_>>(), before);
    assert_eq!(sim.future_events().count(), 0);
}

#[test]
fn reset_is_debounced_until_the_client_probes_again() {
    let mut sim = simulator();
    let mut session = Session::new();
    session.connect(10, &mut sim).unwrap();
    sim.fast_forward(6).unwrap();
    sim.dispose_before(4).unwrap();

    let first = session.handle_message(0, ClientMessage::Syn { frame: 1 }, &mut sim).unwrap();
    assert_eq!(sends(&first).len(), 1);

    // Stale traffic still in flight while the reset travels.
    let second = session.handle_message(0, ClientMessage::Syn { frame: 2 }, &mut sim).unwrap();
    assert!(second.is_empty());
    let third = session
        .handle_message(0, ClientMessage::Event { frame: 3, event: movement(0, 1) }, &mut sim)
        .unwrap();
    assert!(third.is_empty());
    assert_eq!(session.client(0).unwrap().status(), ClientStatus::Resetting);

    let resumed = session.handle_message(0, ClientMessage::Syn { frame: 6 }, &mut sim).unwrap();
    assert!(matches!(sends(&resumed)[..], [(10, ServerMessage::Ack { probe_frame: 6, .. })]));
    assert_eq!(session.client(0).unwrap().status(), ClientStatus::Active);
}

#[test]
fn resetting_client_is_only_heard_from_its_resume_frame() {
    let mut sim = simulator();
    let mut session = Session::new();
    session.connect(10, &mut sim).unwrap();
    session.connect(11, &mut sim).unwrap();
    sim.fast_forward(6).unwrap();

    session.handle_message(0, ClientMessage::ResetRequest, &mut sim).unwrap();
    let head = sim.head().clone();

    // Sent before the snapshot arrived, all inside the retained window.
    for message in [
        ClientMessage::Event { frame: 5, event: movement(0, 3) },
        ClientMessage::Syn { frame: 5 },
    ] {
        let actions = session.handle_message(0, message, &mut sim).unwrap();
        assert!(actions.is_empty());
    }
    assert_eq!(sim.head(), &head);
    assert_eq!(session.client(0).unwrap().last_frame(), 6);

    let latency = Duration::from_millis(12);
    let actions = session.handle_message(0, ClientMessage::Ack { latency }, &mut sim).unwrap();
    assert!(actions.is_empty());
    assert_eq!(session.client(0).unwrap().latency(), Some(latency));

    sim.advance_one_tick().unwrap();
    let again = session.handle_message(0, ClientMessage::ResetRequest, &mut sim).unwrap();
    assert!(matches!(sends(&again)[..], [(10, ServerMessage::Reset { current_frame: 7, .. })]));

    session.handle_message(0, ClientMessage::Syn { frame: 7 }, &mut sim).unwrap();
    assert_eq!(session.client(0).unwrap().status(), ClientStatus::Active);

    let actions = session
        .handle_message(0, ClientMessage::Event { frame: 7, event: movement(0, 3) }, &mut sim)
        .unwrap();
    assert_eq!(
        sends(&actions),
        vec![(11, ServerMessage::Event { client_id: 0, frame: 7, event: movement(0, 3) })]
    );
}

#[test]
fn prehistoric_resume_probe_gets_a_fresh_reset() {
    let mut sim = Simulator::new(Arena, Retention::Frames(NonZeroUsize::new(3).unwrap()));
    let mut session = Session::new();
    session.connect(10, &mut sim).unwrap();
    sim.fast_forward(4).unwrap();

    session.handle_message(0, ClientMessage::ResetRequest, &mut sim).unwrap();
    sim.fast_forward(8).unwrap();
    assert!(sim.is_prehistoric(4));

    let actions = session.handle_message(0, ClientMessage::Syn { frame: 4 }, &mut sim).unwrap();

    assert!(matches!(sends(&actions)[..], [(10, ServerMessage::Reset { current_frame: 8, .. })]));
    let client = session.client(0).unwrap();
    assert_eq!(client.status(), ClientStatus::Resetting);
    assert_eq!(client.last_frame(), 8);
}

#[test]
fn messages_from_unknown_clients_fail() {
    let mut sim = simulator();
    let mut session = Session::new();

    let err = session.handle_message(3, ClientMessage::Syn { frame: 0 }, &mut sim).unwrap_err();
    assert_eq!(err, SessionError::UnknownClient(3));
}

proptest! {
    #[test]
    fn prop_pruning_never_passes_the_slowest_client(
        probes in prop::collection::vec((0usize..3, 0u64..60), 1..40),
    ) {
        let mut sim = simulator();
        let mut session = Session::new();
        for conn in 0..3 {
            session.connect(conn, &mut sim).unwrap();
        }
        sim.fast_forward(50).unwrap();

        for (client, frame) in probes {
            let client_id = client as u64;
            let before = session.client(client_id).unwrap();
            let resetting = before.status() == ClientStatus::Resetting;
            let resume_frame = before.last_frame();
            let actions = session
                .handle_message(client_id, ClientMessage::Syn { frame }, &mut sim)
                .unwrap();

            if resetting && frame != resume_frame {
                prop_assert!(actions.is_empty());
                continue;
            }
            if frame < sim.oldest_frame() {
                let is_reset = matches!(sends(&actions)[..], [(_, ServerMessage::Reset { .. })]);
                prop_assert!(is_reset);
                continue;
            }

            let slowest = session.clients().map(|c| c.last_frame()).min().unwrap();
            let bound = slowest.min(sim.current_frame());
            prop_assert_eq!(sim.oldest_frame(), bound);
            prop_assert!(session.clients().all(|c| c.last_frame() >= sim.oldest_frame()));
            let is_ack = matches!(
                sends(&actions)[..],
                [(_, ServerMessage::Ack { stable_frame, .. })] if stable_frame == bound
            );
            prop_assert!(is_ack);
        }
    }
}
