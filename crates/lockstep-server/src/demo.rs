//! Demo game served by the `lockstep-server` binary.
//!
//! Every participant owns a position on a line. Joining places it at zero,
//! moves shift it, leaving removes it.

use std::{cmp::Ordering, collections::BTreeMap};

use lockstep_core::{FrameState, Game, ParticipantEvent};
use lockstep_proto::{ClientId, Frame};
use serde::{Deserialize, Serialize};

/// Arena state at one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaState {
    /// Frame this state belongs to.
    pub frame: Frame,
    /// Position per participant.
    pub players: BTreeMap<ClientId, i64>,
}

impl FrameState for ArenaState {
    fn frame(&self) -> Frame {
        self.frame
    }
}

/// Arena inputs.
///
/// The derived order (variant, then fields) is the in-frame application
/// order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ArenaEvent {
    /// A participant joined.
    Connect {
        /// The participant.
        #[serde(rename = "clientid")]
        client_id: ClientId,
    },

    /// A participant moved.
    Move {
        /// The participant.
        #[serde(rename = "clientid")]
        client_id: ClientId,
        /// Signed distance.
        delta: i64,
    },

    /// A participant left.
    Disconnect {
        /// The participant.
        #[serde(rename = "clientid")]
        client_id: ClientId,
    },
}

impl ParticipantEvent for ArenaEvent {
    fn connected(client_id: ClientId) -> Self {
        Self::Connect { client_id }
    }

    fn disconnected(client_id: ClientId) -> Self {
        Self::Disconnect { client_id }
    }
}

/// Arena rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct Arena;

impl Game for Arena {
    type State = ArenaState;
    type Event = ArenaEvent;

    fn init(&self) -> ArenaState {
        ArenaState::default()
    }

    fn update(&self, state: &ArenaState, events: &[ArenaEvent]) -> ArenaState {
        let mut players = state.players.clone();
        for event in events {
            match event {
                ArenaEvent::Connect { client_id } => {
                    players.insert(*client_id, 0);
                },
                ArenaEvent::Move { client_id, delta } => {
                    if let Some(position) = players.get_mut(client_id) {
                        *position = position.saturating_add(*delta);
                    }
                },
                ArenaEvent::Disconnect { client_id } => {
                    players.remove(client_id);
                },
            }
        }
        ArenaState { frame: state.frame + 1, players }
    }

    fn compare_events(&self, a: &ArenaEvent, b: &ArenaEvent) -> Ordering {
        a.cmp(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_move_leave() {
        let game = Arena;
        let s0 = game.init();

        let s1 = game.update(&s0, &[ArenaEvent::Connect { client_id: 1 }]);
        let s2 = game.update(&s1, &[ArenaEvent::Move { client_id: 1, delta: -3 }]);
        let s3 = game.update(&s2, &[ArenaEvent::Disconnect { client_id: 1 }]);

        assert_eq!(s1.players.get(&1), Some(&0));
        assert_eq!(s2.players.get(&1), Some(&-3));
        assert!(s3.players.is_empty());
        assert_eq!(s3.frame(), 3);
    }

    #[test]
    fn moves_of_absent_players_are_ignored() {
        let game = Arena;
        let next = game.update(&game.init(), &[ArenaEvent::Move { client_id: 9, delta: 5 }]);
        assert!(next.players.is_empty());
    }

    #[test]
    fn joins_sort_before_moves() {
        let game = Arena;
        let join = ArenaEvent::Connect { client_id: 4 };
        let step = ArenaEvent::Move { client_id: 4, delta: 1 };
        assert_eq!(game.compare_events(&join, &step), Ordering::Less);
    }
}
