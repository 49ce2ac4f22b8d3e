//! Reference game used by the harness.
//!
//! Balances alone would hide ordering bugs (deposits commute), so every
//! state also carries a digest folded over each applied event in order.
//! Two replicas agree on a digest only if they applied the same events in
//! the same order at the same frames.

use std::{cmp::Ordering, collections::BTreeMap};

use lockstep_core::{FrameState, Game, ParticipantEvent};
use lockstep_proto::{ClientId, Frame};
use serde::{Deserialize, Serialize};

const DIGEST_SEED: u64 = 0xcbf2_9ce4_8422_2325;
const DIGEST_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Ledger state at one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    /// Frame this state belongs to.
    pub frame: Frame,
    /// Balance per present participant.
    pub balances: BTreeMap<ClientId, i64>,
    /// Order-sensitive fold over every applied event.
    pub digest: u64,
}

impl FrameState for LedgerState {
    fn frame(&self) -> Frame {
        self.frame
    }
}

/// Ledger inputs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LedgerEvent {
    /// A participant joined.
    Join {
        /// The participant.
        #[serde(rename = "clientid")]
        client_id: ClientId,
    },

    /// A participant moved funds.
    Deposit {
        /// The participant.
        #[serde(rename = "clientid")]
        client_id: ClientId,
        /// Signed amount.
        amount: i64,
    },

    /// A participant left.
    Leave {
        /// The participant.
        #[serde(rename = "clientid")]
        client_id: ClientId,
    },
}

impl LedgerEvent {
    fn fingerprint(&self) -> u64 {
        match *self {
            Self::Join { client_id } => client_id.rotate_left(1) ^ 0x11,
            Self::Deposit { client_id, amount } => {
                client_id.rotate_left(17) ^ amount.cast_unsigned() ^ 0x22
            },
            Self::Leave { client_id } => client_id.rotate_left(33) ^ 0x33,
        }
    }
}

impl ParticipantEvent for LedgerEvent {
    fn connected(client_id: ClientId) -> Self {
        Self::Join { client_id }
    }

    fn disconnected(client_id: ClientId) -> Self {
        Self::Leave { client_id }
    }
}

/// Ledger rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ledger;

impl Game for Ledger {
    type State = LedgerState;
    type Event = LedgerEvent;

    fn init(&self) -> LedgerState {
        LedgerState { frame: 0, balances: BTreeMap::new(), digest: DIGEST_SEED }
    }

    fn update(&self, state: &LedgerState, events: &[LedgerEvent]) -> LedgerState {
        let mut balances = state.balances.clone();
        let mut digest = (state.digest ^ state.frame).wrapping_mul(DIGEST_PRIME);

        for event in events {
            digest = (digest ^ event.fingerprint()).wrapping_mul(DIGEST_PRIME);
            match event {
                LedgerEvent::Join { client_id } => {
                    balances.insert(*client_id, 0);
                },
                LedgerEvent::Deposit { client_id, amount } => {
                    if let Some(balance) = balances.get_mut(client_id) {
                        *balance = balance.saturating_add(*amount);
                    }
                },
                LedgerEvent::Leave { client_id } => {
                    balances.remove(client_id);
                },
            }
        }

        LedgerState { frame: state.frame + 1, balances, digest }
    }

    fn compare_events(&self, a: &LedgerEvent, b: &LedgerEvent) -> Ordering {
        a.cmp(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit(client_id: ClientId, amount: i64) -> LedgerEvent {
        LedgerEvent::Deposit { client_id, amount }
    }

    #[test]
    fn digest_depends_on_order() {
        let game = Ledger;
        let s0 = game.update(&game.init(), &[LedgerEvent::Join { client_id: 1 }]);

        let ab = game.update(&s0, &[deposit(1, 2), deposit(1, 5)]);
        let ba = game.update(&s0, &[deposit(1, 5), deposit(1, 2)]);

        assert_eq!(ab.balances, ba.balances);
        assert_ne!(ab.digest, ba.digest);
    }

    #[test]
    fn digest_depends_on_frame() {
        let game = Ledger;
        let s0 = game.init();
        let s1 = game.update(&s0, &[]);

        let early = game.update(&s1, &[deposit(1, 1)]);
        let late = game.update(&game.update(&s1, &[]), &[deposit(1, 1)]);

        assert_ne!(early.digest, late.digest);
    }

    #[test]
    fn deposits_of_absent_participants_only_touch_the_digest() {
        let game = Ledger;
        let s0 = game.init();

        let next = game.update(&s0, &[deposit(7, 100)]);

        assert!(next.balances.is_empty());
        assert_ne!(next.digest, game.update(&s0, &[]).digest);
    }

    #[test]
    fn joins_sort_first() {
        let game = Ledger;
        assert_eq!(
            game.compare_events(&LedgerEvent::Join { client_id: 9 }, &deposit(0, 0)),
            Ordering::Less
        );
    }
}
