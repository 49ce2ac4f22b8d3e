//! Naive replay oracle.

use lockstep_core::{FrameState, Game};
use lockstep_proto::{Frame, FrameEvent};

/// Recompute every state from `start` up to `target` by brute force.
///
/// Each frame gathers its events from `events`, sorts them with the game's
/// order (stable, so ties keep their listed order) and applies them. No
/// history, no rollback: this is the answer the history store must agree
/// with. Returns states oldest first, `start` included.
pub fn replay<G: Game>(
    game: &G,
    start: G::State,
    events: &[FrameEvent<G::Event>],
    target: Frame,
) -> Vec<G::State> {
    let mut states = vec![start];

    while let Some(last) = states.last()
        && last.frame() < target
    {
        let frame = last.frame();
        let mut batch: Vec<G::Event> =
            events.iter().filter(|e| e.frame == frame).map(|e| e.event.clone()).collect();
        batch.sort_by(|a, b| game.compare_events(a, b));

        let next = game.update(last, &batch);
        states.push(next);
    }

    states
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Ledger, LedgerEvent};

    #[test]
    fn replays_events_at_their_frames() {
        let game = Ledger;
        let events = vec![
            FrameEvent::new(2, LedgerEvent::Deposit { client_id: 1, amount: 4 }),
            FrameEvent::new(0, LedgerEvent::Join { client_id: 1 }),
        ];

        let states = replay(&game, game.init(), &events, 3);

        assert_eq!(states.len(), 4);
        assert_eq!(states[1].balances.get(&1), Some(&0));
        assert_eq!(states[2].balances.get(&1), Some(&0));
        assert_eq!(states[3].balances.get(&1), Some(&4));
    }

    #[test]
    fn target_at_start_returns_start_only() {
        let game = Ledger;
        let states = replay(&game, game.init(), &[], 0);
        assert_eq!(states, vec![game.init()]);
    }
}
