//! Operations for model-based testing.
//!
//! Operations represent everything that can happen to a session: peers
//! come and go, produce inputs, tick, and messages cross the network. They
//! are generated randomly by proptest or libFuzzer and applied to a
//! [`SimWorld`](super::SimWorld).

use arbitrary::Arbitrary;

/// Replica slot (taken modulo [`MAX_SLOTS`]).
pub type Slot = u8;

/// Number of replica slots in a world.
pub const MAX_SLOTS: usize = 4;

/// Which way a message travels on a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum Direction {
    /// Replica to server.
    ToServer,
    /// Server to replica.
    ToClient,
}

/// Operations that can be applied to the world.
#[derive(Debug, Clone, PartialEq, Eq, Arbitrary)]
pub enum Operation {
    /// Open a connection for an empty slot.
    Connect {
        /// Target slot.
        slot: Slot,
    },

    /// Close the slot's connection, dropping anything still in flight.
    Disconnect {
        /// Target slot.
        slot: Slot,
    },

    /// The slot's participant deposits `amount` at its current frame.
    Input {
        /// Target slot.
        slot: Slot,
        /// Deposit amount.
        amount: i8,
    },

    /// Advance the shared clock by one tick interval and tick the server.
    ServerTick,

    /// Tick the slot's replica.
    ClientTick {
        /// Target slot.
        slot: Slot,
    },

    /// The slot's replica asks the server for a full snapshot.
    Resync {
        /// Target slot.
        slot: Slot,
    },

    /// Deliver the oldest message on one link.
    Deliver {
        /// Target slot.
        slot: Slot,
        /// Link direction.
        direction: Direction,
    },

    /// Deliver up to `count` messages, picking links with the seeded RNG.
    DeliverRandom {
        /// Maximum number of deliveries.
        count: u8,
    },
}

/// Result of applying an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    /// The operation changed the world.
    Applied,

    /// The operation did not apply (empty slot, empty link, replica not
    /// yet initialized).
    Ignored,
}

impl OperationResult {
    /// Check if the operation applied.
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}
