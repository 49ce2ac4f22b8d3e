//! Protocol messages.
//!
//! Both directions are serde enums internally tagged by a `type` field so the
//! encoded form reads `{ "type": "syn", "frame": 12 }`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ClientId, Frame};

/// An event scheduled for a specific frame.
///
/// Used for the future-event queue and for the event lists carried by
/// `initialize` and `reset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameEvent<E> {
    /// Frame the event belongs to.
    pub frame: Frame,
    /// Application payload.
    pub event: E,
}

impl<E> FrameEvent<E> {
    /// Pair an event with its frame.
    pub fn new(frame: Frame, event: E) -> Self {
        Self { frame, event }
    }
}

/// Messages sent from a participant to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage<E> {
    /// Liveness probe carrying the participant's current frame.
    Syn {
        /// Most recent frame the participant has simulated.
        frame: Frame,
    },

    /// Round-trip measurement reported back after an `ack`.
    Ack {
        /// Measured round-trip latency.
        latency: Duration,
    },

    /// Explicit request for a full resynchronization.
    ResetRequest,

    /// Simulation input for a frame.
    Event {
        /// Frame the input applies to.
        frame: Frame,
        /// Application payload.
        event: E,
    },
}

impl<E> ClientMessage<E> {
    /// Frame carried by the message, if any.
    pub fn frame(&self) -> Option<Frame> {
        match self {
            Self::Syn { frame } | Self::Event { frame, .. } => Some(*frame),
            Self::Ack { .. } | Self::ResetRequest => None,
        }
    }

    /// Discriminant of the message, for logging.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Syn { .. } => MessageKind::Syn,
            Self::Ack { .. } => MessageKind::Ack,
            Self::ResetRequest => MessageKind::ResetRequest,
            Self::Event { .. } => MessageKind::Event,
        }
    }
}

/// Kind of an inbound [`ClientMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// `syn`
    Syn,
    /// `ack`
    Ack,
    /// `resetrequest`
    ResetRequest,
    /// `event`
    Event,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Syn => "syn",
            Self::Ack => "ack",
            Self::ResetRequest => "resetrequest",
            Self::Event => "event",
        };
        f.write_str(name)
    }
}

/// Messages sent from the server to participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage<S, E> {
    /// A participant joined. Broadcast to everybody else.
    Connect {
        /// Id of the new participant.
        #[serde(rename = "clientid")]
        client_id: ClientId,
        /// Frame the join was recorded at.
        frame: Frame,
    },

    /// Catch-up snapshot for a fresh connection.
    ///
    /// Replaying `events` on top of `state` up to `current_frame` yields the
    /// server's present state.
    Initialize {
        /// Id assigned to the receiving participant.
        #[serde(rename = "clientid")]
        client_id: ClientId,
        /// Oldest state the server retains.
        state: S,
        /// Every retained event, oldest frame first.
        events: Vec<FrameEvent<E>>,
        /// Server's current frame.
        #[serde(rename = "currentframe")]
        current_frame: Frame,
    },

    /// Reply to `syn`.
    Ack {
        /// Frame echoed from the probe.
        #[serde(rename = "oframe")]
        probe_frame: Frame,
        /// Server's current frame.
        #[serde(rename = "nframe")]
        current_frame: Frame,
        /// Oldest frame any participant may still need, never newer than
        /// `current_frame`.
        #[serde(rename = "stableframe")]
        stable_frame: Frame,
    },

    /// Full resynchronization payload.
    Reset {
        /// Server's current frame.
        #[serde(rename = "currentframe")]
        current_frame: Frame,
        /// Oldest state the server retains.
        state: S,
        /// Every retained event, oldest frame first.
        events: Vec<FrameEvent<E>>,
    },

    /// A participant left. Broadcast to the remaining participants.
    Disconnect {
        /// Id of the participant that left.
        #[serde(rename = "clientid")]
        client_id: ClientId,
        /// Frame the departure was recorded at.
        frame: Frame,
    },

    /// Input from another participant.
    Event {
        /// Participant that produced the input.
        #[serde(rename = "clientid")]
        client_id: ClientId,
        /// Frame the input applies to.
        frame: Frame,
        /// Application payload.
        event: E,
    },
}
