//! Client events and actions.

use lockstep_proto::{ClientId, ClientMessage, Frame, ServerMessage};

/// Inputs to the client state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent<S, E> {
    /// A message arrived from the server.
    Received(ServerMessage<S, E>),

    /// The local participant produced an input for the current frame.
    Input(E),

    /// The local frame timer fired.
    Tick,

    /// Ask the server for a full snapshot. Inputs made until it arrives are
    /// held and replayed on top of it.
    Resync,
}

/// Outputs of the client state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction<E> {
    /// Send a message to the server.
    Send(ClientMessage<E>),

    /// Local history was rebuilt from a server snapshot.
    Synchronized {
        /// Our participant id.
        client_id: Option<ClientId>,
        /// Frame the replica resumed at.
        frame: Frame,
    },
}
