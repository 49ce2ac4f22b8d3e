//! Per-connection participant state.

use std::time::Duration;

use lockstep_proto::{ClientId, ConnectionId, Frame};

/// Synchronization status of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    /// In sync; incremental updates apply.
    Active,

    /// A full reset has been sent and the participant has not yet probed
    /// from the frame it resumes at. Its other probes and events in the
    /// meantime predate the snapshot and are dropped.
    Resetting,
}

/// A connected participant.
///
/// Holds only the id of its connection; the transport owns the connection
/// itself.
#[derive(Debug, Clone)]
pub struct Client {
    id: ClientId,
    status: ClientStatus,
    /// Most recent frame acknowledged through `syn`.
    last_frame: Frame,
    latency: Option<Duration>,
    connection: ConnectionId,
}

impl Client {
    pub(crate) fn new(id: ClientId, connection: ConnectionId, last_frame: Frame) -> Self {
        Self { id, status: ClientStatus::Active, last_frame, latency: None, connection }
    }

    /// Session-assigned id.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Current synchronization status.
    pub fn status(&self) -> ClientStatus {
        self.status
    }

    /// Most recent frame the participant acknowledged.
    pub fn last_frame(&self) -> Frame {
        self.last_frame
    }

    /// Last reported round-trip latency.
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// Connection carrying this participant's traffic.
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Record a probe. While resetting, the session only lets through the
    /// probe from the resume frame, which confirms the reset was applied.
    pub(crate) fn record_probe(&mut self, frame: Frame) {
        self.last_frame = frame;
        if self.status == ClientStatus::Resetting {
            tracing::debug!(client_id = self.id, frame, "client resynchronized");
            self.status = ClientStatus::Active;
        }
    }

    pub(crate) fn record_latency(&mut self, latency: Duration) {
        self.latency = Some(latency);
    }

    /// Mark a reset as sent. The participant resumes at `frame` and probes
    /// from there first.
    pub(crate) fn begin_reset(&mut self, frame: Frame) {
        self.status = ClientStatus::Resetting;
        self.last_frame = frame;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_client_is_active() {
        let client = Client::new(3, 77, 12);
        assert_eq!(client.status(), ClientStatus::Active);
        assert_eq!(client.last_frame(), 12);
        assert_eq!(client.connection(), 77);
        assert_eq!(client.latency(), None);
    }

    #[test]
    fn probe_ends_reset() {
        let mut client = Client::new(0, 0, 0);
        client.begin_reset(4);
        assert_eq!(client.status(), ClientStatus::Resetting);
        assert_eq!(client.last_frame(), 4);

        client.record_probe(9);
        assert_eq!(client.status(), ClientStatus::Active);
        assert_eq!(client.last_frame(), 9);
    }
}
