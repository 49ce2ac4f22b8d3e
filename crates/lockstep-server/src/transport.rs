//! TCP transport.
//!
//! One listener, and per accepted connection a reader task and a writer task:
//!
//! ```text
//! socket ──read──▶ reader task ──ServerEvent──▶ server task
//! socket ◀─write── writer task ◀──Bytes─────── registry
//! ```
//!
//! Frames are length-delimited CBOR (see [`lockstep_proto::codec`]). A frame
//! that fails to decode closes the connection.

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use lockstep_proto::{ClientMessage, ConnectionId, codec};
use serde::de::DeserializeOwned;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
};

use crate::{driver::ServerEvent, error::ServerError};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// TCP listener for session connections.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Bind to `address`.
    pub async fn bind(address: &str) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| ServerError::Transport(format!("failed to bind {address}: {e}")))?;
        Ok(Self { listener })
    }

    /// Wait for the next connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ServerError> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, peer))
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }
}

/// Spawn the reader and writer tasks for an accepted connection.
///
/// The reader forwards decoded messages to `events` and finishes with
/// [`ServerEvent::ConnectionClosed`]. The writer drains `outbound` until every
/// sender is dropped or the socket fails.
pub fn spawn_connection<E>(
    conn_id: ConnectionId,
    stream: TcpStream,
    events: mpsc::Sender<ServerEvent<E>>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
) where
    E: DeserializeOwned + Send + 'static,
{
    let (read_half, write_half) = stream.into_split();

    tokio::spawn(async move {
        if let Err(e) = read_loop(conn_id, read_half, &events).await {
            tracing::debug!(conn_id, error = %e, "read loop ended");
        }
        // The server task may already be gone during shutdown.
        let _ = events.send(ServerEvent::ConnectionClosed { conn_id }).await;
    });

    tokio::spawn(async move {
        if let Err(e) = write_loop(write_half, outbound).await {
            tracing::debug!(conn_id, error = %e, "write loop ended");
        }
    });
}

async fn read_loop<E>(
    conn_id: ConnectionId,
    mut reader: OwnedReadHalf,
    events: &mpsc::Sender<ServerEvent<E>>,
) -> Result<(), ServerError>
where
    E: DeserializeOwned,
{
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    loop {
        while let Some(message) = codec::decode::<ClientMessage<E>>(&mut buf).map_err(|e| {
            tracing::warn!(conn_id, error = %e, "dropping connection on bad frame");
            ServerError::from(e)
        })? {
            if events.send(ServerEvent::MessageReceived { conn_id, message }).await.is_err() {
                return Ok(());
            }
        }

        if reader.read_buf(&mut buf).await? == 0 {
            if !buf.is_empty() {
                tracing::debug!(conn_id, pending = buf.len(), "connection closed mid-frame");
            }
            return Ok(());
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
) -> Result<(), ServerError> {
    while let Some(frame) = outbound.recv().await {
        writer.write_all(&frame).await?;
    }
    writer.shutdown().await?;
    Ok(())
}
