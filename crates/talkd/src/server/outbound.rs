//! Per-connection outbound path.
//!
//! Every connection owns a bounded queue of encoded frames and a writer task
//! that drains it into the socket. A [`ConnectionHandle`] is the sending side
//! of that queue; it is what the registry stores and what other connections
//! use during fan-out. Nobody but the writer task touches the socket's write
//! half, so frames from different tasks never interleave mid-frame.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Queue and socket failures are reported as values and logged

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::FramedWrite;
use tracing::{debug, warn};

use talk_core::SessionToken;
use talk_protocol::ElementCodec;

/// Server-assigned identifier of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A best-effort write to a connection's outbound queue failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ForwardWriteFailure {
    /// The peer is not draining its queue fast enough.
    #[error("outbound queue is full")]
    QueueFull,

    /// The connection's writer has stopped.
    #[error("connection is closed")]
    Closed,
}

/// Writable endpoint of one connection.
///
/// Cheap to clone. Two handles are equal when they refer to the same
/// connection, regardless of the session token they carry.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    session: Option<SessionToken>,
    outbound: mpsc::Sender<Bytes>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, peer: Option<SocketAddr>, outbound: mpsc::Sender<Bytes>) -> Self {
        Self {
            id,
            peer,
            session: None,
            outbound,
        }
    }

    /// Creates a handle together with the receiving end of its queue.
    ///
    /// `capacity` must be non-zero.
    pub fn channel(
        id: ConnectionId,
        peer: Option<SocketAddr>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(id, peer, tx), rx)
    }

    /// A copy of this handle tagged with the session it registered under.
    #[must_use]
    pub fn with_session(&self, session: SessionToken) -> Self {
        Self {
            session: Some(session),
            ..self.clone()
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn session(&self) -> Option<&SessionToken> {
        self.session.as_ref()
    }

    /// Returns true once the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Enqueues a frame without waiting. Used for fan-out to other connections.
    pub fn try_forward(&self, frame: Bytes) -> Result<(), ForwardWriteFailure> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ForwardWriteFailure::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ForwardWriteFailure::Closed,
        })
    }

    /// Enqueues a frame, waiting for queue space. Used for replies to the
    /// connection's own peer.
    pub async fn send(&self, frame: Bytes) -> Result<(), ForwardWriteFailure> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| ForwardWriteFailure::Closed)
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

/// Spawns the task that drains `frames` into `writer`.
///
/// The task ends when every [`ConnectionHandle`] for the queue has been
/// dropped (after flushing what is still queued), or on the first failed or
/// timed-out write. Dropping the receiver on failure makes later
/// `try_forward` calls report [`ForwardWriteFailure::Closed`].
pub fn spawn_writer<W>(
    connection: ConnectionId,
    writer: W,
    mut frames: mpsc::Receiver<Bytes>,
    write_timeout: Duration,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut sink = FramedWrite::new(writer, ElementCodec::new());

        while let Some(frame) = frames.recv().await {
            match timeout(write_timeout, sink.send(frame)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(connection = %connection, error = %e, "Outbound write failed");
                    return;
                }
                Err(_) => {
                    warn!(
                        connection = %connection,
                        timeout_ms = write_timeout.as_millis() as u64,
                        "Outbound write timed out"
                    );
                    return;
                }
            }
        }

        if let Err(e) = SinkExt::<Bytes>::close(&mut sink).await {
            debug!(connection = %connection, error = %e, "Failed to shut down write half");
        }
        debug!(connection = %connection, "Outbound writer finished");
    })
}
