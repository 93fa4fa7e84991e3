//! Connection loop for individual client connections.
//!
//! Each accepted connection gets its own `ConnectionHandler` that:
//! - Reads NUL-delimited frames from the read half
//! - Hands every decoded element to the [`Dispatcher`]
//! - Remembers which identities the connection registered under
//! - Detaches those registrations when the loop ends
//!
//! The write half belongs to the outbound writer task (see
//! [`super::outbound`]); the handler only ever enqueues frames.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in a graceful disconnect

use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use talk_core::{Element, UserId};
use talk_protocol::{ElementCodec, FrameError};

use super::dispatch::{DispatchError, DispatchOutcome, Dispatcher};
use super::outbound::ConnectionHandle;
use crate::config::RelayConfig;
use crate::registry::RegistryHandle;

/// Reader side of one client connection.
pub struct ConnectionHandler<R> {
    /// Decoded element stream from the read half
    frames: FramedRead<R, ElementCodec>,

    /// This connection's outbound endpoint
    handle: ConnectionHandle,

    dispatcher: Dispatcher,

    registry: RegistryHandle,

    /// Identities this connection registered under, without duplicates
    registered: Vec<UserId>,

    idle_timeout: Option<Duration>,

    /// Server-wide shutdown signal
    cancel: CancellationToken,
}

impl<R> ConnectionHandler<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(
        reader: R,
        handle: ConnectionHandle,
        registry: RegistryHandle,
        config: &RelayConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            frames: FramedRead::new(reader, ElementCodec::with_max_frame_size(config.max_frame_size)),
            handle,
            dispatcher: Dispatcher::new(registry.clone()),
            registry,
            registered: Vec::new(),
            idle_timeout: config.idle_timeout,
            cancel,
        }
    }

    /// Runs the connection loop until the peer goes away, a frame fails, or
    /// the server shuts down.
    ///
    /// Registrations are removed before returning. Dropping the handler
    /// afterwards releases its outbound handle so the writer task can finish.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(
            connection = %self.handle.id(),
            peer = ?self.handle.peer(),
            "Connection opened"
        );

        let result = self.process_frames().await;

        match &result {
            Ok(()) => info!(connection = %self.handle.id(), "Client disconnected"),
            Err(ConnectionError::Frame(e)) if e.is_protocol_violation() => warn!(
                connection = %self.handle.id(),
                peer = ?self.handle.peer(),
                error = %e,
                "Protocol violation, closing connection"
            ),
            Err(e) => warn!(
                connection = %self.handle.id(),
                peer = ?self.handle.peer(),
                error = %e,
                "Connection closed with error"
            ),
        }

        self.detach().await;
        result
    }

    /// Identities registered so far.
    pub fn registered(&self) -> &[UserId] {
        &self.registered
    }

    async fn process_frames(&mut self) -> Result<(), ConnectionError> {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(connection = %self.handle.id(), "Server shutting down");
                    return Ok(());
                }
                next = next_frame(&mut self.frames, self.idle_timeout) => next?,
            };

            let Some(element) = next else {
                debug!(connection = %self.handle.id(), "Client sent EOF");
                return Ok(());
            };

            self.handle_element(element).await?;
        }
    }

    async fn handle_element(&mut self, element: Element) -> Result<(), ConnectionError> {
        debug!(
            connection = %self.handle.id(),
            kind = %element.kind(),
            id = %element.id(),
            sender = %element.sender(),
            receiver = %element.receiver(),
            "Received element"
        );

        if let DispatchOutcome::Registered { identity } =
            self.dispatcher.dispatch(element, &self.handle).await?
        {
            if !self.registered.contains(&identity) {
                self.registered.push(identity);
            }
        }

        Ok(())
    }

    /// Removes this connection from every identity it registered under.
    async fn detach(&mut self) {
        for identity in self.registered.drain(..) {
            match self.registry.remove(identity.clone(), &self.handle).await {
                Ok(removed) => debug!(
                    connection = %self.handle.id(),
                    identity = %identity,
                    removed,
                    "Detached from identity"
                ),
                Err(e) => debug!(
                    connection = %self.handle.id(),
                    identity = %identity,
                    error = %e,
                    "Could not detach from identity"
                ),
            }
        }
    }
}

async fn next_frame<R>(
    frames: &mut FramedRead<R, ElementCodec>,
    idle_timeout: Option<Duration>,
) -> Result<Option<Element>, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let next = match idle_timeout {
        Some(limit) => timeout(limit, frames.next())
            .await
            .map_err(|_| ConnectionError::Timeout)?,
        None => frames.next().await,
    };

    Ok(next.transpose()?)
}

/// Errors that end a single connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("Read timeout")]
    Timeout,

    /// The connection's own outbound writer has stopped.
    #[error("Outbound queue closed")]
    OutboundClosed,

    #[error("Dispatch failed: {0}")]
    Dispatch(#[source] DispatchError),
}

impl From<DispatchError> for ConnectionError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::OriginClosed => Self::OutboundClosed,
            other => Self::Dispatch(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::spawn_registry;
    use crate::server::ConnectionId;
    use bytes::Bytes;
    use talk_core::{Heartbeat, Identity};
    use talk_protocol::{codec, DecodeError};
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::sync::mpsc;

    struct Harness {
        client: DuplexStream,
        outbound: mpsc::Receiver<Bytes>,
        handler: ConnectionHandler<DuplexStream>,
    }

    fn harness(config: RelayConfig, registry: RegistryHandle, cancel: CancellationToken) -> Harness {
        let (client, server) = tokio::io::duplex(4096);
        let (handle, outbound) = ConnectionHandle::channel(ConnectionId::new(1), None, 8);
        Harness {
            client,
            outbound,
            handler: ConnectionHandler::new(server, handle, registry, &config, cancel),
        }
    }

    async fn write_element(client: &mut DuplexStream, element: Element) {
        client
            .write_all(&codec::encode(&element).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_registration_is_detached_on_eof() {
        let registry = spawn_registry();
        let Harness {
            mut client,
            mut outbound,
            handler,
        } = harness(RelayConfig::default(), registry.clone(), CancellationToken::new());
        let task = tokio::spawn(handler.run());

        write_element(&mut client, Identity::new("alice", "server", "s", "pw").into()).await;
        write_element(&mut client, Identity::new("alice", "server", "s", "pw").into()).await;
        write_element(&mut client, Heartbeat::new("alice", "server").into()).await;

        // The echo proves both identities were processed.
        let echo = outbound.recv().await.unwrap();
        assert!(matches!(codec::decode(&echo).unwrap(), Element::Heartbeat(_)));
        assert_eq!(registry.stats().await.connections, 2);

        drop(client);
        assert!(task.await.unwrap().is_ok());

        assert!(registry.lookup(UserId::new("alice")).await.is_empty());
        assert_eq!(registry.stats().await.identities, 0);
    }

    #[tokio::test]
    async fn test_truncated_frame_is_incomplete() {
        let Harness {
            mut client,
            outbound: _outbound,
            handler,
        } = harness(RelayConfig::default(), spawn_registry(), CancellationToken::new());

        client.write_all(b"{\"type\":\"Heart").await.unwrap();
        drop(client);

        let result = handler.run().await;
        assert!(matches!(
            result,
            Err(ConnectionError::Frame(FrameError::IncompleteFrame { buffered: 14 }))
        ));
    }

    #[tokio::test]
    async fn test_unknown_kind_ends_connection() {
        let Harness {
            mut client,
            outbound: _outbound,
            handler,
        } = harness(RelayConfig::default(), spawn_registry(), CancellationToken::new());

        client
            .write_all(b"{\"type\":\"Bogus\",\"sender\":\"a\",\"receiver\":\"b\"}\0")
            .await
            .unwrap();

        let result = handler.run().await;
        assert!(matches!(
            result,
            Err(ConnectionError::Frame(FrameError::Decode(DecodeError::UnknownKind(kind)))) if kind == "Bogus"
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_ends_connection() {
        let config = RelayConfig::default().with_max_frame_size(32);
        let Harness {
            mut client,
            outbound: _outbound,
            handler,
        } = harness(config, spawn_registry(), CancellationToken::new());

        client.write_all(&[b'x'; 64]).await.unwrap();

        let result = handler.run().await;
        assert!(matches!(
            result,
            Err(ConnectionError::Frame(FrameError::FrameTooLarge { max: 32, .. }))
        ));
    }

    #[tokio::test]
    async fn test_cancellation_stops_loop() {
        let cancel = CancellationToken::new();
        let Harness {
            client: _client,
            outbound: _outbound,
            handler,
        } = harness(RelayConfig::default(), spawn_registry(), cancel.clone());
        let task = tokio::spawn(handler.run());

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout() {
        let config = RelayConfig::default().with_idle_timeout(Some(Duration::from_secs(5)));
        let Harness {
            client: _client,
            outbound: _outbound,
            handler,
        } = harness(config, spawn_registry(), CancellationToken::new());

        let result = handler.run().await;
        assert!(matches!(result, Err(ConnectionError::Timeout)));
    }

    #[tokio::test]
    async fn test_closed_outbound_ends_connection() {
        let Harness {
            mut client,
            outbound,
            handler,
        } = harness(RelayConfig::default(), spawn_registry(), CancellationToken::new());
        drop(outbound);

        write_element(&mut client, Heartbeat::new("alice", "server").into()).await;

        let result = handler.run().await;
        assert!(matches!(result, Err(ConnectionError::OutboundClosed)));
    }

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::Frame(FrameError::FrameTooLarge {
            size: 2_000_000,
            max: 1_000,
        });
        assert!(err.to_string().contains("2000000"));
        assert_eq!(ConnectionError::Timeout.to_string(), "Read timeout");
    }
}
