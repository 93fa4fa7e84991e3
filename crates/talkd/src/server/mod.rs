//! TCP server for the talk relay.
//!
//! The server:
//! - Listens on a TCP socket for client connections
//! - Spawns a ConnectionHandler and an outbound writer for each client
//! - Routes every decoded element through the Dispatcher
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   RelayServer   │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│  RegistryHandle │
//! │   (per client)  │     │                 │
//! └───────┬─────────┘     └─────────────────┘
//!         │ fan-out (try_send)
//!         ▼
//! ┌─────────────────┐
//! │ outbound queue  │──▶ writer task ──▶ socket
//! │  (per client)   │
//! └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Accept errors are logged and allow continued operation

mod connection;
mod dispatch;
mod outbound;

pub use connection::{ConnectionError, ConnectionHandler};
pub use dispatch::{fan_out, DispatchError, DispatchOutcome, Dispatcher, FanOutReport};
pub use outbound::{spawn_writer, ConnectionHandle, ConnectionId, ForwardWriteFailure};

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{ConfigError, RelayConfig};
use crate::registry::RegistryHandle;

/// TCP server for the relay.
///
/// Owns the listener; every accepted connection runs on its own tasks.
pub struct RelayServer {
    listener: TcpListener,

    config: RelayConfig,

    /// Handle to the session registry
    registry: RegistryHandle,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for generating connection ids
    connection_counter: AtomicU64,
}

impl RelayServer {
    /// Validates `config` and binds the listening socket.
    ///
    /// Port 0 binds an ephemeral port; see [`RelayServer::local_addr`].
    pub async fn bind(
        config: RelayConfig,
        registry: RegistryHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.clone(),
                error: e.to_string(),
            })?;

        Ok(Self {
            listener,
            config,
            registry,
            cancel_token,
            connection_counter: AtomicU64::new(0),
        })
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::LocalAddr)
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Runs the server.
    ///
    /// Accepts connections until the cancellation token is triggered.
    /// Connection tasks observe the same token and wind down on their own.
    pub async fn run(&self) -> Result<(), ServerError> {
        info!(
            addr = ?self.listener.local_addr().ok(),
            outbound_buffer = self.config.outbound_buffer,
            max_frame_size = self.config.max_frame_size,
            "Relay server listening"
        );

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            self.accept(stream, peer);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Continue accepting other connections
                        }
                    }
                }
            }
        }

        info!("Server stopped accepting connections");
        Ok(())
    }

    /// Starts serving an already accepted stream.
    ///
    /// Returns the handle of the connection loop task; the writer task ends
    /// by itself once the loop has finished and detached.
    pub fn accept(&self, stream: TcpStream, peer: SocketAddr) -> JoinHandle<()> {
        let id = ConnectionId::new(self.connection_counter.fetch_add(1, Ordering::Relaxed));

        if let Err(e) = stream.set_nodelay(true) {
            debug!(connection = %id, error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let (handle, frames) = ConnectionHandle::channel(id, Some(peer), self.config.outbound_buffer);
        spawn_writer(id, writer, frames, self.config.write_timeout);

        info!(connection = %id, peer = %peer, "Client connected");

        let handler = ConnectionHandler::new(
            reader,
            handle,
            self.registry.clone(),
            &self.config,
            self.cancel_token.child_token(),
        );

        tokio::spawn(async move {
            // The handler logs its own termination.
            let _ = handler.run().await;
        })
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to read local address: {0}")]
    LocalAddr(#[source] io::Error),
}
