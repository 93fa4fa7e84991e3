//! Registry actor commands, errors, and statistics.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur when talking to the actor
//! - `RegistryStats`: Point-in-time size of the registry

use talk_core::UserId;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::server::{ConnectionHandle, ConnectionId};

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each query uses a oneshot channel for the response, so callers can await
/// the actor having applied the command before acting on it.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Append a connection to an identity's list.
    ///
    /// Duplicates are kept: the same connection may register twice and one
    /// identity may have many connections.
    Register {
        identity: UserId,
        handle: ConnectionHandle,
        respond_to: oneshot::Sender<()>,
    },

    /// Snapshot of the connections registered for an identity, in
    /// registration order. Empty when there are none.
    Lookup {
        identity: UserId,
        respond_to: oneshot::Sender<Vec<ConnectionHandle>>,
    },

    /// Detach every entry of a connection under an identity.
    ///
    /// Responds with the number of entries removed; zero is not an error.
    Remove {
        identity: UserId,
        connection: ConnectionId,
        respond_to: oneshot::Sender<usize>,
    },

    /// Current registry size.
    Stats {
        respond_to: oneshot::Sender<RegistryStats>,
    },

    /// Drop handles whose writer has already stopped.
    ///
    /// Fire-and-forget, sent periodically by the prune task.
    PruneClosed,
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
///
/// The registry operations themselves are total; the only failure is losing
/// contact with the actor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The command or response channel was closed.
    ///
    /// This typically indicates the actor was shut down.
    #[error("registry channel closed")]
    ChannelClosed,
}

// ============================================================================
// Registry Stats
// ============================================================================

/// Point-in-time size of the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Identities with at least one registered connection.
    pub identities: usize,

    /// Registered entries across all identities.
    pub connections: usize,
}
