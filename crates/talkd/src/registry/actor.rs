//! Registry actor - owns the identity → connections map and processes commands.
//!
//! The RegistryActor is the single owner of routing state in the relay.
//! It receives commands via an mpsc channel and applies them one at a time,
//! so no caller ever observes a half-applied registration or removal.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Reply send failures are ignored (the caller gave up waiting)

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info};

use talk_core::UserId;

use super::commands::{RegistryCommand, RegistryStats};
use crate::server::{ConnectionHandle, ConnectionId};

/// The registry actor - owns all routing state.
///
/// # Ownership
///
/// `connections` maps each identity to its registered handles in
/// registration order. An identity key exists only while its list is
/// non-empty.
///
/// # Thread Safety
///
/// The actor runs in a single task and processes commands sequentially.
/// All state mutations happen within this single task.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Identity → registered connection handles
    connections: HashMap<UserId, Vec<ConnectionHandle>>,
}

impl RegistryActor {
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>) -> Self {
        Self {
            receiver,
            connections: HashMap::new(),
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        let stats = self.stats();
        info!(
            identities = stats.identities,
            connections = stats.connections,
            "Registry actor stopped"
        );
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                identity,
                handle,
                respond_to,
            } => {
                self.handle_register(identity, handle);
                let _ = respond_to.send(());
            }
            RegistryCommand::Lookup {
                identity,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_lookup(&identity));
            }
            RegistryCommand::Remove {
                identity,
                connection,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_remove(&identity, connection));
            }
            RegistryCommand::Stats { respond_to } => {
                let _ = respond_to.send(self.stats());
            }
            RegistryCommand::PruneClosed => {
                self.handle_prune_closed();
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_register(&mut self, identity: UserId, handle: ConnectionHandle) {
        let connection = handle.id();
        let entries = self.connections.entry(identity.clone()).or_default();
        entries.push(handle);
        let identity_connections = entries.len();

        info!(
            identity = %identity,
            connection = %connection,
            identity_connections,
            total_identities = self.connections.len(),
            "Identity registered"
        );
    }

    fn handle_lookup(&self, identity: &UserId) -> Vec<ConnectionHandle> {
        self.connections.get(identity).cloned().unwrap_or_default()
    }

    fn handle_remove(&mut self, identity: &UserId, connection: ConnectionId) -> usize {
        let Some(entries) = self.connections.get_mut(identity) else {
            return 0;
        };

        let before = entries.len();
        entries.retain(|handle| handle.id() != connection);
        let removed = before - entries.len();

        if entries.is_empty() {
            self.connections.remove(identity);
        }

        if removed > 0 {
            debug!(
                identity = %identity,
                connection = %connection,
                removed,
                "Connection detached from identity"
            );
        }

        removed
    }

    fn handle_prune_closed(&mut self) {
        let mut pruned = 0usize;

        self.connections.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|handle| !handle.is_closed());
            pruned += before - entries.len();
            !entries.is_empty()
        });

        if pruned > 0 {
            debug!(pruned, "Pruned closed connections from registry");
        }
    }

    fn stats(&self) -> RegistryStats {
        RegistryStats {
            identities: self.connections.len(),
            connections: self.connections.values().map(Vec::len).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn create_actor() -> (mpsc::Sender<RegistryCommand>, RegistryActor) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        (cmd_tx, RegistryActor::new(cmd_rx))
    }

    fn handle(n: u64) -> (ConnectionHandle, mpsc::Receiver<bytes::Bytes>) {
        ConnectionHandle::channel(ConnectionId::new(n), None, 4)
    }

    fn ids(handles: &[ConnectionHandle]) -> Vec<u64> {
        handles.iter().map(|h| h.id().as_u64()).collect()
    }

    #[test]
    fn test_lookup_preserves_registration_order() {
        let (_tx, mut actor) = create_actor();
        let (h1, _r1) = handle(1);
        let (h2, _r2) = handle(2);

        actor.handle_register(UserId::new("alice"), h1);
        actor.handle_register(UserId::new("alice"), h2);

        assert_eq!(ids(&actor.handle_lookup(&UserId::new("alice"))), vec![1, 2]);
        assert!(actor.handle_lookup(&UserId::new("bob")).is_empty());
    }

    #[test]
    fn test_duplicate_registration_is_kept() {
        let (_tx, mut actor) = create_actor();
        let (h1, _r1) = handle(1);

        actor.handle_register(UserId::new("alice"), h1.clone());
        actor.handle_register(UserId::new("alice"), h1);

        assert_eq!(actor.stats().connections, 2);
        assert_eq!(actor.handle_remove(&UserId::new("alice"), ConnectionId::new(1)), 2);
        assert_eq!(actor.stats(), RegistryStats::default());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (_tx, mut actor) = create_actor();
        let (h1, _r1) = handle(1);
        let (h2, _r2) = handle(2);
        actor.handle_register(UserId::new("alice"), h1);
        actor.handle_register(UserId::new("alice"), h2);

        assert_eq!(actor.handle_remove(&UserId::new("alice"), ConnectionId::new(1)), 1);
        assert_eq!(actor.handle_remove(&UserId::new("alice"), ConnectionId::new(1)), 0);
        assert_eq!(actor.handle_remove(&UserId::new("nobody"), ConnectionId::new(1)), 0);

        assert_eq!(ids(&actor.handle_lookup(&UserId::new("alice"))), vec![2]);
    }

    #[test]
    fn test_prune_drops_closed_handles_only() {
        let (_tx, mut actor) = create_actor();
        let (h1, r1) = handle(1);
        let (h2, _r2) = handle(2);
        let (h3, r3) = handle(3);
        actor.handle_register(UserId::new("alice"), h1);
        actor.handle_register(UserId::new("alice"), h2);
        actor.handle_register(UserId::new("bob"), h3);

        drop(r1);
        drop(r3);
        actor.handle_prune_closed();

        assert_eq!(ids(&actor.handle_lookup(&UserId::new("alice"))), vec![2]);
        assert_eq!(
            actor.stats(),
            RegistryStats {
                identities: 1,
                connections: 1
            }
        );
    }

    #[tokio::test]
    async fn test_commands_round_trip_through_channel() {
        let (cmd_tx, mut actor) = create_actor();
        let (h1, _r1) = handle(1);

        let (respond_tx, respond_rx) = oneshot::channel();
        cmd_tx
            .send(RegistryCommand::Register {
                identity: UserId::new("alice"),
                handle: h1,
                respond_to: respond_tx,
            })
            .await
            .unwrap();

        // Process the command manually (actor not running in background)
        if let Some(cmd) = actor.receiver.recv().await {
            actor.handle_command(cmd);
        }
        assert!(respond_rx.await.is_ok());

        let (respond_tx, respond_rx) = oneshot::channel();
        cmd_tx
            .send(RegistryCommand::Stats {
                respond_to: respond_tx,
            })
            .await
            .unwrap();
        if let Some(cmd) = actor.receiver.recv().await {
            actor.handle_command(cmd);
        }
        assert_eq!(respond_rx.await.unwrap().connections, 1);
    }
}
