//! Session registry using Actor pattern.
//!
//! The registry maps each identity to the ordered list of connections that
//! declared it. It is the only state shared between connections; every
//! access goes through a tokio mpsc channel to a single actor task.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  RegistryCommand  ┌──────────────────────────────┐
//! │ Connection tasks │──────────────────▶│        RegistryActor         │
//! │ (RegistryHandle) │◀──────────────────│ HashMap<UserId,              │
//! └──────────────────┘   oneshot reply   │   Vec<ConnectionHandle>>     │
//!                                        └──────────────────────────────┘
//! ```

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::debug;

mod actor;
mod commands;
mod handle;

pub use actor::RegistryActor;
pub use commands::{RegistryCommand, RegistryError, RegistryStats};
pub use handle::RegistryHandle;

/// Command channel buffer size
const COMMAND_BUFFER: usize = 1024;

/// How often handles with a stopped writer are swept out.
const PRUNE_INTERVAL: Duration = Duration::from_secs(30);

/// Spawn the registry actor and return a handle for interaction.
///
/// This function:
/// 1. Creates the command channel
/// 2. Spawns the RegistryActor on a tokio task
/// 3. Spawns a background prune task
/// 4. Returns a RegistryHandle for client use
///
/// Connection loops detach their own handles when they end; the prune task
/// only catches handles whose writer died while the reader was still alive.
pub fn spawn_registry() -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = RegistryActor::new(cmd_rx);
    tokio::spawn(actor.run());

    spawn_prune_task(cmd_tx.downgrade());

    RegistryHandle::new(cmd_tx)
}

/// Spawn a background task that triggers periodic pruning.
///
/// Holds only a weak sender so the actor still stops once every
/// `RegistryHandle` is dropped.
fn spawn_prune_task(sender: mpsc::WeakSender<RegistryCommand>) {
    tokio::spawn(async move {
        let mut ticker = interval(PRUNE_INTERVAL);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let Some(sender) = sender.upgrade() else {
                debug!("Prune task stopping: registry channel closed");
                break;
            };

            if sender.send(RegistryCommand::PruneClosed).await.is_err() {
                debug!("Prune task stopping: registry channel closed");
                break;
            }
        }
    });
}
