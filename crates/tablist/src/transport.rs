//! A transport that writes tab list updates to the log instead of a socket.

use crate::console::PlayerDirectory;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tablist_engine::{EntryChange, PlayerId, TabListSender, TabListUpdate, TransportError};
use tracing::{debug, info};

pub struct ConsoleTransport {
    directory: Arc<PlayerDirectory>,
    delivered: AtomicU64,
}

impl ConsoleTransport {
    pub fn new(directory: Arc<PlayerDirectory>) -> Self {
        Self {
            directory,
            delivered: AtomicU64::new(0),
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

/// One line per change, in the order the client would apply them.
fn describe(change: &EntryChange, directory: &PlayerDirectory) -> String {
    let name = |id: &PlayerId| directory.name_of(*id).unwrap_or_else(|| id.short());
    match change {
        EntryChange::Added { entry, slot } => format!("+ #{} {:?} ({}ms)", slot, entry.display, entry.ping),
        EntryChange::Removed { player_id } => format!("- {}", name(player_id)),
        EntryChange::DisplayName { player_id, display } => format!("~ {} -> {:?}", name(player_id), display),
        EntryChange::Latency { player_id, ping } => format!("~ {} {}ms", name(player_id), ping),
        EntryChange::Slot { player_id, slot } => format!("> {} #{}", name(player_id), slot),
    }
}

#[async_trait]
impl TabListSender for ConsoleTransport {
    async fn send_tab_list_update(&self, player_id: PlayerId, update: TabListUpdate) -> Result<(), TransportError> {
        let Some(viewer) = self.directory.name_of(player_id) else {
            return Err(TransportError::Disconnected(player_id));
        };

        info!(
            viewer = %viewer,
            "📋 Tab list update: {} change(s){}{}",
            update.changes.len(),
            update.header.as_ref().map(|h| format!(", header {:?}", h)).unwrap_or_default(),
            update.footer.as_ref().map(|f| format!(", footer {:?}", f)).unwrap_or_default(),
        );
        for change in &update.changes {
            info!(viewer = %viewer, "    {}", describe(change, &self.directory));
        }

        let json = serde_json::to_string(&update).map_err(|e| TransportError::Other(e.to_string()))?;
        debug!(viewer = %viewer, "{}", json);

        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
