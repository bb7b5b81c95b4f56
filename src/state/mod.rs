pub mod world;

use std::sync::Arc;

use crate::broadcast::BroadcastHub;
use world::WorldStore;

/// Shared application state, created once at startup and handed to every
/// route and connection.
#[derive(Clone)]
pub struct AppState {
    pub world: Arc<WorldStore>,
    pub hub: Arc<BroadcastHub>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            world: Arc::new(WorldStore::new()),
            hub: Arc::new(BroadcastHub::new()),
        }
    }

    /// Register the default change listener. It only traces; fan-out to
    /// clients happens when a frame is received, never from here.
    pub async fn install_default_listeners(&self) {
        self.world
            .add_listener(|entity_id, data| {
                tracing::debug!(entity_id, fields = data.len(), "Entity changed");
                Ok(())
            })
            .await;
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
