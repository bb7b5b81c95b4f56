//! The shared world: every entity known to the server plus the listeners
//! that observe changes to them.
//!
//! A mutation and the dispatch of its notifications happen under a single
//! write lock, so listeners observe mutations in exactly the order they were
//! applied and always see the entity as it is right after the change.

use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::{Entity, EntityId, World};

/// Error returned by a listener that could not handle a change
#[derive(Debug, thiserror::Error)]
#[error("listener failed: {0}")]
pub struct ListenerError(pub String);

/// Callback invoked with `(entity_id, full entity)` after every mutation
pub type Listener = Arc<dyn Fn(&str, &Entity) -> Result<(), ListenerError> + Send + Sync>;

#[derive(Default)]
struct Inner {
    space: World,
    listeners: Vec<Listener>,
}

/// Keyed store of entities with change notification
#[derive(Default)]
pub struct WorldStore {
    inner: RwLock<Inner>,
}

impl WorldStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Listeners run in registration order.
    pub async fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&str, &Entity) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.inner.write().await.listeners.push(Arc::new(listener));
    }

    pub async fn listener_count(&self) -> usize {
        self.inner.read().await.listeners.len()
    }

    /// Merge a single field into an entity, creating the entity if needed
    pub async fn update_field(
        &self,
        entity_id: &str,
        key: impl Into<String>,
        value: Value,
    ) -> Entity {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        let entity = inner.space.entry(entity_id.to_string()).or_default();
        entity.insert(key.into(), value);
        let entity = entity.clone();

        notify(&inner.listeners, entity_id, &entity);
        entity
    }

    /// Overwrite an entity's entire mapping. Prior fields are dropped.
    pub async fn replace_entity(&self, entity_id: &str, data: Entity) -> Entity {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        inner.space.insert(entity_id.to_string(), data.clone());

        notify(&inner.listeners, entity_id, &data);
        data
    }

    /// Replace several entities as one step, running `on_commit` first
    /// under the same write lock.
    ///
    /// Everything after the lock is acquired is synchronous, so concurrent
    /// callers are applied in the same order their `on_commit` ran, and a
    /// cancelled caller either applies the whole batch or none of it.
    pub async fn apply_update<I, F, R>(&self, entities: I, on_commit: F) -> R
    where
        I: IntoIterator<Item = (EntityId, Entity)>,
        F: FnOnce() -> R,
    {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        let committed = on_commit();
        for (entity_id, data) in entities {
            inner.space.insert(entity_id.clone(), data.clone());
            notify(&inner.listeners, &entity_id, &data);
        }
        committed
    }

    /// Current entity data. Unknown entities read as empty.
    pub async fn get(&self, entity_id: &str) -> Entity {
        self.inner
            .read()
            .await
            .space
            .get(entity_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop every entity. Listeners are not notified.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        let dropped = inner.space.len();
        inner.space.clear();
        tracing::info!(dropped, "World cleared");
    }

    pub async fn snapshot(&self) -> World {
        self.inner.read().await.space.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.space.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.space.is_empty()
    }
}

/// Run every listener, isolating failures so one bad listener cannot stop
/// the others or undo the mutation.
fn notify(listeners: &[Listener], entity_id: &str, entity: &Entity) {
    for (index, listener) in listeners.iter().enumerate() {
        match catch_unwind(AssertUnwindSafe(|| listener(entity_id, entity))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(listener = index, entity_id, error = %e, "Listener returned an error");
            }
            Err(_) => {
                tracing::error!(listener = index, entity_id, "Listener panicked");
            }
        }
    }
}
