//! Fan-out of frames to every connected client.
//!
//! Each client owns an unbounded FIFO queue; the hub keeps the sending half
//! of every live queue. A broadcast holds the registry lock for the whole
//! fan-out, so broadcasts are totally ordered and a concurrent register or
//! unregister lands strictly before or after any given broadcast.

use axum::extract::ws::Utf8Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use crate::types::{new_client_id, ClientId};

/// A text frame as it travels through the hub. Clones share the buffer.
pub type Frame = Utf8Bytes;

/// Receiving side of a registered client
#[derive(Debug)]
pub struct Client {
    id: ClientId,
    queue: mpsc::UnboundedReceiver<Frame>,
}

impl Client {
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Wait for the next queued frame. Returns `None` once the client has
    /// been unregistered and its queue drained.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.queue.recv().await
    }

    pub fn try_next_frame(&mut self) -> Option<Frame> {
        self.queue.try_recv().ok()
    }
}

/// Registry of live client queues
#[derive(Debug, Default)]
pub struct BroadcastHub {
    clients: Mutex<HashMap<ClientId, mpsc::UnboundedSender<Frame>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<ClientId, mpsc::UnboundedSender<Frame>>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a client with a fresh queue and add it to the live set
    pub fn register(&self) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = new_client_id();

        let count = {
            let mut clients = self.clients();
            clients.insert(id.clone(), tx);
            clients.len()
        };
        tracing::debug!(client_id = %id, clients = count, "Client registered");

        Client { id, queue: rx }
    }

    /// Remove a client. Returns false if it was not registered.
    pub fn unregister(&self, id: &ClientId) -> bool {
        let (removed, count) = {
            let mut clients = self.clients();
            let removed = clients.remove(id).is_some();
            (removed, clients.len())
        };
        if removed {
            tracing::debug!(client_id = %id, clients = count, "Client unregistered");
        }
        removed
    }

    /// Enqueue `frame` for every registered client without waiting on any of
    /// them. Returns the number of clients the frame was queued for.
    pub fn broadcast(&self, frame: impl Into<Frame>) -> usize {
        let frame = frame.into();
        let mut clients = self.clients();

        let mut delivered = 0;
        let mut gone = Vec::new();
        for (id, tx) in clients.iter() {
            if tx.send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                gone.push(id.clone());
            }
        }

        // Queues whose receiver was dropped without unregistering
        for id in &gone {
            clients.remove(id);
            tracing::debug!(client_id = %id, "Pruned closed client queue");
        }

        tracing::trace!(recipients = delivered, bytes = frame.len(), "Broadcast frame");
        delivered
    }

    pub fn client_count(&self) -> usize {
        self.clients().len()
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients().contains_key(id)
    }
}
