//! One connected client: a reader task feeding the world and the hub, and a
//! writer loop draining the client's queue back onto the socket.
//!
//! Whichever half stops first stops the other. Cleanup (leaving the hub and
//! aborting the reader) lives in a drop guard so it runs exactly once on
//! every exit path, including when the connection future itself is dropped.

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::AbortHandle;

use crate::broadcast::{BroadcastHub, Client};
use crate::error::ConnectionError;
use crate::protocol::{decode_frame, FrameError};
use crate::state::world::WorldStore;
use crate::state::AppState;
use crate::types::ClientId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Closed,
}

/// How a connection ended
#[derive(Debug)]
pub enum Disconnect {
    /// The peer sent a close frame or the inbound stream ended
    Closed,
    /// The client's queue was closed from the hub side
    Evicted,
    /// The reader task stopped without reporting back (panic)
    ReaderAborted,
    Failed(ConnectionError),
}

/// Per-connection counters
#[derive(Debug, Default)]
pub struct ConnectionStats {
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    decode_errors: AtomicU64,
}

impl ConnectionStats {
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }
}

pub struct ClientConnection {
    state: ConnectionState,
    client_id: Option<ClientId>,
    world: Arc<WorldStore>,
    hub: Arc<BroadcastHub>,
    stats: Arc<ConnectionStats>,
}

impl ClientConnection {
    pub fn new(state: &AppState) -> Self {
        Self {
            state: ConnectionState::Connecting,
            client_id: None,
            world: state.world.clone(),
            hub: state.hub.clone(),
            stats: Arc::new(ConnectionStats::default()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Hub id, assigned once the connection becomes active
    pub fn client_id(&self) -> Option<&ClientId> {
        self.client_id.as_ref()
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Drive the connection until either half stops.
    ///
    /// The reader runs as its own task; the writer runs inline on the
    /// caller's task. Frames still queued when the connection ends are
    /// discarded.
    pub async fn run<S, R, E>(&mut self, mut sink: S, stream: R) -> Disconnect
    where
        S: Sink<Message> + Send + Unpin,
        S::Error: Display,
        R: Stream<Item = Result<Message, E>> + Send + Unpin + 'static,
        E: Display + Send + 'static,
    {
        if self.state != ConnectionState::Connecting {
            tracing::warn!(state = ?self.state, "Connection can only be run once");
            return Disconnect::Closed;
        }

        let mut client = self.hub.register();
        let client_id = client.id().clone();
        self.client_id = Some(client_id.clone());

        let mut reader = tokio::spawn(read_frames(
            stream,
            client_id.clone(),
            self.world.clone(),
            self.hub.clone(),
            self.stats.clone(),
        ));
        let guard = ConnectionGuard {
            hub: self.hub.clone(),
            client_id: client_id.clone(),
            reader: reader.abort_handle(),
        };

        self.state = ConnectionState::Active;
        tracing::info!(client_id = %client_id, "Client connected");

        let outcome = tokio::select! {
            written = write_frames(&mut sink, &mut client, &self.stats) => match written {
                Ok(()) => Disconnect::Evicted,
                Err(e) => Disconnect::Failed(e),
            },
            read = &mut reader => match read {
                Ok(Ok(())) => Disconnect::Closed,
                Ok(Err(e)) => Disconnect::Failed(e),
                Err(e) => {
                    tracing::error!(client_id = %client_id, error = %e, "Reader task failed");
                    Disconnect::ReaderAborted
                }
            },
        };

        drop(guard);
        drop(client);
        self.state = ConnectionState::Closed;

        match &outcome {
            Disconnect::Failed(e) => {
                tracing::warn!(client_id = %client_id, error = %e, "Client disconnected")
            }
            other => tracing::info!(client_id = %client_id, reason = ?other, "Client disconnected"),
        }
        outcome
    }
}

/// Leaves the hub and stops the reader when the connection goes away
struct ConnectionGuard {
    hub: Arc<BroadcastHub>,
    client_id: ClientId,
    reader: AbortHandle,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.hub.unregister(&self.client_id);
        self.reader.abort();
        tracing::debug!(client_id = %self.client_id, "Connection cleaned up");
    }
}

/// Consume inbound frames: echo each valid frame to every client, then
/// replace the named entities in the world.
///
/// Echo and apply share one world write lock, so the world always ends up
/// matching the last frame every client received.
async fn read_frames<R, E>(
    mut stream: R,
    client_id: ClientId,
    world: Arc<WorldStore>,
    hub: Arc<BroadcastHub>,
    stats: Arc<ConnectionStats>,
) -> Result<(), ConnectionError>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => {
                report_decode_error(&client_id, &stats, FrameError::Binary(data.len()));
                continue;
            }
            Ok(Message::Close(frame)) => {
                tracing::debug!(client_id = %client_id, ?frame, "Client sent close frame");
                return Ok(());
            }
            // Pings are answered by the socket layer
            Ok(_) => continue,
            Err(e) => return Err(ConnectionError::Transport(e.to_string())),
        };
        stats.frames_received.fetch_add(1, Ordering::Relaxed);

        let update = match decode_frame(text.as_str()) {
            Ok(update) => update,
            Err(e) => {
                report_decode_error(&client_id, &stats, e);
                continue;
            }
        };

        let entities = update.len();
        let recipients = world.apply_update(update, || hub.broadcast(text)).await;
        tracing::debug!(client_id = %client_id, entities, recipients, "Applied update frame");
    }

    Ok(())
}

fn report_decode_error(client_id: &ClientId, stats: &ConnectionStats, error: FrameError) {
    stats.decode_errors.fetch_add(1, Ordering::Relaxed);
    let error = ConnectionError::from(error);
    tracing::warn!(client_id = %client_id, error = %error, "Dropping inbound frame");
}

/// Drain the client's queue onto the socket
async fn write_frames<S>(
    sink: &mut S,
    client: &mut Client,
    stats: &ConnectionStats,
) -> Result<(), ConnectionError>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(frame) = client.next_frame().await {
        sink.send(Message::Text(frame))
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;
        stats.frames_sent.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}
