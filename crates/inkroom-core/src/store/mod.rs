//! Room Store abstraction: the backend the reconciler propagates edits to.

mod memory;

pub use memory::MemoryRoomStore;

use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc::Receiver;
use thiserror::Error;

use crate::presence::UserPresence;
use crate::stroke::{Stroke, StrokeId, StrokePatch};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Room not found: {0}")]
    RoomNotFound(String),
    #[error("Stroke not found: {0}")]
    StrokeNotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Store error: {0}")]
    Other(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Boxed future for async store operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Live event pushed to room subscribers.
///
/// Events for one stroke id are applied in the order received; only the
/// one-time initial load orders by timestamp.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    StrokeInserted(Stroke),
    StrokeUpdated { id: StrokeId, patch: StrokePatch },
    StrokeDeleted(StrokeId),
    PresenceUpserted(UserPresence),
    PresenceRemoved(String),
}

/// Receiving end of a room subscription; dropping it unsubscribes.
pub type RoomEventReceiver = Receiver<RoomEvent>;

/// Backend contract for room persistence and fan-out.
///
/// Implementations may relay over WebSocket, keep rows in a database, or
/// stay in memory; the core depends only on this surface.
pub trait RoomStore: Send + Sync {
    /// Idempotent create-if-absent.
    fn ensure_room(&self, room_id: &str) -> BoxFuture<'_, StoreResult<()>>;

    /// Full stroke set ordered by timestamp ascending, so the
    /// last-write-on-top paint rule is establishable from array order.
    fn fetch_strokes(&self, room_id: &str) -> BoxFuture<'_, StoreResult<Vec<Stroke>>>;

    /// Insert a completed stroke.
    fn insert_stroke(&self, room_id: &str, stroke: Stroke) -> BoxFuture<'_, StoreResult<()>>;

    /// Splice partial fields into a stored stroke.
    fn update_stroke(&self, stroke_id: &str, patch: StrokePatch) -> BoxFuture<'_, StoreResult<()>>;

    /// Delete one stroke.
    fn delete_stroke(&self, stroke_id: &str) -> BoxFuture<'_, StoreResult<()>>;

    /// Bulk delete every stroke in the room.
    fn delete_all_strokes(&self, room_id: &str) -> BoxFuture<'_, StoreResult<()>>;

    /// Open a live event channel scoped to the room.
    fn subscribe(&self, room_id: &str) -> BoxFuture<'_, StoreResult<RoomEventReceiver>>;

    /// Overwrite this session's presence record.
    fn upsert_presence(
        &self,
        room_id: &str,
        presence: UserPresence,
    ) -> BoxFuture<'_, StoreResult<()>>;

    /// Presence records of everyone else in the room.
    fn fetch_presence(
        &self,
        room_id: &str,
        excluding_user_id: &str,
    ) -> BoxFuture<'_, StoreResult<Vec<UserPresence>>>;

    /// Remove this session's own presence record on teardown. Never
    /// removes other users' records.
    fn delete_presence(&self, user_id: &str) -> BoxFuture<'_, StoreResult<()>>;
}
