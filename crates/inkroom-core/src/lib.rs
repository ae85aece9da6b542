//! Inkroom Core Library
//!
//! Platform-agnostic data structures and logic for the Inkroom drawing
//! surface: stroke model, gesture handling, history, reconciliation, and
//! the room store contract.

pub mod eraser;
pub mod geometry;
pub mod history;
pub mod presence;
pub mod reconciler;
pub mod store;
pub mod stroke;
pub mod sync;
pub mod timing;
pub mod tools;

pub use eraser::{erase_against_all, erase_stroke, EraseOutcome};
pub use history::{History, HistoryAction, MAX_UNDO_HISTORY};
pub use presence::{PeerRoster, SessionIdentity, UserPresence};
pub use reconciler::{Reconciler, RemoteEvent, StoreOp};
pub use store::{MemoryRoomStore, RoomEvent, RoomStore, StoreError, StoreResult};
pub use stroke::{current_background, generate_stroke_id, Stroke, StrokeId, StrokeKind, StrokePatch, DEFAULT_BACKGROUND};
pub use sync::{apply_sync_event, ClientMessage, ConnectionState, ServerMessage, SyncEvent};
pub use tools::{Tool, ToolController, ToolEffect};

#[cfg(not(target_arch = "wasm32"))]
pub use sync::{RoomConnection, SyncError};
