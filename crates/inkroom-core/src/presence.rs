//! Session identity and per-user presence records.

use kurbo::Point;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::stroke::Stroke;

/// Peers silent for longer than this are dropped from rendering.
pub const PRESENCE_STALE_MS: i64 = 30_000;

/// Palette for randomly assigned user colors.
const USER_COLORS: &[&str] = &[
    "#E6194B", "#3CB44B", "#4363D8", "#F58231", "#911EB4", "#42D4F4", "#F032E6", "#9A6324",
];

/// Identity of this session, created once at session start and threaded
/// through every component that needs it. Never a hidden singleton.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub user_id: String,
    pub name: String,
    pub color: String,
}

impl SessionIdentity {
    /// Generate a random per-session identity.
    pub fn generate(name: impl Into<String>) -> Self {
        let user_id = Uuid::new_v4().to_string();
        // Stable pick from the palette based on the random id.
        let idx = user_id.bytes().map(usize::from).sum::<usize>() % USER_COLORS.len();
        Self {
            user_id,
            name: name.into(),
            color: USER_COLORS[idx].to_string(),
        }
    }
}

/// Ephemeral per-connected-user record.
///
/// Exactly one writer (the owning client); everyone else only reads it. The
/// record is overwritten on activity, never appended, and deleted on
/// disconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPresence {
    pub id: String,
    pub name: String,
    pub color: String,
    /// Cursor in canvas-local space; `None` while off-canvas.
    pub cursor: Option<Point>,
    /// Last activity in epoch milliseconds.
    pub last_active: i64,
    /// The user's live in-progress stroke (`is_complete == false`), for
    /// ghost rendering only.
    pub current_stroke: Option<Stroke>,
}

impl UserPresence {
    pub fn new(identity: &SessionIdentity, now_ms: i64) -> Self {
        Self {
            id: identity.user_id.clone(),
            name: identity.name.clone(),
            color: identity.color.clone(),
            cursor: None,
            last_active: now_ms,
            current_stroke: None,
        }
    }
}

/// Read-side view of the room's peers, keyed by user id.
#[derive(Debug, Default)]
pub struct PeerRoster {
    peers: HashMap<String, UserPresence>,
}

impl PeerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an incoming peer record (overwrite, not append).
    pub fn upsert(&mut self, presence: UserPresence) {
        self.peers.insert(presence.id.clone(), presence);
    }

    /// Drop a disconnected peer.
    pub fn remove(&mut self, user_id: &str) -> Option<UserPresence> {
        self.peers.remove(user_id)
    }

    /// Evict peers that have been silent past the staleness window.
    pub fn prune_stale(&mut self, now_ms: i64) {
        self.peers
            .retain(|_, p| now_ms - p.last_active <= PRESENCE_STALE_MS);
    }

    /// Peers visible for overlay rendering.
    pub fn peers(&self) -> impl Iterator<Item = &UserPresence> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
