//! WebSocket client and wire protocol for room synchronization.
//!
//! Strokes travel as plain JSON; the relay applies each operation to its
//! authoritative copy of the room and fans it out to every other member.

use serde::{Deserialize, Serialize};

use crate::presence::UserPresence;
use crate::reconciler::StoreOp;
use crate::stroke::{Stroke, StrokeId, StrokePatch};

/// Messages sent to the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room
    Join { room: String, user: UserPresence },
    /// Leave current room
    Leave,
    /// Insert a finished stroke
    Insert { stroke: Stroke },
    /// Patch an existing stroke
    Update { id: StrokeId, patch: StrokePatch },
    /// Remove a stroke
    Delete { id: StrokeId },
    /// Remove every stroke in the room
    ClearRoom,
    /// Cursor / in-progress-stroke update
    Presence { user: UserPresence },
}

/// Messages received from the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirm room join with the current room contents
    Joined {
        room: String,
        peer_count: usize,
        /// Persisted strokes in timestamp order
        strokes: Vec<Stroke>,
    },
    /// A stroke landed from another peer
    StrokeInserted { from: String, stroke: Stroke },
    /// A stroke was patched by another peer
    StrokeUpdated { from: String, id: StrokeId, patch: StrokePatch },
    /// A stroke was removed by another peer
    StrokeDeleted { from: String, id: StrokeId },
    /// The room was wiped
    RoomCleared { from: String },
    /// Presence update from another peer
    Presence { from: String, user: UserPresence },
    /// Peer left the room
    PeerLeft { peer_id: String },
    /// Error message
    Error { message: String },
}

impl ClientMessage {
    /// Wire form of a queued store operation.
    pub fn from_op(op: StoreOp) -> Self {
        match op {
            StoreOp::Insert(stroke) => ClientMessage::Insert { stroke },
            StoreOp::Update { id, patch } => ClientMessage::Update { id, patch },
            StoreOp::Delete(id) => ClientMessage::Delete { id },
            StoreOp::DeleteAll => ClientMessage::ClearRoom,
        }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Events from the WebSocket client
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Connected to server
    Connected,
    /// Disconnected from server
    Disconnected,
    /// Joined a room; carries the full persisted stroke set
    JoinedRoom { room: String, peer_count: usize, strokes: Vec<Stroke> },
    /// A peer inserted a stroke
    StrokeInserted { from: String, stroke: Stroke },
    /// A peer patched a stroke
    StrokeUpdated { from: String, id: StrokeId, patch: StrokePatch },
    /// A peer deleted a stroke
    StrokeDeleted { from: String, id: StrokeId },
    /// A peer wiped the room
    RoomCleared { from: String },
    /// Presence update from a peer
    PresenceReceived { from: String, user: UserPresence },
    /// A peer left the room
    PeerLeft { peer_id: String },
    /// Error occurred
    Error { message: String },
}

impl SyncEvent {
    fn from_server(msg: ServerMessage) -> Self {
        match msg {
            ServerMessage::Joined { room, peer_count, strokes } => {
                SyncEvent::JoinedRoom { room, peer_count, strokes }
            }
            ServerMessage::StrokeInserted { from, stroke } => {
                SyncEvent::StrokeInserted { from, stroke }
            }
            ServerMessage::StrokeUpdated { from, id, patch } => {
                SyncEvent::StrokeUpdated { from, id, patch }
            }
            ServerMessage::StrokeDeleted { from, id } => SyncEvent::StrokeDeleted { from, id },
            ServerMessage::RoomCleared { from } => SyncEvent::RoomCleared { from },
            ServerMessage::Presence { from, user } => SyncEvent::PresenceReceived { from, user },
            ServerMessage::PeerLeft { peer_id } => SyncEvent::PeerLeft { peer_id },
            ServerMessage::Error { message } => SyncEvent::Error { message },
        }
    }
}

/// Fold one sync event into local state.
///
/// The join snapshot seeds the reconciler, stroke traffic merges through
/// [`Reconciler::apply_remote`], presence lands in the roster keyed by the
/// relay's connection id so [`SyncEvent::PeerLeft`] can evict it.
///
/// [`Reconciler::apply_remote`]: crate::reconciler::Reconciler::apply_remote
pub fn apply_sync_event(
    event: SyncEvent,
    reconciler: &mut crate::reconciler::Reconciler,
    roster: &mut crate::presence::PeerRoster,
) {
    use crate::reconciler::RemoteEvent;

    match event {
        SyncEvent::JoinedRoom { strokes, .. } => reconciler.load_initial(strokes),
        SyncEvent::StrokeInserted { stroke, .. } => {
            reconciler.apply_remote(RemoteEvent::Inserted(stroke));
        }
        SyncEvent::StrokeUpdated { id, patch, .. } => {
            reconciler.apply_remote(RemoteEvent::Updated { id, patch });
        }
        SyncEvent::StrokeDeleted { id, .. } => {
            reconciler.apply_remote(RemoteEvent::Deleted(id));
        }
        SyncEvent::RoomCleared { .. } => reconciler.load_initial(Vec::new()),
        SyncEvent::PresenceReceived { from, mut user } => {
            user.id = from;
            roster.upsert(user);
        }
        SyncEvent::PeerLeft { peer_id } => {
            roster.remove(&peer_id);
        }
        SyncEvent::Error { ref message } => log::warn!("sync error from relay: {message}"),
        SyncEvent::Connected | SyncEvent::Disconnected => {}
    }
}

// ============================================================================
// Native room connection
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
mod native_client {
    use super::*;
    use std::net::TcpStream;
    use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use thiserror::Error;
    use tungstenite::stream::MaybeTlsStream;
    use tungstenite::{connect, Message, WebSocket};
    use url::Url;

    use crate::presence::PeerRoster;
    use crate::reconciler::{Reconciler, StoreOp};

    /// Read timeout that sets the worker cadence; queued outbound traffic
    /// waits at most this long for a quiet socket.
    const READ_SLICE: Duration = Duration::from_millis(25);

    #[derive(Debug, Error)]
    pub enum SyncError {
        #[error("invalid WebSocket URL: {0}")]
        InvalidUrl(String),
        #[error("not connected")]
        NotConnected,
    }

    enum Outbound {
        Message(Box<ClientMessage>),
        Hangup,
    }

    /// One room's connection to the relay, serviced by a worker thread.
    ///
    /// The worker performs the join handshake as soon as the socket is up;
    /// the relay answers with the room snapshot, which [`RoomConnection::pump`]
    /// feeds into the reconciler along with everything that follows. Outbound
    /// store operations go through [`RoomConnection::send_ops`].
    pub struct RoomConnection {
        state: ConnectionState,
        outbound: Option<Sender<Outbound>>,
        inbound: Option<Receiver<SyncEvent>>,
        worker: Option<JoinHandle<()>>,
    }

    impl RoomConnection {
        /// Open a connection to `url` and join `room` as `user`.
        pub fn open(url: &str, room: &str, user: UserPresence) -> Result<Self, SyncError> {
            let parsed = Url::parse(url).map_err(|e| SyncError::InvalidUrl(e.to_string()))?;
            if !matches!(parsed.scheme(), "ws" | "wss") {
                return Err(SyncError::InvalidUrl(format!(
                    "scheme {} is not ws or wss",
                    parsed.scheme()
                )));
            }

            let (outbound_tx, outbound_rx) = channel();
            let (inbound_tx, inbound_rx) = channel();
            let join = ClientMessage::Join {
                room: room.to_string(),
                user,
            };
            let target = url.to_string();
            let worker =
                thread::spawn(move || run_session(&target, join, &outbound_rx, &inbound_tx));

            Ok(Self {
                state: ConnectionState::Connecting,
                outbound: Some(outbound_tx),
                inbound: Some(inbound_rx),
                worker: Some(worker),
            })
        }

        /// Ship queued store operations to the relay, in order.
        pub fn send_ops(&self, ops: Vec<StoreOp>) -> Result<(), SyncError> {
            for op in ops {
                self.send(ClientMessage::from_op(op))?;
            }
            Ok(())
        }

        /// Overwrite this session's presence record on the relay.
        pub fn send_presence(&self, user: UserPresence) -> Result<(), SyncError> {
            self.send(ClientMessage::Presence { user })
        }

        fn send(&self, msg: ClientMessage) -> Result<(), SyncError> {
            let tx = self.outbound.as_ref().ok_or(SyncError::NotConnected)?;
            tx.send(Outbound::Message(Box::new(msg)))
                .map_err(|_| SyncError::NotConnected)
        }

        /// Drain pending relay events into local state and prune peers that
        /// went silent. Call once per frame.
        pub fn pump(&mut self, reconciler: &mut Reconciler, roster: &mut PeerRoster, now_ms: i64) {
            for event in self.poll() {
                apply_sync_event(event, reconciler, roster);
            }
            roster.prune_stale(now_ms);
        }

        /// Drain raw events without interpreting them (non-blocking).
        pub fn poll(&mut self) -> Vec<SyncEvent> {
            let mut events = Vec::new();
            if let Some(rx) = &self.inbound {
                while let Ok(event) = rx.try_recv() {
                    match &event {
                        SyncEvent::Connected => self.state = ConnectionState::Connected,
                        SyncEvent::Disconnected => self.state = ConnectionState::Disconnected,
                        SyncEvent::Error { .. } => self.state = ConnectionState::Error,
                        _ => {}
                    }
                    events.push(event);
                }
            }
            events
        }

        /// Leave the room and stop the worker.
        pub fn leave(&mut self) {
            if let Some(tx) = self.outbound.take() {
                let _ = tx.send(Outbound::Message(Box::new(ClientMessage::Leave)));
                let _ = tx.send(Outbound::Hangup);
            }
            self.inbound = None;
            self.worker = None;
            self.state = ConnectionState::Disconnected;
        }

        pub fn state(&self) -> ConnectionState {
            self.state
        }

        pub fn is_connected(&self) -> bool {
            self.state == ConnectionState::Connected
        }
    }

    impl Drop for RoomConnection {
        fn drop(&mut self) {
            self.leave();
        }
    }

    fn run_session(
        url: &str,
        join: ClientMessage,
        outbound: &Receiver<Outbound>,
        inbound: &Sender<SyncEvent>,
    ) {
        log::info!("sync worker dialing {url}");
        let (mut socket, response) = match connect(url) {
            Ok(ok) => ok,
            Err(e) => {
                log::error!("sync worker could not reach relay: {e}");
                let _ = inbound.send(SyncEvent::Error {
                    message: format!("Connection failed: {e}"),
                });
                return;
            }
        };
        log::info!("sync worker connected, status {}", response.status());

        if let MaybeTlsStream::Plain(tcp) = socket.get_mut() {
            let _ = tcp.set_read_timeout(Some(READ_SLICE));
            let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
        }

        let _ = inbound.send(SyncEvent::Connected);

        // Join before anything else; the relay replies with the snapshot
        // that seeds the reconciler.
        if write_json(&mut socket, &join).is_err() {
            let _ = inbound.send(SyncEvent::Disconnected);
            return;
        }

        'session: loop {
            // Flush all queued outbound first so a burst of store ops is
            // not gated on inbound traffic.
            loop {
                match outbound.try_recv() {
                    Ok(Outbound::Message(msg)) => {
                        if write_json(&mut socket, &msg).is_err() {
                            break 'session;
                        }
                    }
                    Ok(Outbound::Hangup) | Err(TryRecvError::Disconnected) => {
                        let _ = socket.close(None);
                        break 'session;
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }

            match socket.read() {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(msg) => {
                        if inbound.send(SyncEvent::from_server(msg)).is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("sync worker dropping malformed relay message: {e}"),
                },
                Ok(Message::Ping(payload)) => {
                    let _ = socket.send(Message::Pong(payload));
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(tungstenite::Error::Io(ref e))
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) => {}
                Err(e) => {
                    log::error!("sync worker read failed: {e}");
                    break;
                }
            }
        }

        log::info!("sync worker shutting down");
        let _ = inbound.send(SyncEvent::Disconnected);
    }

    fn write_json(
        socket: &mut WebSocket<MaybeTlsStream<TcpStream>>,
        msg: &ClientMessage,
    ) -> Result<(), tungstenite::Error> {
        match serde_json::to_string(msg) {
            Ok(json) => socket.send(Message::Text(json)),
            Err(e) => {
                // Our own wire types always encode; log and move on.
                log::error!("sync worker could not encode message: {e}");
                Ok(())
            }
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native_client::{RoomConnection, SyncError};
