//! Inkroom WebSocket Relay Server
//!
//! Relays stroke operations between clients in the same room and keeps an
//! authoritative copy of each room's strokes so late joiners get the full
//! picture.
//!
//! ## Protocol
//!
//! Messages are JSON with the following format:
//! ```json
//! { "type": "join", "room": "room-id", "user": { ... } }
//! { "type": "insert", "stroke": { ... } }
//! { "type": "update", "id": "...", "patch": { "points": [...] } }
//! { "type": "delete", "id": "..." }
//! ```

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use inkroom_core::presence::UserPresence;
use inkroom_core::stroke::Stroke;
use inkroom_core::sync::{ClientMessage, ServerMessage};

const CHANNEL_CAPACITY: usize = 256;

/// Room state
struct Room {
    /// Broadcast channel for this room
    tx: broadcast::Sender<(String, ServerMessage)>,
    /// Authoritative stroke list in insertion order
    strokes: Vec<Stroke>,
    /// Presence per connection id
    peers: std::collections::HashMap<String, UserPresence>,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            strokes: Vec::new(),
            peers: std::collections::HashMap::new(),
        }
    }
}

/// Shared application state
struct AppState {
    /// Active rooms
    rooms: DashMap<String, Room>,
}

impl AppState {
    fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Add peer to room; returns the receiver, the stroke snapshot in
    /// timestamp order, and the peer count.
    fn join_room(
        &self,
        room_id: &str,
        peer_id: &str,
        user: UserPresence,
    ) -> (broadcast::Receiver<(String, ServerMessage)>, Vec<Stroke>, usize) {
        let mut room = self.rooms.entry(room_id.to_string()).or_insert_with(Room::new);
        room.peers.insert(peer_id.to_string(), user);
        let rx = room.tx.subscribe();
        let mut strokes = room.strokes.clone();
        strokes.sort_by_key(|s| s.timestamp);
        let peer_count = room.peers.len();
        (rx, strokes, peer_count)
    }

    /// Remove peer from room
    fn leave_room(&self, room_id: &str, peer_id: &str) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            room.peers.remove(peer_id);
            // Empty rooms with no strokes are dropped; rooms with content
            // survive so the drawing is still there on the next join.
            if room.peers.is_empty() && room.strokes.is_empty() {
                drop(room);
                self.rooms.remove(room_id);
            }
        }
    }

    /// Apply a stroke operation to the room's authoritative state.
    fn apply(&self, room_id: &str, msg: &ClientMessage) {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return;
        };
        match msg {
            ClientMessage::Insert { stroke } => {
                // Duplicate ids can arrive on reconnect replay; last wins.
                room.strokes.retain(|s| s.id != stroke.id);
                room.strokes.push(stroke.clone());
            }
            ClientMessage::Update { id, patch } => {
                if let Some(stroke) = room.strokes.iter_mut().find(|s| &s.id == id) {
                    stroke.apply_patch(patch);
                } else {
                    warn!("Update for unknown stroke {} in room {}", id, room_id);
                }
            }
            ClientMessage::Delete { id } => {
                room.strokes.retain(|s| &s.id != id);
            }
            ClientMessage::ClearRoom => {
                room.strokes.clear();
            }
            ClientMessage::Presence { user } => {
                if let Some(existing) = room.peers.values_mut().find(|p| p.id == user.id) {
                    *existing = user.clone();
                }
            }
            ClientMessage::Join { .. } | ClientMessage::Leave => {}
        }
    }

    /// Broadcast message to room
    fn broadcast(&self, room_id: &str, from: &str, msg: ServerMessage) {
        if let Some(room) = self.rooms.get(room_id) {
            let _ = room.tx.send((from.to_string(), msg));
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkroom_server=info,tower_http=info".into()),
        )
        .init();

    let state = Arc::new(AppState::new());

    let app = Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 3030));
    info!("Inkroom relay server listening on {}", addr);
    info!("WebSocket endpoint: ws://localhost:3030/ws");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

/// Index page
async fn index() -> &'static str {
    "Inkroom Relay Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let peer_id = Uuid::new_v4().to_string();
    info!("New connection: {}", peer_id);

    let (mut sender, mut receiver) = socket.split();
    let mut current_room: Option<String> = None;
    let mut room_rx: Option<broadcast::Receiver<(String, ServerMessage)>> = None;

    loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                match client_msg {
                                    ClientMessage::Join { room, user } => {
                                        // Leave current room if any
                                        if let Some(ref old_room) = current_room {
                                            state.leave_room(old_room, &peer_id);
                                            state.broadcast(old_room, &peer_id, ServerMessage::PeerLeft {
                                                peer_id: peer_id.clone(),
                                            });
                                        }

                                        // Join new room
                                        let presence_msg = ServerMessage::Presence {
                                            from: peer_id.clone(),
                                            user: user.clone(),
                                        };
                                        let (rx, strokes, peer_count) = state.join_room(&room, &peer_id, user);
                                        room_rx = Some(rx);
                                        current_room = Some(room.clone());

                                        // Send joined confirmation with the room contents
                                        let joined = ServerMessage::Joined {
                                            room: room.clone(),
                                            peer_count,
                                            strokes,
                                        };
                                        if sender.send(Message::Text(serde_json::to_string(&joined).unwrap().into())).await.is_err() {
                                            break;
                                        }

                                        // Notify others
                                        state.broadcast(&room, &peer_id, presence_msg);

                                        info!("Peer {} joined room {}", peer_id, room);
                                    }
                                    ClientMessage::Leave => {
                                        if let Some(ref room) = current_room {
                                            state.leave_room(room, &peer_id);
                                            state.broadcast(room, &peer_id, ServerMessage::PeerLeft {
                                                peer_id: peer_id.clone(),
                                            });
                                            info!("Peer {} left room {}", peer_id, room);
                                        }
                                        current_room = None;
                                        room_rx = None;
                                    }
                                    op @ (ClientMessage::Insert { .. }
                                        | ClientMessage::Update { .. }
                                        | ClientMessage::Delete { .. }
                                        | ClientMessage::ClearRoom) => {
                                        if let Some(ref room) = current_room {
                                            state.apply(room, &op);
                                            let out = match op {
                                                ClientMessage::Insert { stroke } => ServerMessage::StrokeInserted {
                                                    from: peer_id.clone(),
                                                    stroke,
                                                },
                                                ClientMessage::Update { id, patch } => ServerMessage::StrokeUpdated {
                                                    from: peer_id.clone(),
                                                    id,
                                                    patch,
                                                },
                                                ClientMessage::Delete { id } => ServerMessage::StrokeDeleted {
                                                    from: peer_id.clone(),
                                                    id,
                                                },
                                                _ => ServerMessage::RoomCleared {
                                                    from: peer_id.clone(),
                                                },
                                            };
                                            state.broadcast(room, &peer_id, out);
                                        }
                                    }
                                    ClientMessage::Presence { user } => {
                                        if let Some(ref room) = current_room {
                                            state.apply(room, &ClientMessage::Presence { user: user.clone() });
                                            state.broadcast(room, &peer_id, ServerMessage::Presence {
                                                from: peer_id.clone(),
                                                user,
                                            });
                                        }
                                    }
                                }
                            }
                            Err(e) => {
                                warn!("Invalid message from {}: {}", peer_id, e);
                                let err = ServerMessage::Error {
                                    message: format!("Invalid message: {}", e),
                                };
                                let _ = sender.send(Message::Text(serde_json::to_string(&err).unwrap().into())).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Ok(_)) => {} // Ignore binary, ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", peer_id, e);
                        break;
                    }
                }
            }

            // Handle broadcast messages from room
            msg = async {
                match &mut room_rx {
                    Some(rx) => rx.recv().await.ok(),
                    None => {
                        // No room joined, just wait forever
                        std::future::pending::<Option<(String, ServerMessage)>>().await
                    }
                }
            } => {
                if let Some((from, server_msg)) = msg {
                    // Don't echo back to sender
                    if from != peer_id {
                        let json = serde_json::to_string(&server_msg).unwrap();
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    // Cleanup on disconnect
    if let Some(ref room) = current_room {
        state.leave_room(room, &peer_id);
        state.broadcast(room, &peer_id, ServerMessage::PeerLeft {
            peer_id: peer_id.clone(),
        });
    }
    info!("Connection closed: {}", peer_id);
}
