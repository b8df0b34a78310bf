//! WebSocket relay with room-based routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Room (XXXX-XXXX) ── TextBuffer ── BroadcastGroup
//! Client B ──┘                          │
//!                          ┌────────────┼────────────┐
//!                          ▼            ▼            ▼
//!                       Client A     Client B     Client C
//! ```
//!
//! Each room keeps:
//! - A `TextBuffer` copy of the document, fed through the same clamping
//!   applier as the clients, so late joiners get a snapshot
//! - The last announced language
//! - A `BroadcastGroup` for fan-out to connected members
//!
//! The relay imposes no global order across connections. Edits are applied
//! and forwarded in the order each connection task takes the room lock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use pairpad_core::{RemoteApplier, TextBuffer};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, Frame};
use crate::member::RoomMember;
use crate::protocol::{JoinRejectReason, LanguageInfo, MessageType, Snapshot, SyncMessage};
use crate::room::RoomId;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum members per room
    pub max_peers_per_room: usize,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// WebSocket keep-alive ping interval in seconds
    pub heartbeat_interval_secs: u64,
    /// Create unknown rooms on first join instead of rejecting
    pub auto_create_rooms: bool,
    /// Reject joins that do not carry an authenticated identity
    pub require_auth: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_peers_per_room: 100,
            broadcast_capacity: 256,
            heartbeat_interval_secs: 30,
            auto_create_rooms: true,
            require_auth: false,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `PAIRPAD_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(bind) = std::env::var("PAIRPAD_BIND") {
            config.bind_addr = bind;
        }
        config.max_peers_per_room = env_or("PAIRPAD_MAX_PEERS", config.max_peers_per_room);
        config.broadcast_capacity =
            env_or("PAIRPAD_BROADCAST_CAPACITY", config.broadcast_capacity);
        config.heartbeat_interval_secs =
            env_or("PAIRPAD_HEARTBEAT_SECS", config.heartbeat_interval_secs);
        if let Ok(raw) = std::env::var("PAIRPAD_AUTO_CREATE_ROOMS") {
            config.auto_create_rooms = parse_flag(&raw).unwrap_or(config.auto_create_rooms);
        }
        if let Ok(raw) = std::env::var("PAIRPAD_REQUIRE_AUTH") {
            config.require_auth = parse_flag(&raw).unwrap_or(config.require_auth);
        }
        config
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("ignoring {key}={raw:?}: not a valid value");
            default
        }),
        Err(_) => default,
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            log::warn!("ignoring flag value {raw:?}");
            None
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
    /// Edits dropped because they failed to decode
    pub dropped_edits: u64,
    /// Edits applied to the room copy only after clamping
    pub clamped_edits: u64,
}

struct RoomContent {
    buffer: TextBuffer,
    language: Option<LanguageInfo>,
    applier: RemoteApplier,
}

/// One room: document copy + broadcast group.
pub struct RelayRoom {
    broadcast: BroadcastGroup,
    content: Mutex<RoomContent>,
    /// Created by a join; removed again once empty.
    ephemeral: bool,
}

impl RelayRoom {
    fn new(broadcast_capacity: usize, text: &str, ephemeral: bool) -> Self {
        Self {
            broadcast: BroadcastGroup::new(broadcast_capacity),
            content: Mutex::new(RoomContent {
                buffer: TextBuffer::from_text(text),
                language: None,
                applier: RemoteApplier::new(),
            }),
            ephemeral,
        }
    }

    pub fn broadcast(&self) -> &BroadcastGroup {
        &self.broadcast
    }

    /// Current room text.
    pub async fn text(&self) -> String {
        self.content.lock().await.buffer.text()
    }

    pub async fn language(&self) -> Option<LanguageInfo> {
        self.content.lock().await.language.clone()
    }
}

/// Registry of live rooms.
pub struct RoomManager {
    rooms: RwLock<HashMap<RoomId, Arc<RelayRoom>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    pub async fn get(&self, room_id: &RoomId) -> Option<Arc<RelayRoom>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Find (or, with `create`, make) the room and seat `member` in it
    /// while the registry is locked. An empty room cannot be removed
    /// between the lookup and the seating, so two joiners of the same code
    /// always land in the same room.
    ///
    /// The broadcast subscription and the snapshot are taken under the
    /// room's content lock so every edit lands in exactly one of them.
    pub async fn seat(
        &self,
        room_id: &RoomId,
        create: bool,
        member: RoomMember,
        connection: Uuid,
        max_members: usize,
    ) -> Result<Seated, JoinRejectReason> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(room_id) {
                return seat_in(room.clone(), member, connection, max_members).await;
            }
        }
        if !create {
            return Err(JoinRejectReason::RoomNotFound);
        }

        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(room_id.clone())
            .or_insert_with(|| {
                log::info!("Room {room_id} created on join");
                Arc::new(RelayRoom::new(self.default_capacity, "", true))
            })
            .clone();
        let seated = seat_in(room, member, connection, max_members).await;
        drop(rooms);
        seated
    }

    /// Open a room that outlives its members. Returns `false` if the room
    /// already exists.
    pub async fn open(&self, room_id: RoomId, initial_text: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&room_id) {
            return false;
        }
        log::info!("Room {room_id} opened");
        rooms.insert(
            room_id,
            Arc::new(RelayRoom::new(self.default_capacity, initial_text, false)),
        );
        true
    }

    /// Remove an ephemeral room with no members.
    pub async fn remove_if_empty(&self, room_id: &RoomId) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(room_id) {
            if room.ephemeral && room.broadcast.member_count().await == 0 {
                rooms.remove(room_id);
                log::info!("Room {room_id} removed (empty)");
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_rooms(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// A member's place in a room, as handed out by [`RoomManager::seat`].
pub struct Seated {
    pub room: Arc<RelayRoom>,
    pub rx: broadcast::Receiver<Arc<Frame>>,
    pub snapshot: Snapshot,
}

async fn seat_in(
    room: Arc<RelayRoom>,
    member: RoomMember,
    connection: Uuid,
    max_members: usize,
) -> Result<Seated, JoinRejectReason> {
    let content = room.content.lock().await;
    let rx = room
        .broadcast
        .try_add_member(member, connection, max_members)
        .await?;
    let snapshot = Snapshot {
        text: content.buffer.text(),
        members: room.broadcast.members().await,
        language: content.language.clone(),
    };
    drop(content);
    Ok(Seated { room, rx, snapshot })
}

struct Shared {
    config: ServerConfig,
    rooms: RoomManager,
    stats: RwLock<ServerStats>,
}

/// A connection's seat in a room.
struct Joined {
    peer_id: Uuid,
    room_id: RoomId,
    room: Arc<RelayRoom>,
    rx: broadcast::Receiver<Arc<Frame>>,
}

/// The relay server.
pub struct SyncServer {
    shared: Arc<Shared>,
}

impl SyncServer {
    /// Create a new relay with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let rooms = RoomManager::new(config.broadcast_capacity);
        Self {
            shared: Arc::new(Shared {
                config,
                rooms,
                stats: RwLock::new(ServerStats::default()),
            }),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Open a persistent room, optionally seeded with text.
    pub async fn open_room(&self, room_id: RoomId, initial_text: &str) -> bool {
        let opened = self.shared.rooms.open(room_id, initial_text).await;
        self.shared.stats.write().await.active_rooms = self.shared.rooms.room_count().await;
        opened
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.shared.config.bind_addr).await?;
        log::info!("Relay listening on {}", self.shared.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, shared).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.shared.stats.read().await.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    pub fn bind_addr(&self) -> &str {
        &self.shared.config.bind_addr
    }

    pub fn rooms(&self) -> &RoomManager {
        &self.shared.rooms
    }
}

async fn send(sink: &mut WsSink, msg: &SyncMessage) -> Result<(), BoxError> {
    sink.send(Message::Binary(msg.encode()?.into())).await?;
    Ok(())
}

async fn reject(
    sink: &mut WsSink,
    peer_id: Uuid,
    room_id: RoomId,
    reason: JoinRejectReason,
) -> Result<(), BoxError> {
    log::info!("Join of {peer_id} to {room_id} rejected: {reason}");
    send(sink, &SyncMessage::join_rejected(peer_id, room_id, reason)).await
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    shared: Arc<Shared>,
) -> Result<(), BoxError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let connection = Uuid::new_v4();

    log::info!("WebSocket connection established from {addr}");

    {
        let mut s = shared.stats.write().await;
        s.total_connections += 1;
        s.active_connections += 1;
    }

    let period = Duration::from_secs(shared.config.heartbeat_interval_secs.max(1));
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let mut joined: Option<Joined> = None;

    let result: Result<(), BoxError> = async {
        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            let sync_msg = match SyncMessage::decode(&bytes) {
                                Ok(m) => m,
                                Err(e) => {
                                    log::warn!("Failed to decode message from {addr}: {e}");
                                    continue;
                                }
                            };
                            {
                                let mut s = shared.stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += bytes.len() as u64;
                            }

                            match sync_msg.msg_type {
                                MessageType::Join => {
                                    if joined.is_some() {
                                        log::debug!("Ignoring second join on one connection from {addr}");
                                        continue;
                                    }
                                    joined = handle_join(&shared, connection, &sync_msg, &mut ws_sender).await?;
                                }
                                MessageType::Ping => {
                                    send(&mut ws_sender, &SyncMessage::pong(sync_msg.peer_id)).await?;
                                }
                                MessageType::Leave => {
                                    log::debug!("Leave from {addr}");
                                    break;
                                }
                                msg_type => {
                                    let Some(seat) = joined.as_ref() else {
                                        log::debug!("{msg_type:?} before join from {addr}; dropped");
                                        continue;
                                    };
                                    if sync_msg.peer_id != seat.peer_id {
                                        log::warn!("{msg_type:?} from {addr} claims peer {}; dropped", sync_msg.peer_id);
                                        continue;
                                    }
                                    relay(&shared, seat, &sync_msg, bytes).await;
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::warn!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                frame = async {
                    match joined.as_mut() {
                        Some(seat) => seat.rx.recv().await,
                        // Not joined yet: wait forever
                        None => std::future::pending().await,
                    }
                } => {
                    match frame {
                        Ok(frame) => {
                            // Don't echo back to sender
                            if joined.as_ref().map(|s| s.peer_id) == Some(frame.sender) {
                                continue;
                            }
                            ws_sender.send(Message::Binary(frame.bytes.clone().into())).await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Connection {addr} lagged by {n} messages");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }

                _ = heartbeat.tick() => {
                    ws_sender.send(Message::Ping(Vec::new().into())).await?;
                }
            }
        }
        Ok(())
    }
    .await;

    if let Some(seat) = joined {
        if let Some(member) = seat.room.broadcast.remove_member(&seat.peer_id, connection).await {
            let left = SyncMessage::member_left(member.user_id, seat.room_id.clone());
            if let Err(e) = seat.room.broadcast.broadcast(&left) {
                log::warn!("Failed to announce departure of {}: {e}", member.user_id);
            }
            log::info!("{} ({}) left room {}", member.display_name, member.user_id, seat.room_id);
        }
        shared.rooms.remove_if_empty(&seat.room_id).await;
    }

    let room_count = shared.rooms.room_count().await;
    let mut s = shared.stats.write().await;
    s.active_connections = s.active_connections.saturating_sub(1);
    s.active_rooms = room_count;
    drop(s);

    result
}

/// Seat a joining member, or reject them.
///
/// Answers with `JoinAccepted` then `Snapshot`, and announces the member
/// to everyone else in the room.
async fn handle_join(
    shared: &Shared,
    connection: Uuid,
    msg: &SyncMessage,
    sink: &mut WsSink,
) -> Result<Option<Joined>, BoxError> {
    let Some(room_id) = msg.room.clone() else {
        log::warn!("Join from {} without a room id", msg.peer_id);
        return Ok(None);
    };
    let request = match msg.join_request() {
        Ok(request) => request,
        Err(e) => {
            log::warn!("Bad join payload from {}: {e}", msg.peer_id);
            return Ok(None);
        }
    };

    if shared.config.require_auth && !request.authenticated {
        reject(sink, msg.peer_id, room_id, JoinRejectReason::Unauthenticated).await?;
        return Ok(None);
    }

    let member = RoomMember::new(msg.peer_id, request.display_name);
    let seated = shared
        .rooms
        .seat(
            &room_id,
            shared.config.auto_create_rooms,
            member.clone(),
            connection,
            shared.config.max_peers_per_room,
        )
        .await;
    let Seated { room, rx, snapshot } = match seated {
        Ok(seated) => seated,
        Err(reason) => {
            shared.rooms.remove_if_empty(&room_id).await;
            reject(sink, msg.peer_id, room_id, reason).await?;
            return Ok(None);
        }
    };

    let accepted = SyncMessage::join_accepted(room_id.clone(), &member);
    let greeting = async {
        send(sink, &accepted).await?;
        send(sink, &SyncMessage::snapshot(room_id.clone(), &snapshot)).await
    };
    if let Err(e) = greeting.await {
        room.broadcast.remove_member(&member.user_id, connection).await;
        shared.rooms.remove_if_empty(&room_id).await;
        return Err(e);
    }

    room.broadcast
        .broadcast(&SyncMessage::member_joined(room_id.clone(), &member))?;
    shared.stats.write().await.active_rooms = shared.rooms.room_count().await;

    log::info!(
        "{} ({}) joined room {}{}",
        member.display_name,
        member.user_id,
        room_id,
        if request.resync { " (resync)" } else { "" }
    );

    Ok(Some(Joined {
        peer_id: member.user_id,
        room_id,
        room,
        rx,
    }))
}

/// Route one room message from a seated member.
async fn relay(shared: &Shared, seat: &Joined, msg: &SyncMessage, bytes: Vec<u8>) {
    match msg.msg_type {
        MessageType::Edit => {
            let op = match msg.edit_operation() {
                Ok(op) => op,
                Err(e) => {
                    log::warn!("Dropping malformed edit from {}: {e}", seat.peer_id);
                    shared.stats.write().await.dropped_edits += 1;
                    return;
                }
            };

            let clamped = {
                let mut content = seat.room.content.lock().await;
                let RoomContent { buffer, applier, .. } = &mut *content;
                match applier.apply_to_buffer(buffer, &op) {
                    Ok(outcome) => {
                        seat.room.broadcast.broadcast_raw(seat.peer_id, bytes);
                        outcome.is_clamped()
                    }
                    Err(e) => {
                        log::warn!("Edit from {} not applied: {e}", seat.peer_id);
                        return;
                    }
                }
            };
            if clamped {
                shared.stats.write().await.clamped_edits += 1;
            }
            log::debug!("Edit from {} relayed in {}", seat.peer_id, seat.room_id);
        }

        MessageType::Presence => match msg.presence_update() {
            Ok(update) if update.user_id == seat.peer_id => {
                log::trace!("Presence {:?} from {}", update.kind(), seat.peer_id);
                seat.room.broadcast.broadcast_raw(seat.peer_id, bytes);
            }
            Ok(update) => {
                log::warn!("Presence for {} sent by {}; dropped", update.user_id, seat.peer_id);
            }
            Err(e) => log::warn!("Bad presence from {}: {e}", seat.peer_id),
        },

        MessageType::Language => match msg.language_info() {
            Ok(info) => {
                log::info!("Room {} language set to {}", seat.room_id, info.language);
                let mut content = seat.room.content.lock().await;
                content.language = Some(info);
                seat.room.broadcast.broadcast_raw(seat.peer_id, bytes);
            }
            Err(e) => log::warn!("Bad language update from {}: {e}", seat.peer_id),
        },

        other => {
            log::debug!("Unhandled message type: {other:?}");
        }
    }
}
