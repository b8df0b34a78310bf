//! Client side of a room: transport ownership, join handshake, and
//! reconnect-then-resync.
//!
//! ```text
//!  Disconnected ──connect()──► Connecting ──join()──► Joined
//!        ▲                                         │     ▲
//!        │ leave() / rejected / attempts exhausted │     │ reconnect()
//!        └───────────────────── Reconnecting ◄─────┘─────┘
//!                                 (transport lost)
//! ```
//!
//! A session is an owned value with an explicit lifecycle. There is no
//! process-wide connection; callers pass `&mut RoomSession` to whatever
//! needs to send.
//!
//! Edits made while `Reconnecting`, or after the rejoin but before its
//! snapshot, are queued but never replayed. When the snapshot arrives the
//! queue is discarded and the snapshot wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use pairpad_core::EditOperation;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::member::RoomMember;
use crate::presence::PresenceUpdate;
use crate::protocol::{
    JoinRejectReason, JoinRequest, LanguageInfo, MessageType, ProtocolError, Snapshot, SyncMessage,
};
use crate::room::RoomId;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Joined,
    Reconnecting,
}

/// Retry schedule for [`RoomSession::reconnect`].
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based). Doubles each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_backoff)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Relay WebSocket URL, e.g. `ws://127.0.0.1:9090`
    pub server_url: String,
    pub display_name: String,
    /// Whether the identity provider signed this user in
    pub authenticated: bool,
    /// Upper bound for connecting and for the join answer
    pub handshake_timeout: Duration,
    /// Outgoing and event channel capacity
    pub channel_capacity: usize,
    pub reconnect: ReconnectPolicy,
}

impl SessionConfig {
    pub fn new(server_url: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            display_name: display_name.into(),
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9090".to_string(),
            display_name: "Anonymous".to_string(),
            authenticated: false,
            handshake_timeout: Duration::from_secs(5),
            channel_capacity: 256,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Connection-level failures. Protocol-level problems (bad frames,
/// malformed edits) are logged and dropped, never returned.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport disconnected")]
    TransportDisconnected,
    #[error("join rejected: {0}")]
    JoinRejected(JoinRejectReason),
    #[error("not joined to a room")]
    NotJoined,
    #[error("relay did not answer within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("could not reach relay: {0}")]
    Connect(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("session has been disposed")]
    Disposed,
}

/// Events delivered to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RemoteEdit { peer_id: Uuid, op: EditOperation },
    Presence(PresenceUpdate),
    MemberJoined(RoomMember),
    MemberLeft(Uuid),
    /// Full document and member list; sent after every join
    Snapshot(Snapshot),
    Language { peer_id: Uuid, info: LanguageInfo },
    Pong,
    /// Transport dropped while joined; call [`RoomSession::reconnect`]
    ConnectionLost,
}

/// Translate a relay frame into an application event.
///
/// Our own traffic and handshake frames produce nothing. Malformed edits are
/// dropped here.
pub fn event_from_message(msg: SyncMessage, own_id: Uuid) -> Option<SessionEvent> {
    let from_self = msg.peer_id == own_id;
    match msg.msg_type {
        MessageType::Edit if !from_self => match msg.edit_operation() {
            Ok(op) => Some(SessionEvent::RemoteEdit {
                peer_id: msg.peer_id,
                op,
            }),
            Err(e) => {
                log::warn!("dropping malformed edit from {}: {e}", msg.peer_id);
                None
            }
        },
        MessageType::Presence if !from_self => match msg.presence_update() {
            Ok(update) => Some(SessionEvent::Presence(update)),
            Err(e) => {
                log::warn!("dropping bad presence from {}: {e}", msg.peer_id);
                None
            }
        },
        MessageType::MemberJoined if !from_self => msg.member().ok().map(SessionEvent::MemberJoined),
        MessageType::MemberLeft if !from_self => Some(SessionEvent::MemberLeft(msg.peer_id)),
        MessageType::Snapshot => match msg.snapshot_payload() {
            Ok(snapshot) => Some(SessionEvent::Snapshot(snapshot)),
            Err(e) => {
                log::warn!("dropping bad snapshot: {e}");
                None
            }
        },
        MessageType::Language if !from_self => msg
            .language_info()
            .ok()
            .map(|info| SessionEvent::Language {
                peer_id: msg.peer_id,
                info,
            }),
        MessageType::Pong => Some(SessionEvent::Pong),
        _ => None,
    }
}

/// One client's membership in one room.
pub struct RoomSession {
    config: SessionConfig,
    user_id: Uuid,
    room: Option<RoomId>,
    member: Option<RoomMember>,

    state: Arc<RwLock<SessionState>>,
    /// Bumped on every teardown; events from older transports are ignored.
    generation: Arc<AtomicU64>,

    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,
    writer: Option<Arc<Mutex<WsWriter>>>,
    reader: Option<WsReader>,
    tasks: Vec<JoinHandle<()>>,

    event_tx: mpsc::Sender<(u64, SessionEvent)>,
    event_rx: mpsc::Receiver<(u64, SessionEvent)>,

    /// Edits captured while reconnecting or awaiting the resync snapshot.
    /// Discarded on resync.
    gap_queue: Vec<EditOperation>,
    resync_pending: bool,
    disposed: bool,
}

impl RoomSession {
    /// Create a session with a fresh user id.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_user_id(config, Uuid::new_v4())
    }

    pub fn with_user_id(config: SessionConfig, user_id: Uuid) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity.max(1));
        Self {
            config,
            user_id,
            room: None,
            member: None,
            state: Arc::new(RwLock::new(SessionState::Disconnected)),
            generation: Arc::new(AtomicU64::new(0)),
            outgoing_tx: None,
            writer: None,
            reader: None,
            tasks: Vec::new(),
            event_tx,
            event_rx,
            gap_queue: Vec::new(),
            resync_pending: false,
            disposed: false,
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    /// Our member record as the relay announced it.
    pub fn member(&self) -> Option<&RoomMember> {
        self.member.as_ref()
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Edits captured during a connection gap and not yet discarded.
    pub fn queued_edits(&self) -> usize {
        self.gap_queue.len()
    }

    /// Open the transport. No-op unless disconnected.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        if self.disposed {
            return Err(SessionError::Disposed);
        }
        if *self.state.read().await != SessionState::Disconnected {
            return Ok(());
        }

        *self.state.write().await = SessionState::Connecting;
        if let Err(e) = self.open_transport().await {
            *self.state.write().await = SessionState::Disconnected;
            return Err(e);
        }
        Ok(())
    }

    /// Join `room`, connecting first if needed.
    ///
    /// Returns once the relay accepted; the snapshot follows as the first
    /// [`SessionEvent::Snapshot`]. A rejection is final for this attempt.
    pub async fn join(&mut self, room: RoomId) -> Result<(), SessionError> {
        match self.state().await {
            SessionState::Joined if self.room.as_ref() == Some(&room) => return Ok(()),
            SessionState::Reconnecting if self.room.as_ref() == Some(&room) => {
                return Err(SessionError::TransportDisconnected)
            }
            SessionState::Joined | SessionState::Reconnecting => self.leave().await,
            _ => {}
        }
        self.connect().await?;

        match self.handshake(&room, false).await {
            Ok(member) => {
                log::info!("Joined room {room} as {}", member.display_name);
                self.member = Some(member);
                self.room = Some(room);
                self.spawn_reader();
                *self.state.write().await = SessionState::Joined;
                Ok(())
            }
            Err(e) => {
                self.teardown().await;
                *self.state.write().await = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Next event from the current transport.
    ///
    /// Events from a transport that was torn down are skipped. Returns
    /// `None` once the session is disposed.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        while !self.disposed {
            let (generation, event) = self.event_rx.recv().await?;
            if let Some(event) = self.accept_event(generation, event) {
                return Some(event);
            }
        }
        None
    }

    /// Non-blocking variant of [`RoomSession::next_event`].
    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        while let Ok((generation, event)) = self.event_rx.try_recv() {
            if let Some(event) = self.accept_event(generation, event) {
                return Some(event);
            }
        }
        None
    }

    fn accept_event(&mut self, generation: u64, event: SessionEvent) -> Option<SessionEvent> {
        if generation != self.generation.load(Ordering::SeqCst) {
            log::trace!("ignoring event from closed transport");
            return None;
        }
        if matches!(event, SessionEvent::Snapshot(_)) && self.resync_pending {
            self.resync_pending = false;
            if !self.gap_queue.is_empty() {
                log::warn!(
                    "discarding {} edits made while disconnected; snapshot wins",
                    self.gap_queue.len()
                );
                self.gap_queue.clear();
            }
        }
        Some(event)
    }

    /// Send a local edit to the room without echo.
    ///
    /// While reconnecting, or rejoined but still waiting for the resync
    /// snapshot, the edit is queued and later discarded by that snapshot.
    /// Outside a room this is [`SessionError::NotJoined`].
    pub async fn send_edit(&mut self, op: EditOperation) -> Result<(), SessionError> {
        match self.state().await {
            SessionState::Joined if self.resync_pending => {
                self.gap_queue.push(op);
                Ok(())
            }
            SessionState::Joined => {
                let room = self.room.clone().ok_or(SessionError::NotJoined)?;
                let msg = SyncMessage::edit(self.user_id, room, &op);
                self.send(&msg).await
            }
            SessionState::Reconnecting => {
                self.gap_queue.push(op);
                Ok(())
            }
            SessionState::Disconnected | SessionState::Connecting => Err(SessionError::NotJoined),
        }
    }

    /// Fire-and-forget presence. Dropped when not joined.
    pub async fn publish(&self, update: &PresenceUpdate) {
        let Some(room) = self.room.clone() else {
            return;
        };
        if self.state().await != SessionState::Joined {
            log::trace!("presence dropped: not joined");
            return;
        }
        if let Err(e) = self.send(&SyncMessage::presence(room, update)).await {
            log::debug!("presence not sent: {e}");
        }
    }

    /// Announce the editor language to the room.
    pub async fn send_language(&self, info: &LanguageInfo) -> Result<(), SessionError> {
        if self.state().await != SessionState::Joined {
            return Err(SessionError::NotJoined);
        }
        let room = self.room.clone().ok_or(SessionError::NotJoined)?;
        self.send(&SyncMessage::language(self.user_id, room, info)).await
    }

    /// Ask the relay for a [`SessionEvent::Pong`].
    pub async fn ping(&self) -> Result<(), SessionError> {
        if self.outgoing_tx.is_none() {
            return Err(SessionError::TransportDisconnected);
        }
        self.send(&SyncMessage::ping(self.user_id)).await
    }

    /// Re-establish a lost connection and rejoin with a resync request.
    ///
    /// Retries per the [`ReconnectPolicy`]. A rejection stops immediately.
    /// Edits queued during the gap are dropped when the snapshot arrives.
    pub async fn reconnect(&mut self) -> Result<(), SessionError> {
        if self.disposed {
            return Err(SessionError::Disposed);
        }
        let room = self.room.clone().ok_or(SessionError::NotJoined)?;
        match self.state().await {
            SessionState::Joined => return Ok(()),
            SessionState::Reconnecting => {}
            SessionState::Disconnected | SessionState::Connecting => {
                return Err(SessionError::NotJoined)
            }
        }

        self.teardown().await;
        let policy = self.config.reconnect.clone();

        for attempt in 0..policy.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(policy.backoff(attempt - 1)).await;
            }
            log::info!("Reconnecting to room {room} (attempt {})", attempt + 1);

            let result = match self.open_transport().await {
                Ok(()) => self.handshake(&room, true).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(member) => {
                    self.member = Some(member);
                    self.resync_pending = true;
                    self.spawn_reader();
                    *self.state.write().await = SessionState::Joined;
                    log::info!("Rejoined room {room}; awaiting snapshot");
                    return Ok(());
                }
                Err(SessionError::JoinRejected(reason)) => {
                    self.teardown().await;
                    self.abandon().await;
                    return Err(SessionError::JoinRejected(reason));
                }
                Err(e) => {
                    log::warn!("Reconnect attempt {} failed: {e}", attempt + 1);
                    self.teardown().await;
                }
            }
        }

        self.abandon().await;
        Err(SessionError::TransportDisconnected)
    }

    /// Leave the room. Pending sends are abandoned and later events from
    /// this room are ignored.
    pub async fn leave(&mut self) {
        // Stop the writer first so queued sends are not flushed.
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.outgoing_tx = None;

        if let (Some(writer), Some(room)) = (self.writer.take(), self.room.clone()) {
            if let Ok(bytes) = SyncMessage::leave(self.user_id, room.clone()).encode() {
                let mut w = writer.lock().await;
                let goodbye = async {
                    w.send(Message::Binary(bytes.into())).await?;
                    w.close().await
                };
                if let Err(e) = tokio::time::timeout(Duration::from_secs(1), goodbye)
                    .await
                    .unwrap_or(Ok(()))
                {
                    log::debug!("leave notice not delivered: {e}");
                }
            }
            log::info!("Left room {room}");
        }

        self.teardown().await;
        self.abandon().await;
    }

    /// Leave and refuse further use.
    pub async fn dispose(&mut self) {
        self.leave().await;
        self.disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    async fn send(&self, msg: &SyncMessage) -> Result<(), SessionError> {
        let tx = self
            .outgoing_tx
            .as_ref()
            .ok_or(SessionError::TransportDisconnected)?;
        tx.send(msg.encode()?)
            .await
            .map_err(|_| SessionError::TransportDisconnected)
    }

    async fn open_transport(&mut self) -> Result<(), SessionError> {
        let timeout = self.config.handshake_timeout;
        let connect = tokio_tungstenite::connect_async(self.config.server_url.as_str());
        let (ws_stream, _) = match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(SessionError::Connect(e.to_string())),
            Err(_) => return Err(SessionError::HandshakeTimeout(timeout)),
        };
        let (ws_writer, ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(self.config.channel_capacity.max(1));
        let ws_writer = Arc::new(Mutex::new(ws_writer));
        let writer = ws_writer.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                let mut w = writer.lock().await;
                if w.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
        }));

        self.outgoing_tx = Some(out_tx);
        self.writer = Some(ws_writer);
        self.reader = Some(ws_reader);
        log::debug!("Transport open to {}", self.config.server_url);
        Ok(())
    }

    /// Send `Join` and wait for the relay's answer.
    async fn handshake(&mut self, room: &RoomId, resync: bool) -> Result<RoomMember, SessionError> {
        let request = JoinRequest {
            display_name: self.config.display_name.clone(),
            authenticated: self.config.authenticated,
            resync,
        };
        self.send(&SyncMessage::join(self.user_id, room.clone(), &request))
            .await?;

        let user_id = self.user_id;
        let timeout = self.config.handshake_timeout;
        let reader = self
            .reader
            .as_mut()
            .ok_or(SessionError::TransportDisconnected)?;

        let answer = async {
            while let Some(frame) = reader.next().await {
                let bytes: Vec<u8> = match frame {
                    Ok(Message::Binary(data)) => data.into(),
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let msg = match SyncMessage::decode(&bytes) {
                    Ok(msg) => msg,
                    Err(e) => {
                        log::warn!("bad frame during join: {e}");
                        continue;
                    }
                };
                match msg.msg_type {
                    MessageType::JoinAccepted if msg.peer_id == user_id => {
                        return msg.member().map_err(SessionError::from);
                    }
                    MessageType::JoinRejected if msg.peer_id == user_id => {
                        return match msg.reject_reason() {
                            Ok(reason) => Err(SessionError::JoinRejected(reason)),
                            Err(e) => Err(SessionError::from(e)),
                        };
                    }
                    other => log::debug!("ignoring {other:?} during join"),
                }
            }
            Err(SessionError::TransportDisconnected)
        };

        tokio::time::timeout(timeout, answer)
            .await
            .map_err(|_| SessionError::HandshakeTimeout(timeout))?
    }

    fn spawn_reader(&mut self) {
        let Some(mut reader) = self.reader.take() else {
            return;
        };
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let generation = self.generation.clone();
        let current = generation.load(Ordering::SeqCst);
        let user_id = self.user_id;

        self.tasks.push(tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        let msg = match SyncMessage::decode(&bytes) {
                            Ok(msg) => msg,
                            Err(e) => {
                                log::warn!("bad frame from relay: {e}");
                                continue;
                            }
                        };
                        if let Some(event) = event_from_message(msg, user_id) {
                            if event_tx.send((current, event)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Checked under the state lock so a concurrent leave wins.
            let mut st = state.write().await;
            if generation.load(Ordering::SeqCst) == current && *st == SessionState::Joined {
                *st = SessionState::Reconnecting;
                drop(st);
                log::warn!("Connection to relay lost");
                let _ = event_tx.send((current, SessionEvent::ConnectionLost)).await;
            }
        }));
    }

    /// Drop the transport and invalidate its queued events.
    async fn teardown(&mut self) {
        {
            let _st = self.state.write().await;
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.outgoing_tx = None;
        self.writer = None;
        self.reader = None;
    }

    /// Forget the room and everything tied to it.
    async fn abandon(&mut self) {
        *self.state.write().await = SessionState::Disconnected;
        self.room = None;
        self.member = None;
        self.resync_pending = false;
        if !self.gap_queue.is_empty() {
            log::warn!("dropping {} unsent edits", self.gap_queue.len());
            self.gap_queue.clear();
        }
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::{CursorPayload, PresencePayload};
    use pairpad_core::{Position, TextRange};

    fn room() -> RoomId {
        "SESS0001".parse().unwrap()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ReconnectPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(700),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(700));
        assert_eq!(policy.backoff(40), Duration::from_millis(700));
    }

    #[test]
    fn test_session_config_new() {
        let config = SessionConfig::new("ws://example:1", "Alice");
        assert_eq!(config.server_url, "ws://example:1");
        assert_eq!(config.display_name, "Alice");
        assert!(!config.authenticated);
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_event_skips_own_edit() {
        let me = Uuid::new_v4();
        let op = EditOperation::encode(TextRange::caret(Position::new(1, 1)), "x");
        assert_eq!(event_from_message(SyncMessage::edit(me, room(), &op), me), None);

        let peer = Uuid::new_v4();
        assert_eq!(
            event_from_message(SyncMessage::edit(peer, room(), &op), me),
            Some(SessionEvent::RemoteEdit { peer_id: peer, op })
        );
    }

    #[test]
    fn test_event_drops_malformed_edit() {
        let peer = Uuid::new_v4();
        let mut msg = SyncMessage::edit(
            peer,
            room(),
            &EditOperation::encode(TextRange::caret(Position::new(1, 1)), ""),
        );
        msg.payload = br#"{"range":{"startLine":1},"text":"x"}"#.to_vec();
        assert_eq!(event_from_message(msg, Uuid::new_v4()), None);
    }

    #[test]
    fn test_event_membership_and_presence() {
        let me = Uuid::new_v4();
        let bob = RoomMember::new(Uuid::new_v4(), "Bob");

        assert_eq!(
            event_from_message(SyncMessage::member_joined(room(), &bob), me),
            Some(SessionEvent::MemberJoined(bob.clone()))
        );
        assert_eq!(
            event_from_message(SyncMessage::member_left(bob.user_id, room()), me),
            Some(SessionEvent::MemberLeft(bob.user_id))
        );

        let update = PresenceUpdate {
            user_id: bob.user_id,
            payload: PresencePayload::Cursor(CursorPayload {
                line: 2,
                column: 1,
                is_first_line_hint: false,
            }),
        };
        assert_eq!(
            event_from_message(SyncMessage::presence(room(), &update), me),
            Some(SessionEvent::Presence(update))
        );
        assert_eq!(event_from_message(SyncMessage::ping(bob.user_id), me), None);
    }

    #[tokio::test]
    async fn test_send_edit_requires_join() {
        let mut session = RoomSession::new(SessionConfig::default());
        let op = EditOperation::encode(TextRange::caret(Position::new(1, 1)), "x");
        assert!(matches!(session.send_edit(op).await, Err(SessionError::NotJoined)));
        assert_eq!(session.state().await, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut session = RoomSession::new(SessionConfig::new(format!("ws://127.0.0.1:{port}"), "A"));
        assert!(session.connect().await.is_err());
        assert_eq!(session.state().await, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_dispose_refuses_connect() {
        let mut session = RoomSession::new(SessionConfig::default());
        session.dispose().await;
        assert!(session.is_disposed());
        assert!(matches!(session.connect().await, Err(SessionError::Disposed)));
        assert_eq!(session.next_event().await, None);
    }

    async fn reconnecting_session() -> RoomSession {
        let mut session = RoomSession::new(SessionConfig::default());
        session.room = Some(room());
        *session.state.write().await = SessionState::Reconnecting;
        session
    }

    #[tokio::test]
    async fn test_join_same_room_while_reconnecting() {
        let mut session = reconnecting_session().await;
        assert!(matches!(
            session.join(room()).await,
            Err(SessionError::TransportDisconnected)
        ));
        assert_eq!(session.state().await, SessionState::Reconnecting);
    }

    #[tokio::test]
    async fn test_edits_held_until_resync_snapshot() {
        let mut session = reconnecting_session().await;
        let op = EditOperation::encode(TextRange::caret(Position::new(1, 1)), "x");
        session.send_edit(op.clone()).await.unwrap();

        // Rejoined, snapshot not yet seen: still queued, nothing on the wire.
        session.resync_pending = true;
        *session.state.write().await = SessionState::Joined;
        session.send_edit(op).await.unwrap();
        assert_eq!(session.queued_edits(), 2);

        let generation = session.generation.load(Ordering::SeqCst);
        let snapshot = SessionEvent::Snapshot(Snapshot {
            text: "fresh".into(),
            members: Vec::new(),
            language: None,
        });
        assert!(session.accept_event(generation, snapshot).is_some());
        assert_eq!(session.queued_edits(), 0);
        assert!(!session.resync_pending);
    }

    #[tokio::test]
    async fn test_reconnect_without_room() {
        let mut session = RoomSession::new(SessionConfig::default());
        assert!(matches!(session.reconnect().await, Err(SessionError::NotJoined)));
    }
}
