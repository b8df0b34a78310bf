//! Fan-out of room traffic to every member but the sender.
//!
//! Uses a tokio broadcast channel for O(1) send to all subscribers. Frames
//! carry their sender so each connection can skip its own traffic without
//! decoding the payload. Each member's receiver buffers up to `capacity`
//! frames; a member that falls further behind loses the oldest frames.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::member::RoomMember;
use crate::protocol::{JoinRejectReason, ProtocolError, SyncMessage};

/// A pre-encoded message and who sent it.
#[derive(Debug)]
pub struct Frame {
    pub sender: Uuid,
    pub bytes: Vec<u8>,
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub active_members: usize,
}

/// A member and the connection that holds their seat.
#[derive(Debug, Clone)]
struct Seat {
    member: RoomMember,
    connection: Uuid,
}

/// A broadcast group for a single room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Frame>>,
    members: RwLock<HashMap<Uuid, Seat>>,
    capacity: usize,
    messages_sent: AtomicU64,
}

impl BroadcastGroup {
    /// Create a new group buffering up to `capacity` frames per member.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            members: RwLock::new(HashMap::new()),
            capacity,
            messages_sent: AtomicU64::new(0),
        }
    }

    /// Add a member unless the room already holds `max_members`.
    ///
    /// The check and the insert happen under one lock. Re-adding an
    /// existing member (rejoin) does not count against the limit and moves
    /// their seat to `connection`.
    pub async fn try_add_member(
        &self,
        member: RoomMember,
        connection: Uuid,
        max_members: usize,
    ) -> Result<broadcast::Receiver<Arc<Frame>>, JoinRejectReason> {
        let mut members = self.members.write().await;
        if !members.contains_key(&member.user_id) && members.len() >= max_members {
            return Err(JoinRejectReason::RoomFull);
        }
        members.insert(member.user_id, Seat { member, connection });
        Ok(self.sender.subscribe())
    }

    /// Remove a member if `connection` still holds their seat.
    ///
    /// A stale connection closing after its member rejoined elsewhere
    /// removes nothing.
    pub async fn remove_member(&self, user_id: &Uuid, connection: Uuid) -> Option<RoomMember> {
        let mut members = self.members.write().await;
        match members.get(user_id) {
            Some(seat) if seat.connection == connection => {
                members.remove(user_id).map(|seat| seat.member)
            }
            _ => None,
        }
    }

    /// Encode and send `msg` to every subscriber.
    ///
    /// Returns the number of receivers; the sender's own connection skips it.
    pub fn broadcast(&self, msg: &SyncMessage) -> Result<usize, ProtocolError> {
        let bytes = msg.encode()?;
        Ok(self.broadcast_raw(msg.peer_id, bytes))
    }

    /// Send already-encoded bytes.
    pub fn broadcast_raw(&self, sender: Uuid, bytes: Vec<u8>) -> usize {
        let count = self
            .sender
            .send(Arc::new(Frame { sender, bytes }))
            .unwrap_or(0);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    /// Current members, ordered by user id.
    pub async fn members(&self) -> Vec<RoomMember> {
        let mut members: Vec<RoomMember> = self
            .members
            .read()
            .await
            .values()
            .map(|seat| seat.member.clone())
            .collect();
        members.sort_by_key(|m| m.user_id);
        members
    }

    pub async fn has_member(&self, user_id: &Uuid) -> bool {
        self.members.read().await.contains_key(user_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            active_members: self.members.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
