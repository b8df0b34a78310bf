//! Binary envelope for the room channel.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬────────────────┬──────────┐
//! │ msg_type │ peer_id   │ room (option)  │ payload  │
//! │ 1 byte   │ 16 bytes  │ 1 + 9 bytes    │ variable │
//! └──────────┴───────────┴────────────────┴──────────┘
//! ```
//!
//! `Edit` payloads carry the JSON wire form of [`EditOperation`] so that
//! operation decoding rules are the same for every client. All other
//! payloads are bincode.

use pairpad_core::{EditOperation, OperationError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::member::RoomMember;
use crate::presence::PresenceUpdate;
use crate::room::RoomId;

/// Message types for the room channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Client asks to join a room
    Join = 1,
    /// Join succeeded; payload is the caller's member record
    JoinAccepted = 2,
    /// Join refused; payload is the reason
    JoinRejected = 3,
    /// Range-replace edit
    Edit = 4,
    /// Cursor/selection/scroll signal
    Presence = 5,
    /// Another member joined
    MemberJoined = 6,
    /// A member left
    MemberLeft = 7,
    /// Full document + member list
    Snapshot = 8,
    /// Editor language/version changed
    Language = 9,
    /// Client is leaving
    Leave = 10,
    /// Heartbeat ping
    Ping = 11,
    /// Heartbeat pong
    Pong = 12,
}

/// `Join` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub display_name: String,
    /// Identity provider said yes. Token contents are never inspected.
    pub authenticated: bool,
    /// Rejoin after a connection gap; a snapshot is expected.
    pub resync: bool,
}

/// Why a join was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinRejectReason {
    RoomFull,
    RoomNotFound,
    Unauthenticated,
}

impl fmt::Display for JoinRejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoomFull => write!(f, "room is full"),
            Self::RoomNotFound => write!(f, "room not found"),
            Self::Unauthenticated => write!(f, "sign-in required"),
        }
    }
}

/// Editor language and optional runtime version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub language: String,
    pub version: Option<String>,
}

/// Resync payload: the room's current text and members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub text: String,
    pub members: Vec<RoomMember>,
    pub language: Option<LanguageInfo>,
}

/// Top-level protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    /// Sender, or the member the message is about
    pub peer_id: Uuid,
    pub room: Option<RoomId>,
    pub payload: Vec<u8>,
}

impl SyncMessage {
    fn new(msg_type: MessageType, peer_id: Uuid, room: Option<RoomId>, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            peer_id,
            room,
            payload,
        }
    }

    /// Create a join request.
    pub fn join(peer_id: Uuid, room: RoomId, request: &JoinRequest) -> Self {
        Self::new(MessageType::Join, peer_id, Some(room), encode_payload(request))
    }

    /// Create a join acceptance carrying the member record.
    pub fn join_accepted(room: RoomId, member: &RoomMember) -> Self {
        Self::new(
            MessageType::JoinAccepted,
            member.user_id,
            Some(room),
            encode_payload(member),
        )
    }

    /// Create a join rejection.
    pub fn join_rejected(peer_id: Uuid, room: RoomId, reason: JoinRejectReason) -> Self {
        Self::new(MessageType::JoinRejected, peer_id, Some(room), encode_payload(&reason))
    }

    /// Create an edit message. The payload is the operation's JSON form.
    pub fn edit(peer_id: Uuid, room: RoomId, op: &EditOperation) -> Self {
        Self::new(MessageType::Edit, peer_id, Some(room), op.to_wire())
    }

    /// Create a presence message.
    pub fn presence(room: RoomId, update: &PresenceUpdate) -> Self {
        Self::new(MessageType::Presence, update.user_id, Some(room), encode_payload(update))
    }

    /// Create a member-joined notification.
    pub fn member_joined(room: RoomId, member: &RoomMember) -> Self {
        Self::new(
            MessageType::MemberJoined,
            member.user_id,
            Some(room),
            encode_payload(member),
        )
    }

    /// Create a member-left notification.
    pub fn member_left(peer_id: Uuid, room: RoomId) -> Self {
        Self::new(MessageType::MemberLeft, peer_id, Some(room), Vec::new())
    }

    /// Create a resync snapshot.
    pub fn snapshot(room: RoomId, snapshot: &Snapshot) -> Self {
        Self::new(MessageType::Snapshot, Uuid::nil(), Some(room), encode_payload(snapshot))
    }

    /// Create a language change.
    pub fn language(peer_id: Uuid, room: RoomId, info: &LanguageInfo) -> Self {
        Self::new(MessageType::Language, peer_id, Some(room), encode_payload(info))
    }

    /// Create a leave notice.
    pub fn leave(peer_id: Uuid, room: RoomId) -> Self {
        Self::new(MessageType::Leave, peer_id, Some(room), Vec::new())
    }

    /// Create a ping message.
    pub fn ping(peer_id: Uuid) -> Self {
        Self::new(MessageType::Ping, peer_id, None, Vec::new())
    }

    /// Create a pong message.
    pub fn pong(peer_id: Uuid) -> Self {
        Self::new(MessageType::Pong, peer_id, None, Vec::new())
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(msg)
    }

    pub fn join_request(&self) -> Result<JoinRequest, ProtocolError> {
        self.decode_payload(MessageType::Join)
    }

    /// Member record from `JoinAccepted` or `MemberJoined`.
    pub fn member(&self) -> Result<RoomMember, ProtocolError> {
        match self.msg_type {
            MessageType::JoinAccepted | MessageType::MemberJoined => {
                decode_payload_bytes(&self.payload)
            }
            found => Err(ProtocolError::InvalidMessageType {
                expected: MessageType::MemberJoined,
                found,
            }),
        }
    }

    pub fn reject_reason(&self) -> Result<JoinRejectReason, ProtocolError> {
        self.decode_payload(MessageType::JoinRejected)
    }

    /// Parse the edit payload. Malformed operations are an error here and
    /// are dropped by whoever receives them.
    pub fn edit_operation(&self) -> Result<EditOperation, ProtocolError> {
        self.expect(MessageType::Edit)?;
        Ok(EditOperation::decode(&self.payload)?)
    }

    pub fn presence_update(&self) -> Result<PresenceUpdate, ProtocolError> {
        self.expect(MessageType::Presence)?;
        PresenceUpdate::decode(&self.payload)
    }

    pub fn snapshot_payload(&self) -> Result<Snapshot, ProtocolError> {
        self.decode_payload(MessageType::Snapshot)
    }

    pub fn language_info(&self) -> Result<LanguageInfo, ProtocolError> {
        self.decode_payload(MessageType::Language)
    }

    fn expect(&self, expected: MessageType) -> Result<(), ProtocolError> {
        if self.msg_type != expected {
            return Err(ProtocolError::InvalidMessageType {
                expected,
                found: self.msg_type,
            });
        }
        Ok(())
    }

    fn decode_payload<T: DeserializeOwned>(&self, expected: MessageType) -> Result<T, ProtocolError> {
        self.expect(expected)?;
        decode_payload_bytes(&self.payload)
    }
}

fn encode_payload<T: Serialize>(value: &T) -> Vec<u8> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).unwrap_or_default()
}

fn decode_payload_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
    Ok(value)
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("expected {expected:?} message, got {found:?}")]
    InvalidMessageType {
        expected: MessageType,
        found: MessageType,
    },
    #[error(transparent)]
    Malformed(#[from] OperationError),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("connection timeout")]
    Timeout,
}
