//! # pairpad-collab — room channel for collaborative editing
//!
//! Carries edits and presence between the members of a room over
//! WebSocket, and ties the document model in `pairpad-core` to it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     WebSocket      ┌─────────────┐
//! │ RoomSession  │ ◄─────────────────► │ SyncServer  │
//! │ (per user)   │     Binary Proto    │ (relay)     │
//! └──────┬───────┘                     └──────┬──────┘
//!        │ SessionEvent                      │
//!        ▼                                   ▼
//! ┌──────────────┐                     ┌─────────────┐
//! │ CollabEditor │                     │ TextBuffer  │
//! │ Document +   │                     │ (per room)  │
//! │ presence     │                     └──────┬──────┘
//! └──────────────┘                            │
//!                                     ┌───────┴───────┐
//!                                     │ BroadcastGroup│
//!                                     │ (fan-out)     │
//!                                     └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — binary envelope (bincode-encoded `SyncMessage`)
//! - [`room`] — `XXXX-XXXX` room codes
//! - [`member`] — room members and their colours
//! - [`capture`] — local edit capture with echo suppression
//! - [`presence`] — cursor, selection, scroll-follow
//! - [`follow_store`] — follow target persisted per room
//! - [`decoration`] — remote cursor/selection overlays
//! - [`session`] — client connection state machine
//! - [`editor`] — glue between a session and a document
//! - [`broadcast`] — room fan-out
//! - [`server`] — WebSocket relay
//! - [`execution`] — external code-execution client

pub mod broadcast;
pub mod capture;
pub mod decoration;
pub mod editor;
pub mod execution;
pub mod follow_store;
pub mod member;
pub mod presence;
pub mod protocol;
pub mod room;
pub mod server;
pub mod session;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats, Frame};
pub use capture::{CaptureCounters, CaptureStats, EditCapture};
pub use decoration::{render_decorations, CursorOverlay, Decoration, LabelFade, LABEL_FADE_DELAY};
pub use editor::{CollabEditor, EditorUpdate};
pub use execution::{
    ExecutionOutput, ExecutionRequest, ExecutionResult, Executor, ExecutorConfig, HttpExecutor,
    ResultKind,
};
pub use follow_store::{FollowStore, FollowStoreError};
pub use member::{color_index, MemberSet, RoomMember, PALETTE};
pub use presence::{
    CursorPayload, CursorThrottle, FollowTarget, MemberPresence, PresenceChannel, PresenceKind,
    PresenceOutcome, PresencePayload, PresenceUpdate, ScrollPayload, SelectionPayload,
};
pub use protocol::{
    JoinRejectReason, JoinRequest, LanguageInfo, MessageType, ProtocolError, Snapshot, SyncMessage,
};
pub use room::{RoomId, RoomIdError};
pub use server::{RelayRoom, RoomManager, ServerConfig, ServerStats, SyncServer};
pub use session::{
    ReconnectPolicy, RoomSession, SessionConfig, SessionError, SessionEvent, SessionState,
};
