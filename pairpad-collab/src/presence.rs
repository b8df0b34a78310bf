//! Presence: cursor, selection and scroll signals for each member.
//!
//! Presence rides the same room channel as edits but never touches the
//! document. The channel keeps the latest cursor/selection per member for
//! decoration rendering and applies scroll updates only from the member the
//! local user is following.
//!
//! ```text
//! local cursor move ──► CursorThrottle (caller policy) ──► RoomSession::publish
//!
//! remote PresenceUpdate ──► PresenceChannel::on_receive
//!                                 │
//!              ┌──────────────────┼───────────────────┐
//!              ▼                  ▼                   ▼
//!        cursor/selection   scroll from followed   scroll from anyone else
//!        → Decorate         → ScrollApplied         → ScrollDiscarded
//! ```

use pairpad_core::TextRange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::protocol::ProtocolError;

/// Minimum spacing between local cursor broadcasts (~30fps).
pub const DEFAULT_CURSOR_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPayload {
    pub line: u32,
    pub column: u32,
    /// Cursor sits on the first visible line; draw the label below it.
    pub is_first_line_hint: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionPayload {
    pub range: TextRange,
    /// Keeps the member label pinned instead of fading out.
    pub has_selection: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollPayload {
    pub scroll_left: f32,
    pub scroll_top: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresenceKind {
    Cursor,
    Selection,
    Scroll,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PresencePayload {
    Cursor(CursorPayload),
    Selection(SelectionPayload),
    Scroll(ScrollPayload),
}

/// One presence signal from one member.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub user_id: Uuid,
    pub payload: PresencePayload,
}

impl PresenceUpdate {
    pub fn kind(&self) -> PresenceKind {
        match self.payload {
            PresencePayload::Cursor(_) => PresenceKind::Cursor,
            PresencePayload::Selection(_) => PresenceKind::Selection,
            PresencePayload::Scroll(_) => PresenceKind::Scroll,
        }
    }

    /// Encode to binary (bincode).
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Decode from binary.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (update, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(update)
    }
}

/// The member whose scroll position the local viewport mirrors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowTarget(Option<Uuid>);

impl FollowTarget {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn get(&self) -> Option<Uuid> {
        self.0
    }

    pub fn is_following(&self, user_id: &Uuid) -> bool {
        self.0.as_ref() == Some(user_id)
    }

    pub fn follow(&mut self, user_id: Uuid) {
        self.0 = Some(user_id);
    }

    pub fn unfollow(&mut self) {
        self.0 = None;
    }

    /// Follow `user_id`, or stop if already following them.
    pub fn toggle(&mut self, user_id: Uuid) {
        if self.is_following(&user_id) {
            self.0 = None;
        } else {
            self.0 = Some(user_id);
        }
    }

    /// Clear if currently following `user_id`. Returns whether it cleared.
    pub fn clear_if(&mut self, user_id: &Uuid) -> bool {
        if self.is_following(user_id) {
            self.0 = None;
            true
        } else {
            false
        }
    }
}

impl From<Option<Uuid>> for FollowTarget {
    fn from(target: Option<Uuid>) -> Self {
        Self(target)
    }
}

/// Latest known presence of one remote member.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemberPresence {
    pub cursor: Option<CursorPayload>,
    pub selection: Option<SelectionPayload>,
}

/// What receiving an update did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PresenceOutcome {
    /// Cursor/selection stored; decorations for this member changed.
    Decorate(Uuid),
    /// Scroll from the followed member; move the local viewport.
    ScrollApplied(ScrollPayload),
    /// Scroll from a member we are not following.
    ScrollDiscarded,
    /// Our own update came back.
    Ignored,
}

/// Tracks remote presence for one room.
#[derive(Debug, Clone)]
pub struct PresenceChannel {
    local_user_id: Uuid,
    latest: BTreeMap<Uuid, MemberPresence>,
}

impl PresenceChannel {
    pub fn new(local_user_id: Uuid) -> Self {
        Self {
            local_user_id,
            latest: BTreeMap::new(),
        }
    }

    /// Stamp a local payload with our user id, ready to publish.
    pub fn local_update(&self, payload: PresencePayload) -> PresenceUpdate {
        PresenceUpdate {
            user_id: self.local_user_id,
            payload,
        }
    }

    /// Handle a presence update from the room.
    pub fn on_receive(&mut self, update: &PresenceUpdate, follow: &FollowTarget) -> PresenceOutcome {
        if update.user_id == self.local_user_id {
            return PresenceOutcome::Ignored;
        }

        match update.payload {
            PresencePayload::Cursor(cursor) => {
                self.latest.entry(update.user_id).or_default().cursor = Some(cursor);
                log::trace!("cursor from {} at {}:{}", update.user_id, cursor.line, cursor.column);
                PresenceOutcome::Decorate(update.user_id)
            }
            PresencePayload::Selection(selection) => {
                self.latest.entry(update.user_id).or_default().selection = Some(selection);
                PresenceOutcome::Decorate(update.user_id)
            }
            PresencePayload::Scroll(scroll) => {
                if follow.is_following(&update.user_id) {
                    PresenceOutcome::ScrollApplied(scroll)
                } else {
                    PresenceOutcome::ScrollDiscarded
                }
            }
        }
    }

    /// Drop a member's presence (they left).
    pub fn forget(&mut self, user_id: &Uuid) {
        self.latest.remove(user_id);
    }

    /// Drop everything except members still in `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&Uuid) -> bool) {
        self.latest.retain(|id, _| keep(id));
    }

    pub fn latest(&self) -> &BTreeMap<Uuid, MemberPresence> {
        &self.latest
    }

    pub fn local_user_id(&self) -> Uuid {
        self.local_user_id
    }
}

/// Coalesces rapid local cursor moves.
///
/// The first move goes out immediately; moves inside the interval replace
/// a single pending value that [`CursorThrottle::flush`] releases later.
#[derive(Debug, Clone)]
pub struct CursorThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
    pending: Option<CursorPayload>,
}

impl CursorThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            pending: None,
        }
    }

    /// Offer a new cursor position. Returns it if it may be sent now.
    pub fn offer(&mut self, cursor: CursorPayload, now: Instant) -> Option<CursorPayload> {
        if self.is_due(now) {
            self.last_sent = Some(now);
            self.pending = None;
            Some(cursor)
        } else {
            self.pending = Some(cursor);
            None
        }
    }

    /// Release the pending position once the interval has passed.
    pub fn flush(&mut self, now: Instant) -> Option<CursorPayload> {
        if self.pending.is_some() && self.is_due(now) {
            self.last_sent = Some(now);
            self.pending.take()
        } else {
            None
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn is_due(&self, now: Instant) -> bool {
        self.last_sent
            .map_or(true, |t| now.saturating_duration_since(t) >= self.interval)
    }
}

impl Default for CursorThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_CURSOR_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairpad_core::Position;

    fn scroll(user_id: Uuid) -> PresenceUpdate {
        PresenceUpdate {
            user_id,
            payload: PresencePayload::Scroll(ScrollPayload {
                scroll_left: 0.0,
                scroll_top: 480.0,
            }),
        }
    }

    fn cursor(user_id: Uuid, line: u32, column: u32) -> PresenceUpdate {
        PresenceUpdate {
            user_id,
            payload: PresencePayload::Cursor(CursorPayload {
                line,
                column,
                is_first_line_hint: line == 1,
            }),
        }
    }

    #[test]
    fn test_scroll_discarded_when_following_someone_else() {
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
        let mut channel = PresenceChannel::new(Uuid::new_v4());
        let mut follow = FollowTarget::none();
        follow.follow(u1);

        assert_eq!(channel.on_receive(&scroll(u2), &follow), PresenceOutcome::ScrollDiscarded);
    }

    #[test]
    fn test_scroll_applied_when_following_sender() {
        let u2 = Uuid::new_v4();
        let mut channel = PresenceChannel::new(Uuid::new_v4());
        let mut follow = FollowTarget::none();
        follow.follow(u2);

        match channel.on_receive(&scroll(u2), &follow) {
            PresenceOutcome::ScrollApplied(s) => assert_eq!(s.scroll_top, 480.0),
            other => panic!("expected ScrollApplied, got {other:?}"),
        }
    }

    #[test]
    fn test_scroll_discarded_when_not_following() {
        let mut channel = PresenceChannel::new(Uuid::new_v4());
        let outcome = channel.on_receive(&scroll(Uuid::new_v4()), &FollowTarget::none());
        assert_eq!(outcome, PresenceOutcome::ScrollDiscarded);
    }

    #[test]
    fn test_cursor_and_selection_stored() {
        let peer = Uuid::new_v4();
        let mut channel = PresenceChannel::new(Uuid::new_v4());
        let follow = FollowTarget::none();

        assert_eq!(channel.on_receive(&cursor(peer, 3, 7), &follow), PresenceOutcome::Decorate(peer));
        let selection = PresenceUpdate {
            user_id: peer,
            payload: PresencePayload::Selection(SelectionPayload {
                range: TextRange::new(Position::new(3, 1), Position::new(3, 7)),
                has_selection: true,
            }),
        };
        channel.on_receive(&selection, &follow);

        let latest = channel.latest()[&peer];
        assert_eq!(latest.cursor.unwrap().column, 7);
        assert!(latest.selection.unwrap().has_selection);

        channel.forget(&peer);
        assert!(channel.latest().is_empty());
    }

    #[test]
    fn test_own_update_ignored() {
        let me = Uuid::new_v4();
        let mut channel = PresenceChannel::new(me);
        assert_eq!(channel.on_receive(&cursor(me, 1, 1), &FollowTarget::none()), PresenceOutcome::Ignored);
        assert!(channel.latest().is_empty());
    }

    #[test]
    fn test_presence_update_roundtrip_keeps_flags() {
        let update = PresenceUpdate {
            user_id: Uuid::new_v4(),
            payload: PresencePayload::Selection(SelectionPayload {
                range: TextRange::new(Position::new(1, 1), Position::new(2, 4)),
                has_selection: false,
            }),
        };
        let decoded = PresenceUpdate::decode(&update.encode().unwrap()).unwrap();
        assert_eq!(decoded, update);
        assert_eq!(decoded.kind(), PresenceKind::Selection);
    }

    #[test]
    fn test_follow_target_toggle_and_clear() {
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
        let mut follow = FollowTarget::none();

        follow.toggle(u1);
        assert!(follow.is_following(&u1));
        follow.toggle(u1);
        assert_eq!(follow.get(), None);

        follow.follow(u1);
        assert!(!follow.clear_if(&u2));
        assert!(follow.clear_if(&u1));
        assert_eq!(follow.get(), None);
    }

    #[test]
    fn test_cursor_throttle_coalesces() {
        let mut throttle = CursorThrottle::new(Duration::from_millis(50));
        let t0 = Instant::now();
        let c = |col| CursorPayload { line: 1, column: col, is_first_line_hint: true };

        assert_eq!(throttle.offer(c(1), t0), Some(c(1)));
        assert_eq!(throttle.offer(c(2), t0 + Duration::from_millis(10)), None);
        assert_eq!(throttle.offer(c(3), t0 + Duration::from_millis(20)), None);
        assert!(throttle.has_pending());

        assert_eq!(throttle.flush(t0 + Duration::from_millis(30)), None);
        assert_eq!(throttle.flush(t0 + Duration::from_millis(60)), Some(c(3)));
        assert!(!throttle.has_pending());
    }
}
