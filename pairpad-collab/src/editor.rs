//! Editor-side integration: bridges a [`RoomSession`] with the local
//! document, presence state and decorations.
//!
//! ## Data flow
//!
//! ```text
//!  keystroke ──► CollabEditor::local_edit() ──► Document ──► EditCapture
//!                                                               │ outbox
//!                                    CollabEditor::flush() ◄────┘
//!                                               │
//!                                               ▼
//!                                     RoomSession::send_edit()
//!
//!  RoomSession::next_event() ──► CollabEditor::handle_event()
//!                                     │
//!            ┌────────────────────────┼─────────────────────┐
//!            ▼                        ▼                     ▼
//!      RemoteApplier            PresenceChannel        MemberSet / FollowTarget
//!   (suppressed write)        (cursor, selection,
//!                               scroll-follow)
//! ```
//!
//! Everything here runs on one task. The document and member set are owned
//! by the editor and only change through `&mut self`.

use std::time::Instant;

use pairpad_core::{
    ApplyError, ApplyOutcome, ApplyStats, Document, EditOperation, RemoteApplier, TextRange,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::capture::{CaptureCounters, CaptureStats, EditCapture};
use crate::decoration::{render_decorations, Decoration};
use crate::follow_store::{FollowStore, FollowStoreError};
use crate::member::MemberSet;
use crate::presence::{
    CursorPayload, CursorThrottle, FollowTarget, PresenceChannel, PresenceOutcome, PresencePayload,
    PresenceUpdate, ScrollPayload, SelectionPayload,
};
use crate::protocol::{LanguageInfo, Snapshot};
use crate::room::RoomId;
use crate::session::{RoomSession, SessionError, SessionEvent};

/// What handling one session event changed.
#[derive(Debug, Clone, PartialEq)]
pub enum EditorUpdate {
    /// A remote edit was written to the document.
    Edited(ApplyOutcome),
    /// A remote edit could not be applied and was dropped.
    EditDropped,
    /// Document, members and language replaced from a snapshot.
    Resynced,
    /// Redraw this member's decorations.
    Decorations(Uuid),
    /// Move the local viewport (scroll from the followed member).
    Scroll(ScrollPayload),
    /// Scroll from someone we are not following.
    ScrollIgnored,
    MemberJoined(Uuid),
    MemberLeft { user_id: Uuid, follow_cleared: bool },
    Language(LanguageInfo),
    ConnectionLost,
    Ignored,
}

/// A collaboratively edited document.
pub struct CollabEditor {
    local_id: Uuid,
    document: Document,
    outgoing: mpsc::UnboundedReceiver<EditOperation>,
    capture: CaptureCounters,
    applier: RemoteApplier,
    presence: PresenceChannel,
    members: MemberSet,
    follow: FollowTarget,
    language: Option<LanguageInfo>,
    viewport: ScrollPayload,
    throttle: CursorThrottle,
}

impl CollabEditor {
    pub fn new(local_id: Uuid, text: &str) -> Self {
        let mut document = Document::from_text(text);
        let (capture, outgoing) = EditCapture::new(document.suppression());
        let counters = capture.counters();
        document.observe(capture);

        Self {
            local_id,
            document,
            outgoing,
            capture: counters,
            applier: RemoteApplier::new(),
            presence: PresenceChannel::new(local_id),
            members: MemberSet::new(),
            follow: FollowTarget::none(),
            language: None,
            viewport: ScrollPayload {
                scroll_left: 0.0,
                scroll_top: 0.0,
            },
            throttle: CursorThrottle::default(),
        }
    }

    /// Editor for the user behind `session`, starting empty. The join
    /// snapshot fills it in.
    pub fn for_session(session: &RoomSession) -> Self {
        Self::new(session.user_id(), "")
    }

    // -- local edits -------------------------------------------------------

    /// Apply one local edit. It is captured for sending.
    pub fn local_edit(&mut self, range: TextRange, text: &str) -> Result<(), ApplyError> {
        self.document.edit([(range, text)])
    }

    /// Apply a batch (paste, multi-cursor). Each change is captured as its
    /// own operation, in order.
    pub fn local_edits<'t>(
        &mut self,
        changes: impl IntoIterator<Item = (TextRange, &'t str)>,
    ) -> Result<(), ApplyError> {
        self.document.edit(changes)
    }

    /// Captured operations not yet handed to a session.
    pub fn take_outgoing(&mut self) -> Vec<EditOperation> {
        let mut ops = Vec::new();
        while let Ok(op) = self.outgoing.try_recv() {
            ops.push(op);
        }
        ops
    }

    /// Send every captured operation through `session`, in capture order.
    pub async fn flush(&mut self, session: &mut RoomSession) -> Result<usize, SessionError> {
        let ops = self.take_outgoing();
        let count = ops.len();
        for op in ops {
            session.send_edit(op).await?;
        }
        Ok(count)
    }

    // -- remote events -----------------------------------------------------

    pub fn handle_event(&mut self, event: SessionEvent) -> EditorUpdate {
        match event {
            SessionEvent::RemoteEdit { peer_id, op } => {
                match self.applier.apply(&mut self.document, &op) {
                    Ok(outcome) => EditorUpdate::Edited(outcome),
                    Err(e) => {
                        log::warn!("dropping edit from {peer_id}: {e}");
                        EditorUpdate::EditDropped
                    }
                }
            }
            SessionEvent::Presence(update) => {
                match self.presence.on_receive(&update, &self.follow) {
                    PresenceOutcome::Decorate(user_id) => EditorUpdate::Decorations(user_id),
                    PresenceOutcome::ScrollApplied(scroll) => {
                        self.viewport = scroll;
                        EditorUpdate::Scroll(scroll)
                    }
                    PresenceOutcome::ScrollDiscarded => EditorUpdate::ScrollIgnored,
                    PresenceOutcome::Ignored => EditorUpdate::Ignored,
                }
            }
            SessionEvent::MemberJoined(member) => {
                let user_id = member.user_id;
                log::debug!("{} joined", member.display_name);
                self.members.insert(member);
                EditorUpdate::MemberJoined(user_id)
            }
            SessionEvent::MemberLeft(user_id) => self.member_left(user_id),
            SessionEvent::Snapshot(snapshot) => {
                self.apply_snapshot(snapshot);
                EditorUpdate::Resynced
            }
            SessionEvent::Language { info, .. } => {
                self.language = Some(info.clone());
                EditorUpdate::Language(info)
            }
            SessionEvent::ConnectionLost => EditorUpdate::ConnectionLost,
            SessionEvent::Pong => EditorUpdate::Ignored,
        }
    }

    fn member_left(&mut self, user_id: Uuid) -> EditorUpdate {
        self.members.remove(&user_id);
        self.presence.forget(&user_id);
        let follow_cleared = self.follow.clear_if(&user_id);
        if follow_cleared {
            log::info!("stopped following {user_id}: they left");
        }
        EditorUpdate::MemberLeft {
            user_id,
            follow_cleared,
        }
    }

    fn apply_snapshot(&mut self, snapshot: Snapshot) {
        self.document.replace_all_with_suppression(&snapshot.text);
        // Captured against the replaced text: never sent.
        let stale = self.take_outgoing().len();
        if stale > 0 {
            log::warn!("discarding {stale} unsent local edits; snapshot wins");
        }
        self.members.replace_all(snapshot.members);

        let members = &self.members;
        self.presence.retain(|id| members.contains(id));
        if let Some(target) = self.follow.get() {
            if !self.members.contains(&target) {
                self.follow.unfollow();
            }
        }
        self.language = snapshot.language;
        log::debug!("resynced: {} members", self.members.len());
    }

    // -- presence ----------------------------------------------------------

    /// Local cursor moved. Returns an update when the throttle allows one.
    pub fn move_cursor(&mut self, cursor: CursorPayload, now: Instant) -> Option<PresenceUpdate> {
        self.throttle
            .offer(cursor, now)
            .map(|c| self.presence.local_update(PresencePayload::Cursor(c)))
    }

    /// Release a cursor move the throttle held back.
    pub fn flush_cursor(&mut self, now: Instant) -> Option<PresenceUpdate> {
        self.throttle
            .flush(now)
            .map(|c| self.presence.local_update(PresencePayload::Cursor(c)))
    }

    pub fn select(&self, selection: SelectionPayload) -> PresenceUpdate {
        self.presence.local_update(PresencePayload::Selection(selection))
    }

    /// Local viewport scrolled.
    pub fn scroll(&mut self, scroll: ScrollPayload) -> PresenceUpdate {
        self.viewport = scroll;
        self.presence.local_update(PresencePayload::Scroll(scroll))
    }

    // -- follow ------------------------------------------------------------

    /// Follow a present remote member. Returns `false` otherwise.
    pub fn follow(&mut self, user_id: Uuid) -> bool {
        if user_id == self.local_id || !self.members.contains(&user_id) {
            return false;
        }
        self.follow.follow(user_id);
        true
    }

    pub fn unfollow(&mut self) {
        self.follow.unfollow();
    }

    /// Follow `user_id`, or stop if already following them.
    pub fn toggle_follow(&mut self, user_id: Uuid) {
        if self.follow.is_following(&user_id) {
            self.follow.unfollow();
        } else {
            self.follow(user_id);
        }
    }

    /// Restore the remembered follow target for `room`.
    ///
    /// Takes effect once the member is present; until then it is kept and
    /// cleared by the next snapshot if they are gone.
    pub fn restore_follow(&mut self, store: &FollowStore, room: &RoomId) {
        self.follow = store.load(room);
    }

    pub fn persist_follow(&self, store: &mut FollowStore, room: &RoomId) -> Result<(), FollowStoreError> {
        store.save(room, &self.follow)
    }

    // -- language ----------------------------------------------------------

    /// Change the local language. Send the result with
    /// [`RoomSession::send_language`].
    pub fn set_language(&mut self, language: impl Into<String>, version: Option<String>) -> LanguageInfo {
        let info = LanguageInfo {
            language: language.into(),
            version,
        };
        self.language = Some(info.clone());
        info
    }

    // -- accessors ---------------------------------------------------------

    /// Overlays for every remote member.
    pub fn decorations(&self) -> Vec<Decoration> {
        render_decorations(&self.members, self.presence.latest(), self.local_id)
    }

    pub fn local_id(&self) -> Uuid {
        self.local_id
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn text(&self) -> String {
        self.document.text()
    }

    pub fn members(&self) -> &MemberSet {
        &self.members
    }

    pub fn follow_target(&self) -> FollowTarget {
        self.follow
    }

    pub fn language(&self) -> Option<&LanguageInfo> {
        self.language.as_ref()
    }

    pub fn viewport(&self) -> ScrollPayload {
        self.viewport
    }

    pub fn capture_stats(&self) -> CaptureStats {
        self.capture.snapshot()
    }

    pub fn apply_stats(&self) -> ApplyStats {
        self.applier.stats()
    }
}
