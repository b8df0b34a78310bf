//! Remote cursor and selection overlays.
//!
//! A pure function of the member set and the latest presence per member.
//! It holds no state between calls, so it can be recomputed whenever the
//! editor repaints and always yields the same overlays for the same inputs.

use pairpad_core::{Position, TextRange};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use crate::member::MemberSet;
use crate::presence::MemberPresence;

/// How long a member label stays up before fading when nothing is selected.
pub const LABEL_FADE_DELAY: Duration = Duration::from_millis(2000);

/// Label visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelFade {
    /// Member has an active selection; keep the label.
    Pinned,
    /// Start fading this long after the overlay is drawn.
    FadeAfter(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorOverlay {
    pub position: Position,
    /// Draw the label below the caret (caret is on the first line).
    pub label_below: bool,
}

/// Everything needed to draw one remote member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoration {
    pub user_id: Uuid,
    pub label: String,
    pub color: &'static str,
    pub cursor: Option<CursorOverlay>,
    pub selection: Option<TextRange>,
    pub fade: LabelFade,
}

/// Build overlays for every remote member with known presence, ordered
/// by user id. Members with nothing to draw and `local_user_id` are
/// skipped.
pub fn render_decorations(
    members: &MemberSet,
    presence: &BTreeMap<Uuid, MemberPresence>,
    local_user_id: Uuid,
) -> Vec<Decoration> {
    members
        .iter()
        .filter(|m| m.user_id != local_user_id)
        .filter_map(|member| {
            let state = presence.get(&member.user_id)?;
            let cursor = state.cursor.map(|c| CursorOverlay {
                position: Position::new(c.line, c.column),
                label_below: c.is_first_line_hint,
            });
            let active_selection = state.selection.filter(|s| s.has_selection);
            if cursor.is_none() && active_selection.is_none() {
                return None;
            }
            Some(Decoration {
                user_id: member.user_id,
                label: member.display_name.clone(),
                color: member.color(),
                cursor,
                selection: active_selection.map(|s| s.range),
                fade: if active_selection.is_some() {
                    LabelFade::Pinned
                } else {
                    LabelFade::FadeAfter(LABEL_FADE_DELAY)
                },
            })
        })
        .collect()
}
