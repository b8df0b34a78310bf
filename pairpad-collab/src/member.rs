//! Room membership and member colours.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Cursor/selection colours, indexed by [`color_index`].
pub const PALETTE: [&str; 8] = [
    "#f87171", "#fb923c", "#facc15", "#4ade80", "#22d3ee", "#60a5fa", "#a78bfa", "#f472b6",
];

/// 31-multiplier string hash over UTF-16 code units, wrapping at 32 bits.
///
/// Matches what browser clients compute from `charCodeAt`, so a name gets
/// the same colour everywhere.
pub fn name_hash(name: &str) -> i32 {
    name.encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// Palette slot for a display name. Different names may collide.
pub fn color_index(name: &str) -> usize {
    name_hash(name).unsigned_abs() as usize % PALETTE.len()
}

/// A participant in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMember {
    pub user_id: Uuid,
    pub display_name: String,
    pub color_index: usize,
}

impl RoomMember {
    pub fn new(user_id: Uuid, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        let color_index = color_index(&display_name);
        Self {
            user_id,
            display_name,
            color_index,
        }
    }

    pub fn color(&self) -> &'static str {
        PALETTE[self.color_index % PALETTE.len()]
    }
}

/// The current member set, ordered by user id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberSet {
    members: BTreeMap<Uuid, RoomMember>,
}

impl MemberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a member. Returns `true` if the member is new.
    pub fn insert(&mut self, member: RoomMember) -> bool {
        self.members.insert(member.user_id, member).is_none()
    }

    pub fn remove(&mut self, user_id: &Uuid) -> Option<RoomMember> {
        self.members.remove(user_id)
    }

    /// Replace the whole set (resync snapshot).
    pub fn replace_all(&mut self, members: impl IntoIterator<Item = RoomMember>) {
        self.members = members.into_iter().map(|m| (m.user_id, m)).collect();
    }

    pub fn get(&self, user_id: &Uuid) -> Option<&RoomMember> {
        self.members.get(user_id)
    }

    pub fn contains(&self, user_id: &Uuid) -> bool {
        self.members.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoomMember> {
        self.members.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_hash_known_values() {
        assert_eq!(name_hash(""), 0);
        assert_eq!(name_hash("a"), 97);
        assert_eq!(name_hash("ab"), 97 * 31 + 98);
        // Same as Java's "hello".hashCode().
        assert_eq!(name_hash("hello"), 99162322);
    }

    #[test]
    fn test_name_hash_wraps() {
        // Long names overflow 32 bits without panicking.
        let long = "x".repeat(1_000);
        let _ = name_hash(&long);
        assert!(color_index(&long) < PALETTE.len());
    }

    #[test]
    fn test_color_stable_for_name() {
        let a = RoomMember::new(Uuid::new_v4(), "Alice");
        let b = RoomMember::new(Uuid::new_v4(), "Alice");
        assert_eq!(a.color_index, b.color_index);
        assert_eq!(a.color(), b.color());
    }

    #[test]
    fn test_color_non_ascii_name() {
        let m = RoomMember::new(Uuid::new_v4(), "Zoë 👩‍💻");
        assert!(m.color_index < PALETTE.len());
    }

    #[test]
    fn test_member_set() {
        let mut set = MemberSet::new();
        let alice = RoomMember::new(Uuid::new_v4(), "Alice");
        let bob = RoomMember::new(Uuid::new_v4(), "Bob");

        assert!(set.insert(alice.clone()));
        assert!(!set.insert(alice.clone()));
        assert!(set.insert(bob.clone()));
        assert_eq!(set.len(), 2);

        assert_eq!(set.remove(&alice.user_id), Some(alice.clone()));
        assert!(!set.contains(&alice.user_id));

        set.replace_all(vec![alice.clone()]);
        assert_eq!(set.len(), 1);
        assert!(set.contains(&alice.user_id));
        assert!(!set.contains(&bob.user_id));
    }
}
