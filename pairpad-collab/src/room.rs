//! Room identifiers.
//!
//! A room code is 8 ASCII alphanumerics, shown to users as `XXXX-XXXX`.
//! Parsing accepts either form and normalises to upper case.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const ROOM_ID_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomIdError {
    #[error("room code must have 8 characters, got {0}")]
    Length(usize),
    #[error("room code contains invalid character {0:?}")]
    InvalidChar(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Raw 8-character code, no dash.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RoomId {
    type Err = RoomIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let compact: String = match trimmed.char_indices().nth(4) {
            Some((i, '-')) => format!("{}{}", &trimmed[..i], &trimmed[i + 1..]),
            _ => trimmed.to_string(),
        };
        if let Some(bad) = compact.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(RoomIdError::InvalidChar(bad));
        }
        if compact.len() != ROOM_ID_LEN {
            return Err(RoomIdError::Length(compact.len()));
        }
        Ok(Self(compact.to_ascii_uppercase()))
    }
}

impl TryFrom<String> for RoomId {
    type Error = RoomIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", &self.0[..4], &self.0[4..])
    }
}
