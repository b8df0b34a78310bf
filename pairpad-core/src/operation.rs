//! Edit operations: a single range-replace text mutation.
//!
//! Wire format (JSON, shared with browser clients):
//! ```text
//! { "range": { "startLine": 1, "startCol": 1, "endLine": 1, "endCol": 1 },
//!   "text": "X" }
//! ```
//!
//! An operation is computed against the sender's document at emission
//! time. There is no version counter: receivers apply operations in
//! delivery order.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buffer::Position;

/// Operation decode errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("malformed operation: {0}")]
    MalformedOperation(String),
}

/// Closed-open character range, 1-based lines and columns.
///
/// Invariant: `start <= end` in (line, column) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextRange {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl TextRange {
    pub fn new(start: Position, end: Position) -> Self {
        Self {
            start_line: start.line,
            start_col: start.column,
            end_line: end.line,
            end_col: end.column,
        }
    }

    /// Empty range at a caret position (pure insertion).
    pub fn caret(pos: Position) -> Self {
        Self::new(pos, pos)
    }

    pub fn start(&self) -> Position {
        Position::new(self.start_line, self.start_col)
    }

    pub fn end(&self) -> Position {
        Position::new(self.end_line, self.end_col)
    }

    pub fn is_empty(&self) -> bool {
        self.start() == self.end()
    }

    /// Start does not come after end.
    pub fn is_ordered(&self) -> bool {
        self.start() <= self.end()
    }

    fn check(&self) -> Result<(), OperationError> {
        if self.start_line == 0 || self.start_col == 0 || self.end_line == 0 || self.end_col == 0 {
            return Err(OperationError::MalformedOperation(
                "positions are 1-based".into(),
            ));
        }
        if !self.is_ordered() {
            return Err(OperationError::MalformedOperation(format!(
                "range start {}:{} is after end {}:{}",
                self.start_line, self.start_col, self.end_line, self.end_col
            )));
        }
        Ok(())
    }
}

/// "Replace `range` with `text`."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOperation {
    pub range: TextRange,
    pub text: String,
}

impl EditOperation {
    /// Package a mutation observed against the current document.
    pub fn encode(range_before: TextRange, text: impl Into<String>) -> Self {
        Self {
            range: range_before,
            text: text.into(),
        }
    }

    /// Serialize to the JSON wire form.
    pub fn to_wire(&self) -> Vec<u8> {
        // Integers and a string: serialization cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parse the JSON wire form.
    ///
    /// Missing or non-integer range fields, zero positions and a start
    /// after the end all fail with `MalformedOperation`.
    pub fn decode(bytes: &[u8]) -> Result<Self, OperationError> {
        let op: EditOperation = serde_json::from_slice(bytes)
            .map_err(|e| OperationError::MalformedOperation(e.to_string()))?;
        op.range.check()?;
        Ok(op)
    }
}
