//! Line-addressed text buffer.
//!
//! Positions are 1-based: line 1 is the first line and column 1 sits
//! before the first character of a line. Column `len + 1` addresses the
//! end of the line. Columns count `char`s, not bytes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A caret position in the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// The editable text, stored as one `String` per line (without `\n`).
///
/// Invariant: there is always at least one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBuffer {
    lines: Vec<String>,
}

impl TextBuffer {
    /// Create an empty buffer (one empty line).
    pub fn new() -> Self {
        Self {
            lines: vec![String::new()],
        }
    }

    /// Create a buffer holding `text`.
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: split_lines(text),
        }
    }

    /// Full contents, lines joined with `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Replace the whole contents.
    pub fn set_text(&mut self, text: &str) {
        self.lines = split_lines(text);
    }

    pub fn line_count(&self) -> u32 {
        self.lines.len() as u32
    }

    /// Contents of a 1-based line.
    pub fn line(&self, line: u32) -> Option<&str> {
        let idx = (line as usize).checked_sub(1)?;
        self.lines.get(idx).map(String::as_str)
    }

    /// Length of a 1-based line in chars.
    pub fn line_len(&self, line: u32) -> Option<u32> {
        self.line(line).map(|l| l.chars().count() as u32)
    }

    /// Position just past the last character.
    pub fn end_position(&self) -> Position {
        let last = self.line_count();
        Position::new(last, self.line_len(last).unwrap_or(0) + 1)
    }

    /// Whether `pos` addresses an existing caret slot.
    pub fn is_valid(&self, pos: Position) -> bool {
        match self.line_len(pos.line) {
            Some(len) => pos.column >= 1 && pos.column <= len + 1,
            None => false,
        }
    }

    /// Nearest valid position to `pos`.
    pub fn clamp(&self, pos: Position) -> Position {
        let line = pos.line.clamp(1, self.line_count());
        let len = self.line_len(line).unwrap_or(0);
        Position::new(line, pos.column.clamp(1, len + 1))
    }

    /// Replace the chars between `start` and `end` with `text`.
    ///
    /// Both positions must be valid and `start <= end`; callers resolve
    /// ranges first. Everything before `start` and after `end` is kept
    /// byte-for-byte.
    pub fn replace(&mut self, start: Position, end: Position, text: &str) {
        debug_assert!(self.is_valid(start) && self.is_valid(end));
        debug_assert!(start <= end);

        let first = start.line as usize - 1;
        let last = end.line as usize - 1;

        let head_line = &self.lines[first];
        let head = &head_line[..byte_offset(head_line, start.column)];
        let tail_line = &self.lines[last];
        let tail = &tail_line[byte_offset(tail_line, end.column)..];

        let mut joined = String::with_capacity(head.len() + text.len() + tail.len());
        joined.push_str(head);
        joined.push_str(text);
        joined.push_str(tail);

        self.lines.splice(first..=last, split_lines(&joined));
    }
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TextBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            f.write_str(line)?;
        }
        Ok(())
    }
}

fn split_lines(text: &str) -> Vec<String> {
    text.split('\n').map(String::from).collect()
}

/// Byte offset of 1-based char column `column` within `line`.
fn byte_offset(line: &str, column: u32) -> usize {
    line.char_indices()
        .nth(column as usize - 1)
        .map_or(line.len(), |(i, _)| i)
}
