//! The local document model.
//!
//! Only two paths mutate a [`Document`]: local edits from the editor widget
//! ([`Document::edit`]) and remote operations written under suppression
//! ([`Document::apply_with_suppression`]). Every mutation is reported to the
//! registered [`MutationObserver`]s, which decide on their own whether it
//! should go out on the wire by checking the shared [`Suppression`] flag.
//!
//! ```text
//!  keystroke ──► Document::edit ──────────────┐
//!                                             ├──► observers (flag clear → broadcast)
//!  remote op ──► SuppressionGuard ──► write ──┘            (flag set   → ignore)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::buffer::{Position, TextBuffer};
use crate::operation::TextRange;

/// Errors from writing a range into the document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("range {0:?} does not address the current document")]
    OutOfBounds(TextRange),
    #[error("range {0:?} starts after it ends")]
    Unordered(TextRange),
}

/// The "applying remote" flag, shared between a document and its observers.
#[derive(Debug, Clone, Default)]
pub struct Suppression(Arc<AtomicBool>);

impl Suppression {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a remote write is in progress.
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn raise(&self) -> SuppressionGuard<'_> {
        self.0.store(true, Ordering::Release);
        SuppressionGuard { flag: self }
    }
}

/// Holds the suppression flag up; lowers it on drop, including unwinds.
pub struct SuppressionGuard<'a> {
    flag: &'a Suppression,
}

impl Drop for SuppressionGuard<'_> {
    fn drop(&mut self) {
        self.flag.0.store(false, Ordering::Release);
    }
}

/// One mutation as seen by observers: the range it replaced (in
/// coordinates before the write) and the inserted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mutation<'a> {
    pub range: TextRange,
    pub text: &'a str,
}

/// Mutation callback.
pub trait MutationObserver: Send {
    fn on_mutation(&mut self, mutation: &Mutation<'_>);
}

/// Text buffer plus the anti-echo discipline around it.
pub struct Document {
    buffer: TextBuffer,
    suppression: Suppression,
    observers: Vec<Box<dyn MutationObserver>>,
    revision: u64,
}

impl Document {
    pub fn new() -> Self {
        Self::from_text("")
    }

    pub fn from_text(text: &str) -> Self {
        Self {
            buffer: TextBuffer::from_text(text),
            suppression: Suppression::new(),
            observers: Vec::new(),
            revision: 0,
        }
    }

    /// Handle to the suppression flag, for observers.
    pub fn suppression(&self) -> Suppression {
        self.suppression.clone()
    }

    /// Register a mutation observer.
    pub fn observe(&mut self, observer: impl MutationObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn buffer(&self) -> &TextBuffer {
        &self.buffer
    }

    pub fn text(&self) -> String {
        self.buffer.text()
    }

    /// Number of mutations applied so far.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Apply a batch of local edits in order.
    ///
    /// Each change is addressed against the document as left by the
    /// previous one and produces its own observer callback. Stops at the
    /// first change that does not address the document; earlier changes
    /// stay applied.
    pub fn edit<'t>(
        &mut self,
        changes: impl IntoIterator<Item = (TextRange, &'t str)>,
    ) -> Result<(), ApplyError> {
        for (range, text) in changes {
            self.check(range)?;
            self.write(range, text);
        }
        Ok(())
    }

    /// Insert `text` at `pos` as a local edit.
    pub fn insert(&mut self, pos: Position, text: &str) -> Result<(), ApplyError> {
        self.edit([(TextRange::caret(pos), text)])
    }

    /// Write `text` over `range` with the suppression flag raised.
    ///
    /// The flag is raised before the buffer changes and lowered once the
    /// observers have run, on every exit path.
    pub fn apply_with_suppression(&mut self, range: TextRange, text: &str) -> Result<(), ApplyError> {
        self.check(range)?;
        let suppression = self.suppression.clone();
        let _guard = suppression.raise();
        self.write(range, text);
        Ok(())
    }

    /// Replace the whole document under suppression (resync snapshot).
    pub fn replace_all_with_suppression(&mut self, text: &str) {
        let whole = TextRange::new(Position::new(1, 1), self.buffer.end_position());
        let suppression = self.suppression.clone();
        let _guard = suppression.raise();
        self.write(whole, text);
    }

    fn check(&self, range: TextRange) -> Result<(), ApplyError> {
        if !range.is_ordered() {
            return Err(ApplyError::Unordered(range));
        }
        if !self.buffer.is_valid(range.start()) || !self.buffer.is_valid(range.end()) {
            return Err(ApplyError::OutOfBounds(range));
        }
        Ok(())
    }

    fn write(&mut self, range: TextRange, text: &str) {
        self.buffer.replace(range.start(), range.end(), text);
        self.revision += 1;
        let mutation = Mutation { range, text };
        for observer in &mut self.observers {
            observer.on_mutation(&mutation);
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("buffer", &self.buffer)
            .field("observers", &self.observers.len())
            .field("revision", &self.revision)
            .finish()
    }
}
