//! Remote edit application with best-effort clamping.
//!
//! Operations are applied in delivery order against whatever the local
//! document looks like at that moment. There is no transform step: a range
//! that no longer fits (the document shrank under it) is clamped to the
//! nearest valid positions instead of being rejected. Clamps are counted
//! since each one is a point where replicas may diverge.

use log::{debug, warn};

use crate::buffer::TextBuffer;
use crate::document::{ApplyError, Document};
use crate::operation::{EditOperation, TextRange};

/// How an operation landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Range addressed the document as-is.
    Applied,
    /// Range was stale and was clamped before writing.
    Clamped {
        requested: TextRange,
        applied: TextRange,
    },
}

impl ApplyOutcome {
    pub fn is_clamped(&self) -> bool {
        matches!(self, ApplyOutcome::Clamped { .. })
    }
}

/// Counters for monitoring convergence risk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub applied: u64,
    pub clamped: u64,
}

/// Resolve `range` against `buffer`, clamping each end independently.
///
/// Clamping is monotonic, so an ordered range stays ordered.
pub fn resolve_range(buffer: &TextBuffer, range: TextRange) -> Result<ApplyOutcome, ApplyError> {
    if !range.is_ordered() {
        return Err(ApplyError::Unordered(range));
    }
    if buffer.is_valid(range.start()) && buffer.is_valid(range.end()) {
        return Ok(ApplyOutcome::Applied);
    }
    let applied = TextRange::new(buffer.clamp(range.start()), buffer.clamp(range.end()));
    Ok(ApplyOutcome::Clamped {
        requested: range,
        applied,
    })
}

/// Applies incoming operations one at a time, in the order given.
#[derive(Debug, Default)]
pub struct RemoteApplier {
    stats: ApplyStats,
}

impl RemoteApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `op` to a local document with the suppression flag raised,
    /// so capture does not send it back out.
    pub fn apply(&mut self, doc: &mut Document, op: &EditOperation) -> Result<ApplyOutcome, ApplyError> {
        let outcome = resolve_range(doc.buffer(), op.range)?;
        doc.apply_with_suppression(effective_range(op.range, outcome), &op.text)?;
        self.record(outcome);
        Ok(outcome)
    }

    /// Apply `op` to a bare buffer (relay-side copy of a room's document).
    pub fn apply_to_buffer(
        &mut self,
        buffer: &mut TextBuffer,
        op: &EditOperation,
    ) -> Result<ApplyOutcome, ApplyError> {
        let outcome = resolve_range(buffer, op.range)?;
        let range = effective_range(op.range, outcome);
        buffer.replace(range.start(), range.end(), &op.text);
        self.record(outcome);
        Ok(outcome)
    }

    pub fn stats(&self) -> ApplyStats {
        self.stats
    }

    fn record(&mut self, outcome: ApplyOutcome) {
        self.stats.applied += 1;
        match outcome {
            ApplyOutcome::Applied => debug!("applied remote operation"),
            ApplyOutcome::Clamped { requested, applied } => {
                self.stats.clamped += 1;
                warn!(
                    "stale range {}:{}-{}:{} clamped to {}:{}-{}:{} (divergence risk, {} so far)",
                    requested.start_line,
                    requested.start_col,
                    requested.end_line,
                    requested.end_col,
                    applied.start_line,
                    applied.start_col,
                    applied.end_line,
                    applied.end_col,
                    self.stats.clamped
                );
            }
        }
    }
}

fn effective_range(requested: TextRange, outcome: ApplyOutcome) -> TextRange {
    match outcome {
        ApplyOutcome::Applied => requested,
        ApplyOutcome::Clamped { applied, .. } => applied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Position;

    fn op(sl: u32, sc: u32, el: u32, ec: u32, text: &str) -> EditOperation {
        EditOperation::encode(
            TextRange::new(Position::new(sl, sc), Position::new(el, ec)),
            text,
        )
    }

    #[test]
    fn test_insert_at_start() {
        let mut doc = Document::from_text("hello");
        let mut applier = RemoteApplier::new();
        let outcome = applier.apply(&mut doc, &op(1, 1, 1, 1, "X")).unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(doc.text(), "Xhello");
    }

    #[test]
    fn test_insert_at_end_of_line() {
        let mut doc = Document::from_text("hello");
        let mut applier = RemoteApplier::new();
        applier.apply(&mut doc, &op(1, 6, 1, 6, "!")).unwrap();
        assert_eq!(doc.text(), "hello!");
    }

    #[test]
    fn test_stale_range_is_clamped() {
        let mut doc = Document::from_text("ab\ncd");
        let mut applier = RemoteApplier::new();

        let outcome = applier.apply(&mut doc, &op(5, 1, 5, 3, "Z")).unwrap();

        assert!(outcome.is_clamped());
        assert_eq!(doc.text(), "ab\nZ");
        assert_eq!(applier.stats(), ApplyStats { applied: 1, clamped: 1 });
    }

    #[test]
    fn test_stale_column_clamped_to_line_end() {
        let mut doc = Document::from_text("abc\nxyz");
        let mut applier = RemoteApplier::new();
        let outcome = applier.apply(&mut doc, &op(1, 2, 1, 99, "")).unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Clamped {
                requested: op(1, 2, 1, 99, "").range,
                applied: op(1, 2, 1, 4, "").range,
            }
        );
        assert_eq!(doc.text(), "a\nxyz");
    }

    #[test]
    fn test_unordered_rejected() {
        let mut doc = Document::from_text("hello");
        let mut applier = RemoteApplier::new();
        assert!(applier.apply(&mut doc, &op(1, 4, 1, 2, "")).is_err());
        assert_eq!(doc.text(), "hello");
        assert_eq!(applier.stats().applied, 0);
    }

    #[test]
    fn test_locality() {
        let original = "line one\nline two\nline three";
        let mut doc = Document::from_text(original);
        let mut applier = RemoteApplier::new();

        applier.apply(&mut doc, &op(2, 6, 2, 9, "2")).unwrap();

        let text = doc.text();
        // Prefix before the start position and suffix after the end are untouched.
        assert!(text.starts_with("line one\nline "));
        assert!(text.ends_with("\nline three"));
        assert_eq!(text, "line one\nline 2\nline three");
    }

    #[test]
    fn test_delivery_order_is_application_order() {
        let mut doc = Document::from_text("");
        let mut applier = RemoteApplier::new();
        for (i, ch) in ["a", "b", "c"].iter().enumerate() {
            let col = i as u32 + 1;
            applier.apply(&mut doc, &op(1, col, 1, col, ch)).unwrap();
        }
        assert_eq!(doc.text(), "abc");
    }

    #[test]
    fn test_apply_to_buffer() {
        let mut buf = TextBuffer::from_text("fn main() {}");
        let mut applier = RemoteApplier::new();
        applier
            .apply_to_buffer(&mut buf, &op(1, 12, 1, 12, "\n    todo!();\n"))
            .unwrap();
        assert_eq!(buf.text(), "fn main() {\n    todo!();\n}");
    }
}
