//! Property tests for the edit pipeline: wire round-trip, locality of
//! apply, and clamping on arbitrary stale ranges.

use pairpad_core::{ApplyOutcome, Document, EditOperation, Position, RemoteApplier, TextBuffer, TextRange};
use proptest::prelude::*;

/// Text with multi-line, non-ASCII and wide characters.
const TEXT: &str = "[a-zA-Z0-9 {}();éüß漢字😀\t\n]{0,40}";
const LINE: &str = "[a-z éß漢😀]{0,12}";

fn ordered(a: Position, b: Position) -> TextRange {
    if a <= b {
        TextRange::new(a, b)
    } else {
        TextRange::new(b, a)
    }
}

fn position() -> impl Strategy<Value = Position> {
    (1u32..60, 1u32..60).prop_map(|(line, column)| Position::new(line, column))
}

fn document_text() -> impl Strategy<Value = String> {
    prop::collection::vec(LINE, 1..6).prop_map(|lines| lines.join("\n"))
}

/// Char offset of a valid position in `buffer.text()`.
fn char_offset(buffer: &TextBuffer, pos: Position) -> usize {
    let before: u32 = (1..pos.line)
        .map(|line| buffer.line_len(line).unwrap_or(0) + 1)
        .sum();
    (before + pos.column - 1) as usize
}

proptest! {
    #[test]
    fn test_wire_roundtrip(a in position(), b in position(), text in TEXT) {
        let op = EditOperation::encode(ordered(a, b), text);
        let decoded = EditOperation::decode(&op.to_wire()).unwrap();
        prop_assert_eq!(decoded, op);
    }

    #[test]
    fn test_apply_touches_only_its_range(
        original in document_text(),
        a in position(),
        b in position(),
        text in TEXT,
    ) {
        let buffer = TextBuffer::from_text(&original);
        let range = ordered(buffer.clamp(a), buffer.clamp(b));
        let chars: Vec<char> = original.chars().collect();
        let prefix: String = chars[..char_offset(&buffer, range.start())].iter().collect();
        let suffix: String = chars[char_offset(&buffer, range.end())..].iter().collect();

        let mut doc = Document::from_text(&original);
        let outcome = RemoteApplier::new()
            .apply(&mut doc, &EditOperation::encode(range, text.clone()))
            .unwrap();

        prop_assert_eq!(outcome, ApplyOutcome::Applied);
        let result = doc.text();
        prop_assert!(result.starts_with(&prefix));
        prop_assert!(result.ends_with(&suffix));
        prop_assert_eq!(result, format!("{prefix}{text}{suffix}"));
    }

    #[test]
    fn test_stale_range_is_clamped_not_rejected(
        original in document_text(),
        a in position(),
        b in position(),
        text in TEXT,
    ) {
        let range = ordered(a, b);
        let mut doc = Document::from_text(&original);
        let mut applier = RemoteApplier::new();

        let outcome = applier.apply(&mut doc, &EditOperation::encode(range, text.clone()));
        prop_assert!(outcome.is_ok());

        let buffer = TextBuffer::from_text(&original);
        let in_bounds = buffer.is_valid(range.start()) && buffer.is_valid(range.end());
        prop_assert_eq!(outcome.unwrap().is_clamped(), !in_bounds);
        prop_assert_eq!(applier.stats().clamped, u64::from(!in_bounds));

        // Same result as applying the clamped range directly.
        let mut expected = buffer.clone();
        let clamped = ordered(buffer.clamp(range.start()), buffer.clamp(range.end()));
        expected.replace(clamped.start(), clamped.end(), &text);
        prop_assert_eq!(doc.text(), expected.text());
    }
}
