use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pairpad_core::{Document, EditOperation, Position, RemoteApplier, TextRange};

fn sample_source(lines: usize) -> String {
    (0..lines)
        .map(|i| format!("    let value_{i} = compute({i}) + offset;"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn bench_decode(c: &mut Criterion) {
    let op = EditOperation::encode(
        TextRange::new(Position::new(120, 5), Position::new(121, 17)),
        "let renamed = compute(1);",
    );
    let wire = op.to_wire();

    c.bench_function("decode_operation", |b| {
        b.iter(|| EditOperation::decode(black_box(&wire)).unwrap())
    });
}

fn bench_apply(c: &mut Criterion) {
    let source = sample_source(2_000);

    c.bench_function("apply_1k_keystrokes_2k_lines", |b| {
        b.iter(|| {
            let mut doc = Document::from_text(&source);
            let mut applier = RemoteApplier::new();
            for i in 0..1_000u32 {
                let pos = Position::new(1_000, 5 + i);
                let op = EditOperation::encode(TextRange::caret(pos), "x");
                applier.apply(&mut doc, black_box(&op)).unwrap();
            }
            doc
        })
    });

    c.bench_function("apply_stale_clamped", |b| {
        let mut doc = Document::from_text(&source);
        let mut applier = RemoteApplier::new();
        let op = EditOperation::encode(
            TextRange::new(Position::new(50_000, 1), Position::new(50_000, 9)),
            "",
        );
        b.iter(|| applier.apply(&mut doc, black_box(&op)).unwrap())
    });
}

criterion_group!(benches, bench_decode, bench_apply);
criterion_main!(benches);
