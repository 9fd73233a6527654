//! Classifier Performance Benchmarks
//!
//! Every statement passes through the classifier at least once, often three
//! times (type, dangerous and sensitive checks). These benchmarks measure:
//! - Keyword detection on short and comment-prefixed statements
//! - Substring scanning of long statements for sensitive patterns
//! - The combined classification used by the CLI

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mysql_warden::classifier::{detect_type, is_sensitive_text};
use mysql_warden::classify;

fn bench_detect_type(c: &mut Criterion) {
    c.bench_function("detect_type_simple", |b| {
        b.iter(|| detect_type(black_box("SELECT id, name FROM users WHERE id = 1")));
    });

    c.bench_function("detect_type_commented", |b| {
        b.iter(|| detect_type(black_box("/* request 42 */ -- trace\n  delete from sessions")));
    });
}

fn bench_sensitive_scan(c: &mut Criterion) {
    let columns: Vec<String> = (0..200).map(|i| format!("c{i}")).collect();
    let long_select = format!("SELECT {} FROM wide_table WHERE c0 > 10", columns.join(", "));

    c.bench_function("is_sensitive_text_long", |b| {
        b.iter(|| is_sensitive_text(black_box(&long_select)));
    });
}

fn bench_classify(c: &mut Criterion) {
    c.bench_function("classify_alter", |b| {
        b.iter(|| classify(black_box("ALTER TABLE orders ADD COLUMN shipped_at DATETIME NULL")));
    });
}

criterion_group!(benches, bench_detect_type, bench_sensitive_scan, bench_classify);
criterion_main!(benches);
