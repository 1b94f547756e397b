//! Criterion benchmarks for SessionLogParser

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use tokroll::parsers::SessionLogParser;

/// Build a synthetic log: `lines` assistant turns across a handful of
/// sessions, with a tool call on every third turn.
fn synthetic_log(lines: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(lines * 400);
    for i in 0..lines {
        let session = i % 8;
        let tool = if i % 3 == 0 {
            r#","content":[{"type":"tool_use","name":"Edit","input":{"old_string":"a\nb","new_string":"a\nb\nc"}}]"#
        } else {
            ""
        };
        let line = format!(
            r#"{{"type":"assistant","timestamp":"2026-02-20T10:{:02}:{:02}Z","uuid":"u-{i}","sessionId":"sess-{session}","message":{{"id":"msg-{i}","model":"claude-sonnet-4-20250514","stop_reason":"end_turn","usage":{{"input_tokens":1200,"output_tokens":340,"cache_read_input_tokens":9000,"cache_creation_input_tokens":150}}{tool}}}}}"#,
            (i / 60) % 60,
            i % 60,
        );
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
    }
    buf
}

fn bench_parse_slice(c: &mut Criterion) {
    let parser = SessionLogParser::new();

    let mut group = c.benchmark_group("parser");
    for lines in [1_000usize, 10_000] {
        let bytes = synthetic_log(lines);
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("parse_slice", format!("{} lines", lines)),
            &bytes,
            |b, bytes| {
                b.iter(|| parser.parse_slice(black_box(bytes), 0, "code/myapp"));
            },
        );
    }
    group.finish();
}

fn bench_parse_line(c: &mut Criterion) {
    let sample_line = br#"{"type":"assistant","timestamp":"2026-02-20T10:00:00Z","uuid":"u-1","sessionId":"sess-1","message":{"id":"msg-001","model":"claude-sonnet-4-20250514","stop_reason":"end_turn","usage":{"input_tokens":100,"output_tokens":50,"cache_creation_input_tokens":10,"cache_read_input_tokens":20}}}"#;
    let parser = SessionLogParser::new();
    let mut with_newline = sample_line.to_vec();
    with_newline.push(b'\n');

    let mut group = c.benchmark_group("parser");
    group.throughput(Throughput::Bytes(sample_line.len() as u64));
    group.bench_function("parse_line", |b| {
        b.iter(|| parser.parse_slice(black_box(&with_newline), 0, "code/myapp"));
    });
    group.finish();
}

fn bench_resume_tail(c: &mut Criterion) {
    // Incremental read pattern: a big parsed prefix plus a small fresh tail
    let parser = SessionLogParser::new();
    let bytes = synthetic_log(10_000);
    let tail = synthetic_log(50);
    let mut grown = bytes.clone();
    grown.extend_from_slice(&tail);
    let offset = bytes.len();

    let mut group = c.benchmark_group("parser");
    group.throughput(Throughput::Bytes(tail.len() as u64));
    group.bench_function("parse_slice_resume_tail", |b| {
        b.iter(|| parser.parse_slice(black_box(&grown), offset, "code/myapp"));
    });
    group.finish();
}

criterion_group!(benches, bench_parse_slice, bench_parse_line, bench_resume_tail);
criterion_main!(benches);
