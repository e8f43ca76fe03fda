// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Benchmarks for token estimation and history compression.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use colloquy::compression::{
    default_strategies, group_units, run_pipeline, CompressionSettings, CompressionStrategy,
    MiddleRemovalStrategy, OldestRemovalStrategy,
};
use colloquy::tokenizer::{count_history_tokens, ApproximateTokenizer};
use colloquy::types::{Message, ToolCall};

/// Conversation with a tool exchange every fifth turn.
fn conversation(len: usize) -> Vec<Message> {
    let mut messages = Vec::with_capacity(len);
    let mut i = 0;
    while messages.len() < len {
        if i % 5 == 4 {
            let id = format!("call-{}", i);
            messages.push(Message::assistant_with_tool_calls(
                None,
                vec![ToolCall::new(id.clone(), "read_file", serde_json::json!({"path": "src/lib.rs"}))],
            ));
            messages.push(Message::tool(id, "read_file", "fn main() {}\n".repeat(20)));
        } else if i % 2 == 0 {
            messages.push(Message::user(format!("Question {}: {}", i, "why ".repeat(40))));
        } else {
            messages.push(Message::assistant(format!("Answer {}: {}", i, "because ".repeat(40))));
        }
        i += 1;
    }
    messages
}

fn bench_token_estimation(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression/token_estimation");
    let tokenizer = ApproximateTokenizer::default();

    for size in [100, 1000] {
        let history = conversation(size);
        group.bench_with_input(BenchmarkId::new("count_history_tokens", size), &history, |b, h| {
            b.iter(|| count_history_tokens(&tokenizer, black_box(h)));
        });
        group.bench_with_input(BenchmarkId::new("group_units", size), &history, |b, h| {
            b.iter(|| group_units(black_box(h)));
        });
    }

    group.finish();
}

fn bench_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression/strategies");
    let tokenizer = ApproximateTokenizer::default();
    let history = conversation(500);

    let middle = MiddleRemovalStrategy::default();
    group.bench_function("middle_removal/500", |b| {
        b.iter(|| middle.compress(black_box(&history), &tokenizer, 4_000));
    });

    let oldest = OldestRemovalStrategy::default();
    group.bench_function("oldest_removal/500", |b| {
        b.iter(|| oldest.compress(black_box(&history), &tokenizer, 4_000));
    });

    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression/pipeline");
    let tokenizer = ApproximateTokenizer::default();
    let strategies: Vec<Arc<dyn CompressionStrategy>> = default_strategies(&CompressionSettings::default());

    for size in [50, 500, 2000] {
        let history = conversation(size);
        group.bench_with_input(BenchmarkId::new("run_pipeline", size), &history, |b, h| {
            b.iter(|| run_pipeline(&strategies, black_box(h.clone()), &tokenizer, 8_000, 500));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_token_estimation, bench_strategies, bench_pipeline);
criterion_main!(benches);
