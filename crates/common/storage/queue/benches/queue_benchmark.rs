// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Benchmarks for both queue engines.
//!
//! Measures:
//! - Push latency at different body sizes
//! - Full push, pull, delete cycle latency
//! - Pull latency against a deep backlog (file engine rewrites the whole log)

use std::{hint::black_box, sync::Arc};

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rsqs_queue::{
    FileQueueService, ManualScheduler, MemoryQueueService, QueueBuilder, QueueService,
};
use tempfile::TempDir;

/// Body sizes to benchmark (bytes)
const BODY_SIZES: &[usize] = &[64, 256, 1024, 4096];

/// Backlog depths for the pull benchmark
const BACKLOG_DEPTHS: &[usize] = &[10, 100, 1_000];

const QUEUE: &str = "bench";

/// Timers never fire during a benchmark; deletes cancel them.
fn scheduler() -> Arc<ManualScheduler> { Arc::new(ManualScheduler::new()) }

fn memory_queue() -> MemoryQueueService {
    let service = QueueBuilder::in_memory()
        .scheduler(scheduler())
        .build_memory()
        .expect("Failed to create memory queue");
    service.create_queue_default(QUEUE).unwrap();
    service
}

fn file_queue(temp_dir: &TempDir, sync: bool) -> FileQueueService {
    let service = QueueBuilder::new(temp_dir.path())
        .sync_on_write(sync)
        .scheduler(scheduler())
        .build_file()
        .expect("Failed to create file queue");
    service.create_queue_default(QUEUE).unwrap();
    service
}

fn generate_body(size: usize) -> String { "x".repeat(size) }

fn cycle(service: &dyn QueueService, body: &str) {
    service.push(QUEUE, body).unwrap();
    let message = service.pull(QUEUE).unwrap().unwrap();
    service.delete(QUEUE, &message.receipt_token).unwrap();
}

// =============================================================================
// Push Latency
// =============================================================================

fn bench_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("push");

    for &size in BODY_SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        let body = generate_body(size);

        group.bench_with_input(BenchmarkId::new("memory", size), &body, |b, body| {
            let service = memory_queue();
            b.iter(|| service.push(QUEUE, black_box(body)).unwrap());
        });

        group.bench_with_input(BenchmarkId::new("file", size), &body, |b, body| {
            let temp_dir = TempDir::new().unwrap();
            let service = file_queue(&temp_dir, false);
            b.iter(|| service.push(QUEUE, black_box(body)).unwrap());
        });
    }

    group.finish();
}

// =============================================================================
// Push, Pull, Delete Cycle
// =============================================================================

fn bench_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("cycle");
    let body = generate_body(256);

    group.bench_function("memory", |b| {
        let service = memory_queue();
        b.iter(|| cycle(&service, black_box(&body)));
    });

    group.bench_function("file", |b| {
        let temp_dir = TempDir::new().unwrap();
        let service = file_queue(&temp_dir, false);
        b.iter(|| cycle(&service, black_box(&body)));
    });

    // fsync per rewrite is slow, reduce sample size
    group.sample_size(20);
    group.bench_function("file_sync", |b| {
        let temp_dir = TempDir::new().unwrap();
        let service = file_queue(&temp_dir, true);
        b.iter(|| cycle(&service, black_box(&body)));
    });

    group.finish();
}

// =============================================================================
// Pull Against A Backlog
// =============================================================================

fn bench_pull_backlog(c: &mut Criterion) {
    let mut group = c.benchmark_group("pull_backlog");
    let body = generate_body(256);

    for &depth in BACKLOG_DEPTHS {
        group.bench_with_input(BenchmarkId::new("file", depth), &depth, |b, &depth| {
            b.iter_batched(
                || {
                    let temp_dir = TempDir::new().unwrap();
                    let service = file_queue(&temp_dir, false);
                    for _ in 0..depth {
                        service.push(QUEUE, &body).unwrap();
                    }
                    (temp_dir, service)
                },
                |(temp_dir, service)| {
                    black_box(service.pull(QUEUE).unwrap());
                    drop(temp_dir);
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

// =============================================================================
// Criterion Configuration
// =============================================================================

criterion_group!(benches, bench_push, bench_cycle, bench_pull_backlog);

criterion_main!(benches);
