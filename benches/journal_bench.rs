//! Benchmarks for bucket-mirror
//!
//! Run with: cargo bench

use bucket_mirror::journal::{JournalCursor, KeyJournal};
use bucket_mirror::mirror::{mirror_key, RetryPolicy};
use bucket_mirror::store::{ConnectionPair, MemoryStore};
use bucket_mirror::Key;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use tempfile::tempdir;

const RECORDS: u32 = 10_000;

fn write_keys(path: &std::path::Path) {
    let mut journal = KeyJournal::create(path).unwrap();
    for i in 0..RECORDS {
        journal.write_record(format!("user:{:010}", i).as_bytes()).unwrap();
    }
    journal.close();
}

fn benchmark_journal_write(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bench.keys");

    c.bench_function("journal_write_10k", |b| {
        b.iter(|| write_keys(black_box(&path)))
    });
}

fn benchmark_cursor_read(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bench.keys");
    write_keys(&path);

    c.bench_function("cursor_read_10k", |b| {
        b.iter_batched(
            || JournalCursor::new("bench", KeyJournal::open_read(&path).unwrap()),
            |cursor| {
                while let Some(key) = cursor.read().unwrap() {
                    black_box(key);
                }
            },
            BatchSize::SmallInput,
        )
    });
}

fn benchmark_mirror_key(c: &mut Criterion) {
    let source = MemoryStore::new("source");
    source.insert("bench", "k", vec![0u8; 4096]);
    let retry = RetryPolicy::immediate(3);

    c.bench_function("mirror_key_memory", |b| {
        b.iter_batched(
            || {
                let destination = MemoryStore::new("destination");
                ConnectionPair::new(Box::new(source.connection()), Box::new(destination.connection()))
            },
            |mut pair| black_box(mirror_key("bench", &Key::from("k"), &mut pair, &retry)),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, benchmark_journal_write, benchmark_cursor_read, benchmark_mirror_key);
criterion_main!(benches);
