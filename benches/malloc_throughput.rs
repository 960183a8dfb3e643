use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

const OPS: u64 = 10_000;

/// simalloc alloc/free throughput.
fn malloc_free(size: usize) {
    for _ in 0..OPS {
        let ptr = simalloc::malloc(size);
        black_box(ptr);
        simalloc::free(ptr);
    }
}

/// simalloc alloc/grow/free throughput.
fn malloc_realloc_free(size: usize) {
    for _ in 0..OPS {
        let ptr = simalloc::malloc(size);
        let ptr = simalloc::realloc(ptr, 2 * size);
        black_box(ptr);
        simalloc::free(ptr);
    }
}

fn benchmark_malloc_throughput(c: &mut Criterion) {
    assert!(simalloc::init());

    let mut group = c.benchmark_group("malloc_throughput");

    for size in [16, 64, 256, 1024, 4096] {
        group.throughput(Throughput::Elements(OPS));

        group.bench_with_input(BenchmarkId::new("malloc_free", size), &size, |b, &size| {
            b.iter(|| malloc_free(size))
        });

        group.bench_with_input(
            BenchmarkId::new("malloc_realloc_free", size),
            &size,
            |b, &size| b.iter(|| malloc_realloc_free(size)),
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_malloc_throughput);
criterion_main!(benches);
