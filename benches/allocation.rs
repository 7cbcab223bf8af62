use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use xfatsim::recovery::{induce_bad_dir_fat, recover_dir_fat};
use xfatsim::{ClusterAllocator, FormatOptions, MemoryStore, Volume};

/// Benchmark allocating 10K chains of 10 clusters
fn bench_allocate_chains(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_chains");

    group.bench_function("contiguous", |b| {
        b.iter(|| {
            let mut alloc = ClusterAllocator::new(100_096, 12_512);
            for _ in 0..10_000 {
                black_box(alloc.allocate(10).unwrap());
            }
        });
    });

    group.finish();
}

/// Benchmark allocation + release cycles (fragmentation test)
fn bench_alloc_release_cycle(c: &mut Criterion) {
    c.bench_function("alloc_release_cycle", |b| {
        b.iter(|| {
            let mut alloc = ClusterAllocator::new(10_112, 1_264);
            let mut chains = Vec::new();

            for i in 0..500 {
                chains.push(alloc.allocate(1 + i % 8).unwrap());
            }
            // release every other chain, then refill the holes
            for chain in chains.iter().step_by(2) {
                alloc.release(chain[0]);
            }
            for i in 0..250 {
                black_box(alloc.allocate(1 + i % 8).unwrap());
            }
        });
    });
}

/// Benchmark import and export through a volume
fn bench_import_export(c: &mut Criterion) {
    let mut group = c.benchmark_group("import_export");

    for size in [1024usize, 64 * 1024, 1024 * 1024] {
        let data = vec![0x42u8; size];

        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| {
                let mut vol = Volume::create(MemoryStore::new(), &FormatOptions::default()).unwrap();
                vol.import_bytes("bench.bin", data).unwrap();
                black_box(vol.export_bytes("bench.bin").unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark the heap scan that rebuilds lost metadata
fn bench_heap_scan(c: &mut Criterion) {
    c.bench_function("recover_dir_fat_100_files", |b| {
        b.iter(|| {
            let mut vol = Volume::create(MemoryStore::new(), &FormatOptions::default()).unwrap();
            for i in 0..100 {
                vol.import_bytes(&format!("f{}", i), &vec![i as u8; 10_000])
                    .unwrap();
            }
            induce_bad_dir_fat(&mut vol).unwrap();
            black_box(recover_dir_fat(&mut vol).unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_allocate_chains,
    bench_alloc_release_cycle,
    bench_import_export,
    bench_heap_scan
);
criterion_main!(benches);
