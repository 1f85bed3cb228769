//! Lock acquisition and dump/restore throughput.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use outcore_common::memory::FixedMemoryMonitor;
use outcore_core::buffer::{AllocationPolicy, BufferObject};
use outcore_core::manager::{BufferManager, BufferManagerConfig, PolicyKind};

fn manager() -> Arc<BufferManager> {
    let config = BufferManagerConfig::default().with_policy(PolicyKind::Never);
    BufferManager::new(config, Arc::new(FixedMemoryMonitor::default())).unwrap()
}

fn bench_locks(c: &mut Criterion) {
    let manager = manager();
    let buffer = BufferObject::new(&manager);
    buffer.allocate(4096, AllocationPolicy::Heap).unwrap();

    let mut group = c.benchmark_group("lock");
    group.bench_function("read", |b| {
        b.iter(|| black_box(buffer.read().unwrap()[0]));
    });
    group.bench_function("write", |b| {
        b.iter(|| {
            let mut guard = buffer.write().unwrap();
            guard[0] = guard[0].wrapping_add(1);
        });
    });
    group.bench_function("upgrade", |b| {
        b.iter(|| {
            let guard = buffer.upgradable_read().unwrap();
            let mut guard = guard.upgrade();
            guard[1] = guard[1].wrapping_add(1);
        });
    });
    group.finish();
}

fn bench_dump_restore(c: &mut Criterion) {
    let mut group = c.benchmark_group("dump_restore");
    for size in [64 << 10, 1 << 20, 16 << 20] {
        let manager = manager();
        let buffer = BufferObject::new(&manager);
        buffer.allocate(size, AllocationPolicy::PageAligned).unwrap();
        buffer.write().unwrap().fill(0x5A);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &buffer, |b, buffer| {
            b.iter(|| {
                manager.dump(buffer).unwrap();
                black_box(buffer.read().unwrap()[0]);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_locks, bench_dump_restore);
criterion_main!(benches);
