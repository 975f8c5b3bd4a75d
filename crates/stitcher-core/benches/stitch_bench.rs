//! # Stitching Benchmarks
//!
//! Run with: `cargo bench -p stitcher-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use stitcher_core::{
    Clique, CliqueEnumeration, DataSourceFactory, Entity, EntityFactory, NodeId, RedbStore,
    StitchConfig, StitchKey, Value,
};

/// `size` entities over three sources. Every entity shares a UNII with
/// the others in its block of `block` entities, and a name with its
/// successor.
fn create_blocks(size: usize, block: usize) -> (EntityFactory<RedbStore>, Vec<NodeId>) {
    let factory = EntityFactory::in_memory(StitchConfig::default()).expect("factory");
    let ids = factory
        .execute(|tx, config| {
            let sources = [
                DataSourceFactory::register(tx, "a")?,
                DataSourceFactory::register(tx, "b")?,
                DataSourceFactory::register(tx, "c")?,
            ];
            let mut ids = Vec::with_capacity(size);
            for i in 0..size {
                let e = Entity::create(tx, sources[i % sources.len()])?;
                e.set(tx, config, StitchKey::I_UNII, Value::from(format!("U{}", i / block)))?;
                e.set(
                    tx,
                    config,
                    StitchKey::N_Name,
                    Value::from_elements(vec![
                        format!("N{i}").into(),
                        format!("N{}", i + 1).into(),
                    ]),
                )?;
                ids.push(e.id());
            }
            Ok(ids)
        })
        .expect("setup");
    (factory, ids)
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_stitch(c: &mut Criterion) {
    let mut group = c.benchmark_group("stitch");

    for size in [50, 200, 500].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| black_box(create_blocks(size, 5)));
        });
    }

    group.finish();
}

fn bench_components(c: &mut Criterion) {
    let mut group = c.benchmark_group("components");

    for size in [50, 200, 500].iter() {
        let (factory, _) = create_blocks(*size, 5);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(factory.components().expect("components")));
        });
    }

    group.finish();
}

fn bench_cliques(c: &mut Criterion) {
    let mut group = c.benchmark_group("cliques");

    for block in [4, 8, 16].iter() {
        let (factory, ids) = create_blocks(*block * 4, *block);
        group.bench_with_input(BenchmarkId::from_parameter(block), &ids, |b, ids| {
            b.iter(|| {
                let mut found = 0usize;
                factory
                    .execute(|tx, config| {
                        CliqueEnumeration::new(ids).enumerate(
                            tx,
                            &config.resolution_keys(),
                            &mut |_: &Clique| {
                                found += 1;
                                true
                            },
                        )
                    })
                    .expect("enumerate");
                black_box(found)
            });
        });
    }

    group.finish();
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");

    for size in [50, 200].iter() {
        let (factory, _) = create_blocks(*size, 5);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut groups = 0usize;
                factory
                    .resolve(|_: &[NodeId]| groups += 1)
                    .expect("resolve");
                black_box(groups)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_stitch,
    bench_components,
    bench_cliques,
    bench_resolve
);
criterion_main!(benches);
