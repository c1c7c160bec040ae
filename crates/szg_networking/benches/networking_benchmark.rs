//! # Replication Benchmark
//!
//! Measures what a late joiner costs the server: dumping the whole scene
//! graph, putting it on the wire and rebuilding it on the other side.
//!
//! Run with: `cargo bench --package szg_networking --bench networking_benchmark`

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use szg_core::Matrix4;
use szg_networking::{Database, StructuredRecord, ROOT_ID};

/// Random tree of transforms with leaf names, built through `alter()`.
fn random_tree(nodes: usize, seed: u64) -> Database {
    let mut rng = StdRng::seed_from_u64(seed);
    let db = Database::new();
    let mut ids = vec![ROOT_ID];
    for i in 0..nodes {
        let parent = ids[rng.gen_range(0..ids.len())];
        let node_type = if i % 4 == 3 { "name" } else { "transform" };
        if let Ok(node) = db.new_node(parent, &format!("n{i}"), node_type) {
            if node_type == "transform" {
                let matrix = Matrix4::translation(rng.gen(), rng.gen(), rng.gen());
                let _ = db.alter(&mut db.language().transform(node.id(), &matrix));
                ids.push(node.id());
            }
        }
    }
    db
}

fn bench_dump(c: &mut Criterion) {
    let mut group = c.benchmark_group("dump");
    for nodes in [64, 1024] {
        let db = random_tree(nodes, 11);
        group.bench_with_input(BenchmarkId::from_parameter(nodes), &db, |b, db| {
            b.iter(|| black_box(db.dump()));
        });
    }
    group.finish();
}

fn bench_wire(c: &mut Criterion) {
    let db = random_tree(1024, 11);
    let records = db.dump();
    let bytes: Vec<u8> = records.iter().flat_map(StructuredRecord::to_bytes).collect();
    let dictionary = db.language().dictionary();

    c.bench_function("encode_1024", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(bytes.len());
            for record in &records {
                out.extend_from_slice(&record.to_bytes());
            }
            black_box(out)
        });
    });
    c.bench_function("decode_1024", |b| {
        b.iter(|| black_box(StructuredRecord::decode_all(dictionary, black_box(&bytes))));
    });
    c.bench_function("rebuild_1024", |b| {
        b.iter_batched(Database::new, |mirror| black_box(mirror.handle_data_queue(&bytes)), BatchSize::SmallInput);
    });
}

criterion_group!(benches, bench_dump, bench_wire);
criterion_main!(benches);
