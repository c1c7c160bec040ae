//! # Input Filter Benchmark
//!
//! Measures one pass of a filter chain over a frame's worth of events and a
//! transfer-field pack/unpack cycle.
//!
//! Run with: `cargo bench --package szg_core`

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use szg_core::input::{AxisScaleFilter, ButtonSuppressFilter, MatrixTransformFilter};
use szg_core::{
    DataType, EventQueue, InputEvent, InputState, IoFilter, Matrix4, TransferRegistry,
};

/// Builds a queue mixing all three event kinds.
fn random_queue(len: usize, seed: u64) -> EventQueue {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len)
        .map(|_| match rng.gen_range(0..3) {
            0 => InputEvent::button(rng.gen_range(0..16), rng.gen_range(0..2)),
            1 => InputEvent::axis(rng.gen_range(0..4), rng.gen_range(-1.0..1.0)),
            _ => InputEvent::matrix(
                rng.gen_range(0..2),
                Matrix4::translation(rng.gen(), rng.gen(), rng.gen()),
            ),
        })
        .collect()
}

fn bench_filter_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_chain");

    for len in [16, 256, 4096] {
        let queue = random_queue(len, 7);
        group.bench_with_input(BenchmarkId::from_parameter(len), &queue, |b, queue| {
            let mut chain: Vec<Box<dyn IoFilter>> = vec![
                Box::new(ButtonSuppressFilter::only([3, 5])),
                Box::new(AxisScaleFilter::new(2.0, 0.1)),
                Box::new(MatrixTransformFilter::new(Matrix4::scale(0.5), Matrix4::IDENTITY)),
            ];
            let mut state = InputState::new();
            b.iter(|| {
                let mut q = queue.clone();
                for filter in &mut chain {
                    filter.filter(&mut q, &mut state);
                }
                black_box(q.len())
            });
        });
    }

    group.finish();
}

fn bench_transfer_frame(c: &mut Criterion) {
    let mut master = TransferRegistry::new();
    let mut slave = TransferRegistry::new();
    for reg in [&mut master, &mut slave] {
        reg.add_field("navigation", DataType::Float, 16).ok();
        reg.add_field("flags", DataType::Int, 64).ok();
        reg.add_internal_field("positions", DataType::Double, 3 * 1024).ok();
        reg.start();
    }
    let mut frame = Vec::with_capacity(master.packed_len());

    c.bench_function("transfer_pack_unpack", |b| {
        b.iter(|| {
            frame.clear();
            master.pack(&mut frame);
            black_box(slave.unpack(&frame).ok())
        });
    });
}

criterion_group!(benches, bench_filter_chain, bench_transfer_frame);
criterion_main!(benches);
