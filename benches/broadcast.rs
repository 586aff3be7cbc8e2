use criterion::*;
use std::hint::black_box;

mod common;
use common::*;

use pgas_array::{DArray, ElementwiseOp, Operand, PlacementPolicy};

fn broadcast_benchmark(c: &mut Criterion) {
    let ctx = make_cluster(4);
    let mut group = c.benchmark_group("broadcast");

    for &blocks in &[2usize, 4, 8] {
        group.bench_function(format!("add_scale_{SIDE_MED}_{blocks}x{blocks}"), |b| {
            b.iter_batched(
                || populate(&ctx, SIDE_MED, blocks, &PlacementPolicy::BlockRow).unwrap(),
                |x| {
                    let y = x.add(&x).unwrap().scale(3.0).unwrap();
                    y.materialize().unwrap();
                    black_box(y);
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.bench_function(format!("fma_{SIDE_SMALL}_cyclic"), |b| {
        b.iter_batched(
            || {
                let x = populate(&ctx, SIDE_SMALL, 4, &PlacementPolicy::CyclicRow).unwrap();
                let y = x.map(|v| v + 1.0).unwrap();
                (x, y)
            },
            |(x, y)| {
                let z = DArray::broadcast(
                    ElementwiseOp::Mul,
                    &[Operand::Array(&x), Operand::Array(&y), Operand::Scalar(0.5)],
                )
                .unwrap();
                black_box(z.collect().unwrap());
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, broadcast_benchmark);
criterion_main!(benches);
