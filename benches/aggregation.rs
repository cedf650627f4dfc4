//! Stacking and mean reduction of client updates.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fedsync::codec::{aggregate, serialize_many, stack, Aggregation, SerializedVariable, Tensor};

fn updates(clients: usize, side: usize) -> Vec<Vec<SerializedVariable>> {
    (0..clients)
        .map(|k| {
            let weights = Tensor::from_f32(&[side, side], vec![k as f32; side * side]).unwrap();
            let bias = Tensor::from_f32(&[side], vec![k as f32; side]).unwrap();
            serialize_many(&[weights, bias])
        })
        .collect()
}

fn bench_stack(c: &mut Criterion) {
    let mut group = c.benchmark_group("stack");
    for clients in [2, 20, 100] {
        let input = updates(clients, 128);
        group.bench_with_input(BenchmarkId::from_parameter(clients), &input, |b, input| {
            b.iter(|| stack(black_box(input)).unwrap())
        });
    }
    group.finish();
}

fn bench_mean(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate_mean");
    for clients in [2, 20, 100] {
        let input = updates(clients, 128);
        group.bench_with_input(BenchmarkId::from_parameter(clients), &input, |b, input| {
            b.iter(|| aggregate(black_box(input), Aggregation::Mean).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_stack, bench_mean);
criterion_main!(benches);
