//! Core tensor operation benchmarks
//!
//! Benchmarks for:
//! - Binary operations (add, mul, broadcasting)
//! - Unary operations (exp, relu, sigmoid, tanh)
//! - Matrix multiplication, 2D and batched
//! - Reductions and softmax
//! - Movement operations and im2col
//! - A forward + backward pass through `Variable`

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use volta_core::{Conv2dGeometry, NdArray, Variable};

/// Deterministic array with `dims`
fn wave(dims: &[usize]) -> NdArray {
    let size = dims.iter().product::<usize>();
    let data: Vec<f32> = (0..size).map(|i| (i as f32 * 0.01).sin()).collect();
    NdArray::from_vec(data, dims).unwrap()
}

// ===== BINARY OPERATIONS =====

fn bench_binary_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("binary_ops");

    for size in [64, 1024, 16384] {
        group.bench_with_input(BenchmarkId::new("add", size), &size, |b, s| {
            let a = wave(&[*s]);
            let other = wave(&[*s]);
            b.iter(|| black_box(&a).add(black_box(&other)))
        });

        group.bench_with_input(BenchmarkId::new("mul", size), &size, |b, s| {
            let a = wave(&[*s]);
            let other = wave(&[*s]);
            b.iter(|| black_box(&a).mul(black_box(&other)))
        });
    }

    group.bench_function("broadcast_add", |b| {
        let a = wave(&[100, 100]);
        let row = wave(&[100]);
        b.iter(|| black_box(&a).add(black_box(&row)))
    });

    group.finish();
}

// ===== UNARY OPERATIONS =====

fn bench_unary_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("unary_ops");

    for size in [1024, 16384] {
        group.bench_with_input(BenchmarkId::new("exp", size), &size, |b, s| {
            let a = wave(&[*s]);
            b.iter(|| black_box(&a).exp())
        });

        group.bench_with_input(BenchmarkId::new("relu", size), &size, |b, s| {
            let a = wave(&[*s]);
            b.iter(|| black_box(&a).relu())
        });

        group.bench_with_input(BenchmarkId::new("sigmoid", size), &size, |b, s| {
            let a = wave(&[*s]);
            b.iter(|| black_box(&a).sigmoid())
        });

        group.bench_with_input(BenchmarkId::new("tanh", size), &size, |b, s| {
            let a = wave(&[*s]);
            b.iter(|| black_box(&a).tanh())
        });
    }

    group.finish();
}

// ===== MATRIX MULTIPLICATION =====

fn bench_matmul(c: &mut Criterion) {
    let mut group = c.benchmark_group("matmul");

    for n in [64, 128, 256, 512] {
        group.bench_with_input(BenchmarkId::new("square", n), &n, |b, s| {
            let a = wave(&[*s, *s]);
            let other = wave(&[*s, *s]);
            b.iter(|| black_box(&a).matmul(black_box(&other)))
        });
    }

    group.bench_function("rectangular_128x256", |b| {
        let a = wave(&[128, 256]);
        let other = wave(&[256, 128]);
        b.iter(|| black_box(&a).matmul(black_box(&other)))
    });

    group.bench_function("batched_32x64x64", |b| {
        let a = wave(&[32, 64, 64]);
        let other = wave(&[64, 64]);
        b.iter(|| black_box(&a).matmul(black_box(&other)))
    });

    group.finish();
}

// ===== REDUCTION OPERATIONS =====

fn bench_reduce_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce_ops");

    for size in [1024, 16384] {
        group.bench_with_input(BenchmarkId::new("sum", size), &size, |b, s| {
            let a = wave(&[*s]);
            b.iter(|| black_box(&a).sum())
        });

        group.bench_with_input(BenchmarkId::new("max", size), &size, |b, s| {
            let a = wave(&[*s]);
            b.iter(|| black_box(&a).max())
        });
    }

    group.bench_function("sum_axis_0", |b| {
        let a = wave(&[256, 256]);
        b.iter(|| black_box(&a).sum_axis(0, false))
    });

    group.bench_function("softmax_rows", |b| {
        let a = wave(&[512, 128]);
        b.iter(|| black_box(&a).softmax(1))
    });

    group.finish();
}

// ===== MOVEMENT OPERATIONS =====

fn bench_movement_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("movement_ops");

    group.bench_function("reshape_large", |b| {
        let a = wave(&[100, 100]);
        b.iter(|| black_box(&a).reshape(&[250, 40]))
    });

    group.bench_function("transpose_2d", |b| {
        let a = wave(&[256, 256]);
        b.iter(|| black_box(&a).transpose())
    });

    group.bench_function("permute", |b| {
        let a = wave(&[10, 10, 10, 10]);
        b.iter(|| black_box(&a).permute(&[2, 3, 1, 0]))
    });

    group.bench_function("pad", |b| {
        let a = wave(&[50, 50]);
        b.iter(|| black_box(&a).pad(&[(0, 0), (5, 5)]))
    });

    group.bench_function("im2col_3x3", |b| {
        let a = wave(&[8, 16, 32, 32]);
        let geom = Conv2dGeometry::square(3, 1, 1).unwrap();
        b.iter(|| black_box(&a).im2col(&geom))
    });

    group.finish();
}

// ===== AUTOGRAD =====

fn bench_backward(c: &mut Criterion) {
    let mut group = c.benchmark_group("backward");

    group.bench_function("mlp_layer_64x128", |b| {
        let x = Variable::constant(wave(&[64, 128]));
        let w = Variable::parameter(wave(&[128, 64]));
        let bias = Variable::parameter(wave(&[64]));
        b.iter(|| {
            w.clear_grad();
            bias.clear_grad();
            let y = x.matmul(&w).unwrap().add(&bias).unwrap().relu().sum();
            y.backward().unwrap();
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_binary_ops,
    bench_unary_ops,
    bench_matmul,
    bench_reduce_ops,
    bench_movement_ops,
    bench_backward
);

criterion_main!(benches);
