//! Criterion benchmarks for the numerical core: matrix fills, the
//! repeated-squaring pulse history, and the rate cache.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use activara::config::NumericsConfig;
use activara::matrix::{fill_decay, fill_transmutation, ChainView, Mode, TransferMatrix};
use activara::rate::RateCache;

fn chain_arrays(len: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>, Vec<i32>) {
    let lambda: Vec<f64> = (0..len).map(|i| 1e-7 * (i as f64 + 1.0)).collect();
    let branch: Vec<f64> = (0..len)
        .map(|i| if i == 0 { 0.0 } else { 0.8 * 1e-7 * i as f64 })
        .collect();
    let dest: Vec<f64> = (0..len).map(|i| 1e-9 * (i as f64 + 1.0) + lambda[i]).collect();
    let prod: Vec<f64> = (0..len)
        .map(|i| if i == 0 { 0.0 } else { 5e-10 + branch[i] })
        .collect();
    let loop_rank = vec![-1i32; len];
    (lambda, branch, prod, dest, loop_rank)
}

fn bench_decay_fill(c: &mut Criterion) {
    let numerics = NumericsConfig::default();
    for len in [4usize, 12, 24] {
        let (lambda, branch, prod, dest, loop_rank) = chain_arrays(len);
        let view = ChainView {
            length: len,
            new_rank: 0,
            mode: Mode::Forward,
            n_fluxes: 1,
            lambda: &lambda,
            branch: &branch,
            prod: &prod,
            dest: &dest,
            loop_rank: &loop_rank,
        };
        c.bench_function(&format!("fill_decay_len{len}"), |b| {
            let mut m = TransferMatrix::new();
            b.iter(|| {
                fill_decay(&mut m, &view, black_box(3.15e7), &numerics).expect("fill");
                black_box(m.get(len - 1, 0));
            });
        });
    }
}

fn bench_incremental_vs_scratch(c: &mut Criterion) {
    let numerics = NumericsConfig::default();
    let len = 16usize;
    let (lambda, branch, prod, dest, loop_rank) = chain_arrays(len);
    let mut view = ChainView {
        length: len,
        new_rank: 0,
        mode: Mode::Forward,
        n_fluxes: 1,
        lambda: &lambda,
        branch: &branch,
        prod: &prod,
        dest: &dest,
        loop_rank: &loop_rank,
    };

    c.bench_function("fill_transmutation_scratch", |b| {
        let mut m = TransferMatrix::new();
        b.iter(|| {
            fill_transmutation(&mut m, &view, black_box(1e6), 0, &numerics).expect("fill");
        });
    });

    c.bench_function("fill_transmutation_incremental", |b| {
        let mut m = TransferMatrix::new();
        view.new_rank = 0;
        fill_transmutation(&mut m, &view, 1e6, 0, &numerics).expect("seed");
        view.new_rank = len - 1;
        b.iter(|| {
            fill_transmutation(&mut m, &view, black_box(1e6), 0, &numerics).expect("fill");
        });
    });
}

fn bench_rate_cache(c: &mut Criterion) {
    c.bench_function("rate_cache_churn", |b| {
        let mut cache = RateCache::new(64);
        let mut i = 0u32;
        b.iter(|| {
            let kza = 10010 + (i * 37) % 96 * 10;
            if cache.read(kza, 0).is_none() {
                cache.set(kza, 4, 0, f64::from(i));
            }
            i = i.wrapping_add(1);
            black_box(cache.len());
        });
    });
}

criterion_group!(
    benches,
    bench_decay_fill,
    bench_incremental_vs_scratch,
    bench_rate_cache
);
criterion_main!(benches);
