//! Property tests for the transfer-matrix kernels.

use activara::config::NumericsConfig;
use activara::matrix::{fill_decay, fill_transmutation, ChainView, Mode, TransferMatrix};
use proptest::prelude::*;

fn make_view<'a>(
    length: usize,
    lambda: &'a [f64],
    branch: &'a [f64],
    prod: &'a [f64],
    dest: &'a [f64],
    loop_rank: &'a [i32],
    new_rank: usize,
) -> ChainView<'a> {
    ChainView {
        length,
        new_rank,
        mode: Mode::Forward,
        n_fluxes: 1,
        lambda,
        branch,
        prod,
        dest,
        loop_rank,
    }
}

/// Strategy: a decay chain of 2..=7 ranks with rates spanning several
/// decades, branch fractions below the removal rates, occasionally exactly
/// repeated rates.
fn chain_strategy() -> impl Strategy<Value = (Vec<f64>, Vec<f64>, f64)> {
    (2usize..=7)
        .prop_flat_map(|len| {
            (
                proptest::collection::vec(0u8..=3, len),
                proptest::collection::vec(1e-8f64..1e-4, len),
                proptest::collection::vec(0.0f64..1.0, len),
                1e2f64..1e7,
            )
                .prop_map(move |(repeat_tags, rates, fracs, t)| {
                    // equal tag values share the first tagged rate, which
                    // exercises the repeated-pole paths
                    let mut lambda = Vec::with_capacity(len);
                    for (i, tag) in repeat_tags.iter().enumerate() {
                        let first = repeat_tags.iter().position(|x| x == tag).unwrap_or(i);
                        lambda.push(rates[first]);
                    }
                    let mut branch = vec![0.0; len];
                    for i in 1..len {
                        branch[i] = lambda[i - 1] * fracs[i];
                    }
                    (lambda, branch, t)
                })
        })
        .prop_filter("finite", |(l, _, t)| {
            l.iter().all(|x| x.is_finite()) && t.is_finite()
        })
}

proptest! {
    /// Invariant: the diagonal is exp(-rate*t) and every off-diagonal
    /// element is non-negative.
    #[test]
    fn prop_decay_matrix_shape((lambda, branch, t) in chain_strategy()) {
        let len = lambda.len();
        let loop_rank = vec![-1i32; len];
        let view = make_view(len, &lambda, &branch, &[], &[], &loop_rank, 0);
        let mut m = TransferMatrix::new();
        fill_decay(&mut m, &view, t, &NumericsConfig::default()).expect("fill");

        for i in 0..len {
            prop_assert_eq!(m.get(i, i), (-lambda[i] * t).exp());
            for j in 0..i {
                prop_assert!(m.get(i, j) >= 0.0, "negative element at ({}, {})", i, j);
                prop_assert!(m.get(i, j).is_finite());
            }
            for j in i + 1..len {
                prop_assert_eq!(m.get(i, j), 0.0);
            }
        }
    }

    /// Invariant: an incremental refill from length L to L+1 is bit-exact
    /// against a from-scratch fill at L+1.
    #[test]
    fn prop_incremental_equals_scratch((lambda, branch, t) in chain_strategy()) {
        let len = lambda.len();
        let loop_rank = vec![-1i32; len];

        let full = make_view(len, &lambda, &branch, &[], &[], &loop_rank, 0);
        let mut scratch = TransferMatrix::new();
        fill_decay(&mut scratch, &full, t, &NumericsConfig::default()).expect("fill");

        let short = make_view(
            len - 1,
            &lambda[..len - 1],
            &branch[..len - 1],
            &[],
            &[],
            &loop_rank[..len - 1],
            0,
        );
        let mut incremental = TransferMatrix::new();
        fill_decay(&mut incremental, &short, t, &NumericsConfig::default()).expect("fill");
        let grown = make_view(len, &lambda, &branch, &[], &[], &loop_rank, len - 1);
        fill_decay(&mut incremental, &grown, t, &NumericsConfig::default()).expect("fill");

        prop_assert_eq!(scratch, incremental);
    }

    /// Invariant: the same reuse contract holds for transmutation fills
    /// with per-flux destruction rates.
    #[test]
    fn prop_transmutation_incremental(
        (lambda, branch, t) in chain_strategy(),
        seed in 1e-6f64..1e-1,
    ) {
        let len = lambda.len();
        let loop_rank = vec![-1i32; len];
        let dest: Vec<f64> = (0..len).map(|i| seed * (i as f64 + 1.0)).collect();
        let prod: Vec<f64> = (0..len)
            .map(|i| (if i == 0 { 0.0 } else { seed * 0.5 }) + branch[i])
            .collect();

        let full = make_view(len, &lambda, &branch, &prod, &dest, &loop_rank, 0);
        let mut scratch = TransferMatrix::new();
        fill_transmutation(&mut scratch, &full, t.min(1e4), 0, &NumericsConfig::default())
            .expect("fill");

        let short = make_view(
            len - 1,
            &lambda[..len - 1],
            &branch[..len - 1],
            &prod[..len - 1],
            &dest[..len - 1],
            &loop_rank[..len - 1],
            0,
        );
        let mut incremental = TransferMatrix::new();
        fill_transmutation(&mut incremental, &short, t.min(1e4), 0, &NumericsConfig::default())
            .expect("fill");
        let grown = make_view(len, &lambda, &branch, &prod, &dest, &loop_rank, len - 1);
        fill_transmutation(&mut incremental, &grown, t.min(1e4), 0, &NumericsConfig::default())
            .expect("fill");

        prop_assert_eq!(scratch, incremental);
    }

    /// Property 5: the two-nuclide transfer element agrees with the exact
    /// analytic solution, including near-equal rates where the Laplace
    /// branch takes over.
    #[test]
    fn prop_two_nuclide_against_analytic(
        rate in 1e-8f64..1e-3,
        rel_delta in prop_oneof![Just(0.0), 1e-9f64..5e-4, 1e-2f64..1.0],
        scaled_t in 0.05f64..3.0,
    ) {
        let a = rate;
        let b = rate * (1.0 + rel_delta);
        let t = scaled_t / rate;
        let lambda = [a, b];
        let branch = [0.0, a];
        let loop_rank = [-1i32, -1];
        let view = make_view(2, &lambda, &branch, &[], &[], &loop_rank, 0);

        let mut m = TransferMatrix::new();
        fill_decay(&mut m, &view, t, &NumericsConfig::default()).expect("fill");

        // exact: a (e^{-at} - e^{-bt}) / (b - a), with the series form when
        // the difference would cancel
        let delta_t = (b - a) * t;
        let expected = if delta_t.abs() < 1e-6 {
            a * t * (-a * t).exp() * (1.0 - delta_t / 2.0 + delta_t * delta_t / 6.0)
        } else {
            a * ((-a * t).exp() - (-b * t).exp()) / (b - a)
        };
        let got = m.get(1, 0);
        prop_assert!(
            (got - expected).abs() <= 1e-5 * expected.abs().max(1e-12),
            "got {}, expected {} (rel_delta {})",
            got,
            expected,
            rel_delta
        );
    }
}
