//! Bateman and Laplace Kernels
//!
//! The off-diagonal transfer element for a chain span `[j, i]` is the
//! inverse Laplace transform of `prod_k 1/(s + r_k)` over the span's
//! removal rates. Three evaluation methods, chosen adaptively:
//!
//! - **Bateman**: the closed-form sum
//!   `phi = sum_m exp(-r_m t) / prod_{k != m} (r_k - r_m)`,
//!   valid for pairwise-distinct rates and well-conditioned only when the
//!   exponentials do not cancel each other away.
//! - **Laplace inversion**: partial fractions with pole multiplicities,
//!   folding repeated (or near-repeated, within tolerance) rates into the
//!   `t^k exp(-r t) / k!` family.
//! - **Laplace expansion**: a series evaluation of the same transform as
//!   the corner entry of a bidiagonal matrix exponential. Slower, but free
//!   of the cancellation that wrecks the other two when `r t` spans are
//!   small or poles crowd together; the chain-loop case lands here.
//!
//! Both closed forms watch their own conditioning (largest intermediate
//! term against the final sum) and hand the element to the series when too
//! many digits cancel.

/// Denominator magnitude below which the Bateman sum reports failure
const DENOM_UNDERFLOW: f64 = 1e-250;

/// A closed-form result must retain this fraction of its largest term,
/// or the element is recomputed by series
const CONDITION_FLOOR: f64 = 1e-8;

/// Bateman sum over the span rates.
///
/// Returns `None` when any two rates are within `tolerance` (relative) of
/// each other, a denominator product underflows, or cancellation between
/// the exponential terms eats the result; every `None` routes the caller
/// to a Laplace method.
pub fn bateman(rates: &[f64], t: f64, tolerance: f64) -> Option<f64> {
    if t == 0.0 {
        return Some(if rates.len() <= 1 { 1.0 } else { 0.0 });
    }
    if rates_degenerate(rates, tolerance) {
        return None;
    }
    let mut sum = 0.0;
    let mut max_term = 0.0f64;
    for (m, &rm) in rates.iter().enumerate() {
        let mut denom = 1.0;
        for (k, &rk) in rates.iter().enumerate() {
            if k != m {
                denom *= rk - rm;
            }
        }
        if denom.abs() < DENOM_UNDERFLOW || !denom.is_finite() {
            return None;
        }
        let term = (-rm * t).exp() / denom;
        max_term = max_term.max(term.abs());
        sum += term;
    }
    if sum < 0.0 || (max_term > 0.0 && sum < max_term * CONDITION_FLOOR) {
        return None;
    }
    Some(sum)
}

/// Whether any pair of rates sits within the relative tolerance.
pub fn rates_degenerate(rates: &[f64], tolerance: f64) -> bool {
    for (i, &a) in rates.iter().enumerate() {
        for &b in &rates[i + 1..] {
            if close(a, b, tolerance) {
                return true;
            }
        }
    }
    false
}

/// Whether any rate of `a` coincides with any rate of `b`.
pub fn rates_coincide(a: &[f64], b: &[f64], tolerance: f64) -> bool {
    a.iter().any(|&x| b.iter().any(|&y| close(x, y, tolerance)))
}

fn close(a: f64, b: f64, tolerance: f64) -> bool {
    let scale = a.abs().max(b.abs());
    if scale == 0.0 {
        return true;
    }
    (a - b).abs() <= tolerance * scale
}

/// Laplace inversion with pole clustering at the given relative tolerance.
///
/// Rates within the tolerance collapse into one pole whose value is the
/// cluster mean and whose multiplicity is the cluster size. Falls through
/// to the series expansion when the partial fractions cancel too deeply.
pub fn laplace_inverse(rates: &[f64], t: f64, tolerance: f64) -> f64 {
    if t == 0.0 {
        return if rates.len() <= 1 { 1.0 } else { 0.0 };
    }
    let poles = cluster_rates(rates, tolerance);
    let (phi, max_term) = invert_product(&poles, t);
    let conditioned = phi.is_finite()
        && phi >= 0.0
        && (max_term == 0.0 || phi >= max_term * CONDITION_FLOOR);
    if conditioned {
        phi
    } else {
        laplace_expansion(rates, t)
    }
}

/// Laplace expansion: series evaluation of `L^-1[prod 1/(s + r_k)]` as the
/// `(0, n)` entry of `exp(J)` for the upper-bidiagonal
/// `J = diag(-r_i t) + superdiag(t)`. Exact for any rate configuration,
/// including the repeated rates of a chain loop, and cancellation-free
/// because the scaled exponential has non-negative entries.
pub fn laplace_expansion(rates: &[f64], t: f64) -> f64 {
    let m = rates.len();
    if t == 0.0 || m == 0 {
        return if m <= 1 { 1.0 } else { 0.0 };
    }

    // scale J down until a short Taylor series converges, then square back
    let c = rates.iter().fold(t, |acc, &r| acc.max(r * t));
    let s = if c > 0.5 {
        ((c / 0.5).log2().ceil() as u32).min(64)
    } else {
        0
    };
    let scale = 2.0f64.powi(s as i32);

    let idx = |i: usize, j: usize| i * m + j;
    let mut j_mat = vec![0.0; m * m];
    for i in 0..m {
        j_mat[idx(i, i)] = -rates[i] * t / scale;
        if i + 1 < m {
            j_mat[idx(i, i + 1)] = t / scale;
        }
    }

    // exp(J/2^s) by Taylor on the triangular storage
    let mut result = vec![0.0; m * m];
    let mut term = vec![0.0; m * m];
    for i in 0..m {
        result[idx(i, i)] = 1.0;
        term[idx(i, i)] = 1.0;
    }
    for k in 1..=32u32 {
        term = tri_mul(&term, &j_mat, m);
        let mut largest = 0.0f64;
        for (dst, src) in result.iter_mut().zip(term.iter_mut()) {
            *src /= f64::from(k);
            *dst += *src;
            largest = largest.max(src.abs());
        }
        if largest < 1e-30 {
            break;
        }
    }

    for _ in 0..s {
        result = tri_mul(&result, &result, m);
    }
    result[idx(0, m - 1)].max(0.0)
}

/// Upper-triangular product of two dense row-major `m x m` matrices.
fn tri_mul(a: &[f64], b: &[f64], m: usize) -> Vec<f64> {
    let mut c = vec![0.0; m * m];
    for i in 0..m {
        for j in i..m {
            let mut sum = 0.0;
            for k in i..=j {
                sum += a[i * m + k] * b[k * m + j];
            }
            c[i * m + j] = sum;
        }
    }
    c
}

/// One distinct pole and its multiplicity
#[derive(Debug, Clone, Copy)]
struct Pole {
    rate: f64,
    multiplicity: usize,
}

fn cluster_rates(rates: &[f64], tolerance: f64) -> Vec<Pole> {
    let mut poles: Vec<(f64, usize)> = Vec::new();
    for &r in rates {
        match poles.iter_mut().find(|(sum, n)| {
            let mean = *sum / *n as f64;
            close(mean, r, tolerance)
        }) {
            Some((sum, n)) => {
                *sum += r;
                *n += 1;
            }
            None => poles.push((r, 1)),
        }
    }
    poles
        .into_iter()
        .map(|(sum, n)| Pole {
            rate: sum / n as f64,
            multiplicity: n,
        })
        .collect()
}

/// Inverse Laplace transform of `prod_p 1/(s + a_p)^{m_p}` at time `t`:
///
/// ```text
/// phi = sum_p sum_{k=0}^{m_p-1}  F_p^{(k)}(-a_p)/k!  *  t^{m_p-1-k} e^{-a_p t} / (m_p-1-k)!
/// ```
///
/// with `F_p(s) = prod_{q != p} (s + a_q)^{-m_q}`. The derivatives follow
/// the logarithmic-derivative recursion
/// `F^{(n)} = sum_k C(n-1,k) g^{(n-1-k)} F^{(k)}` with
/// `g = F'/F = -sum_q m_q/(s + a_q)`. Returns the sum and the magnitude of
/// its largest contribution, for the caller's conditioning check.
fn invert_product(poles: &[Pole], t: f64) -> (f64, f64) {
    let mut phi = 0.0;
    let mut max_term = 0.0f64;
    for (p, pole) in poles.iter().enumerate() {
        let m = pole.multiplicity;
        let s = -pole.rate;

        let derivs = partial_derivatives(poles, p, s, m);

        let decay = (-pole.rate * t).exp();
        let mut k_fact = 1.0;
        for (k, &fk) in derivs.iter().enumerate() {
            if k > 0 {
                k_fact *= k as f64;
            }
            let power = m - 1 - k;
            let term = fk / k_fact * t.powi(power as i32) * decay / factorial(power);
            max_term = max_term.max(term.abs());
            phi += term;
        }
    }
    (phi, max_term)
}

/// Derivatives `F_p^{(0..n)}` of the deleted product at `s`.
fn partial_derivatives(poles: &[Pole], skip: usize, s: f64, n: usize) -> Vec<f64> {
    let mut f0 = 1.0;
    for (q, pole) in poles.iter().enumerate() {
        if q != skip {
            f0 *= (s + pole.rate).powi(-(pole.multiplicity as i32));
        }
    }

    // g^{(j)}(s) = -sum_q m_q (-1)^j j! / (s + a_q)^{j+1}
    let g_deriv = |j: usize| -> f64 {
        let sign = if j % 2 == 0 { 1.0 } else { -1.0 };
        let j_fact = factorial(j);
        let mut g = 0.0;
        for (q, pole) in poles.iter().enumerate() {
            if q != skip {
                g -= pole.multiplicity as f64 * sign * j_fact
                    / (s + pole.rate).powi(j as i32 + 1);
            }
        }
        g
    };

    let mut derivs = vec![f0];
    for order in 1..n {
        let mut fn_val = 0.0;
        for k in 0..order {
            fn_val += binomial(order - 1, k) * g_deriv(order - 1 - k) * derivs[k];
        }
        derivs.push(fn_val);
    }
    derivs
}

fn factorial(n: usize) -> f64 {
    (1..=n).map(|k| k as f64).product()
}

fn binomial(n: usize, k: usize) -> f64 {
    factorial(n) / (factorial(k) * factorial(n - k))
}
