//! Transfer Matrix Engine
//!
//! Lower-triangular transfer matrices for one irradiation or decay step.
//! Row `i` of a fill depends only on rows `<= i`, and successive builds for
//! a growing chain preserve every row below the chain's `new_rank` verbatim
//! (incremental reuse contract) - only the rows the chain actually changed
//! are recomputed. The same contract holds for the triangular product, so a
//! whole schedule's worth of composed matrices refreshes in O(changed rows).
//!
//! Element methods are chosen adaptively per element: Bateman closed form
//! by default, Laplace inversion when removal rates collide within
//! tolerance, Laplace expansion when the span crosses a chain loop.

pub mod bateman;

use crate::config::NumericsConfig;
use crate::error::NumericalError;

use bateman::{laplace_expansion, laplace_inverse, rates_coincide, rates_degenerate};

/// Chain direction: which end of a reaction path the root sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Roots are initial nuclides; paths walk to daughters
    #[default]
    Forward,
    /// Roots are targets; paths walk to parents
    Reverse,
}

/// Borrowed view of the chain state the matrix kernels need.
///
/// Index space runs down the solution: in reverse mode the chain ranks map
/// in reverse onto the indices. `loop_rank` stays in rank space.
#[derive(Debug, Clone, Copy)]
pub struct ChainView<'a> {
    pub length: usize,
    /// First row the current fill must recompute
    pub new_rank: usize,
    pub mode: Mode,
    pub n_fluxes: usize,
    /// Decay constants per index, length `length`
    pub lambda: &'a [f64],
    /// Decay branch rates per index (production side), length `length`
    pub branch: &'a [f64],
    /// Collapsed production rates, `n_fluxes * length`
    pub prod: &'a [f64],
    /// Collapsed destruction rates, `n_fluxes * length`
    pub dest: &'a [f64],
    /// Loop ranks in rank space, -1 where no loop
    pub loop_rank: &'a [i32],
}

impl ChainView<'_> {
    /// Map a solution index back to its chain rank
    fn rank_of(&self, idx: usize) -> usize {
        match self.mode {
            Mode::Forward => idx,
            Mode::Reverse => self.length - 1 - idx,
        }
    }

    /// Whether the span `[col, row]` (solution indices) crosses a loop
    fn loop_in_span(&self, row: usize, col: usize) -> bool {
        (col..=row).any(|idx| self.loop_rank[self.rank_of(idx)] >= 0)
    }
}

/// Lower-triangular matrix stored as `dim*(dim+1)/2` doubles, row-major
/// with the diagonal closing each row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferMatrix {
    dim: usize,
    data: Vec<f64>,
}

#[inline]
fn tri(i: usize, j: usize) -> usize {
    i * (i + 1) / 2 + j
}

impl TransferMatrix {
    pub fn new() -> Self {
        TransferMatrix::default()
    }

    /// Identity of the given dimension
    pub fn identity(dim: usize) -> Self {
        let mut data = vec![0.0; dim * (dim + 1) / 2];
        for i in 0..dim {
            data[tri(i, i)] = 1.0;
        }
        TransferMatrix { dim, data }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Element `(i, j)`; zero above the diagonal
    pub fn get(&self, i: usize, j: usize) -> f64 {
        if j > i || i >= self.dim {
            0.0
        } else {
            self.data[tri(i, j)]
        }
    }

    /// Start a fill at the new dimension: allocates the triangle and copies
    /// the rows below `new_rank` from the previous contents.
    fn begin_fill(&self, length: usize, new_rank: usize) -> Vec<f64> {
        let size = length * (length + 1) / 2;
        let old_size = new_rank * (new_rank + 1) / 2;
        let mut data = vec![0.0; size];
        debug_assert!(old_size <= self.data.len() || new_rank == 0);
        data[..old_size].copy_from_slice(&self.data[..old_size]);
        data
    }

    fn install(&mut self, data: Vec<f64>, dim: usize) {
        self.data = data;
        self.dim = dim;
    }
}

/// Validate one freshly computed element: clamp round-off negatives, refuse
/// anything worse.
fn check_element(
    value: f64,
    row: usize,
    col: usize,
    numerics: &NumericsConfig,
) -> Result<f64, NumericalError> {
    if !value.is_finite() {
        return Err(NumericalError::NonFiniteElement { row, col });
    }
    if value < 0.0 {
        if value > -numerics.negative_clamp {
            return Ok(0.0);
        }
        return Err(NumericalError::NonFiniteElement { row, col });
    }
    Ok(value)
}

/// Fill the decay transfer matrix `D(t)`.
///
/// Elements use Bateman unless the span's decay constants collide (a pure
/// decay loop, or a coincidence within tolerance), in which case that
/// element routes through Laplace inversion. The choice depends only on
/// the span itself, which keeps incremental refills bit-exact against
/// from-scratch builds.
pub fn fill_decay(
    matrix: &mut TransferMatrix,
    view: &ChainView<'_>,
    time: f64,
    numerics: &NumericsConfig,
) -> Result<(), NumericalError> {
    let mut data = matrix.begin_fill(view.length, view.new_rank);

    for row in view.new_rank..view.length {
        for col in 0..row {
            let mut element = 1.0;
            for k in col + 1..=row {
                element *= view.branch[k];
            }
            if element > 0.0 {
                let span = &view.lambda[col..=row];
                let phi = match bateman::bateman(span, time, numerics.degenerate_tolerance) {
                    Some(phi) => phi,
                    None => laplace_inverse(span, time, numerics.degenerate_tolerance),
                };
                element *= phi;
            }
            data[tri(row, col)] = check_element(element, row, col, numerics)?;
        }
        data[tri(row, row)] = (-view.lambda[row] * time).exp();
    }

    matrix.install(data, view.length);
    Ok(())
}

/// Fill the transmutation transfer matrix `T(t)` for one flux.
pub fn fill_transmutation(
    matrix: &mut TransferMatrix,
    view: &ChainView<'_>,
    time: f64,
    flux_num: usize,
    numerics: &NumericsConfig,
) -> Result<(), NumericalError> {
    let offset = flux_num * view.length;
    let dest = &view.dest[offset..offset + view.length];
    let prod = &view.prod[offset..offset + view.length];
    let mut data = matrix.begin_fill(view.length, view.new_rank);

    for row in view.new_rank..view.length {
        for col in 0..row {
            data[tri(row, col)] = check_element(
                transfer_element(view, prod, dest, time, row, col, numerics),
                row,
                col,
                numerics,
            )?;
        }
        data[tri(row, row)] = (-dest[row] * time).exp();
    }

    matrix.install(data, view.length);
    Ok(())
}

/// One off-diagonal transmutation element, method chosen adaptively:
/// Laplace expansion across loops, Laplace inversion for colliding rates,
/// Bateman otherwise (with transparent fallback on underflow).
fn transfer_element(
    view: &ChainView<'_>,
    prod: &[f64],
    dest: &[f64],
    time: f64,
    row: usize,
    col: usize,
    numerics: &NumericsConfig,
) -> f64 {
    let mut element = 1.0;
    for k in col + 1..=row {
        element *= prod[k];
    }
    if element <= 0.0 {
        return 0.0;
    }

    let span = &dest[col..=row];
    let tol = numerics.degenerate_tolerance;
    let phi = if view.loop_in_span(row, col) {
        laplace_expansion(span, time)
    } else if rates_degenerate(span, tol) || rates_coincide(&view.lambda[col..=row], span, tol) {
        laplace_inverse(span, time, tol)
    } else {
        match bateman::bateman(span, time, tol) {
            Some(phi) => phi,
            None => laplace_inverse(span, time, tol),
        }
    };
    element * phi
}

/// Triangular product `C = A * B` under the reuse contract: rows below
/// `new_rank` are copied from the previous contents of `result`.
pub fn multiply(
    result: &mut TransferMatrix,
    a: &TransferMatrix,
    b: &TransferMatrix,
    view: &ChainView<'_>,
) -> Result<(), NumericalError> {
    debug_assert_eq!(a.dim, view.length);
    debug_assert_eq!(b.dim, view.length);
    let mut data = result.begin_fill(view.length, view.new_rank);

    for row in view.new_rank..view.length {
        for col in 0..=row {
            let mut sum = 0.0;
            for term in col..=row {
                sum += a.data[tri(row, term)] * b.data[tri(term, col)];
            }
            if !sum.is_finite() {
                return Err(NumericalError::NonFiniteElement { row, col });
            }
            data[tri(row, col)] = sum;
        }
    }

    result.install(data, view.length);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn numerics() -> NumericsConfig {
        NumericsConfig::default()
    }

    fn full_view<'a>(
        length: usize,
        lambda: &'a [f64],
        branch: &'a [f64],
        prod: &'a [f64],
        dest: &'a [f64],
        loop_rank: &'a [i32],
    ) -> ChainView<'a> {
        ChainView {
            length,
            new_rank: 0,
            mode: Mode::Forward,
            n_fluxes: 1,
            lambda,
            branch,
            prod,
            dest,
            loop_rank,
        }
    }

    #[test]
    fn test_decay_two_chain() {
        // co-60 -> ni-60: N_b(t) = 1 - e^{-lt} with unit branch fraction
        let lambda = [1e-8, 0.0];
        let branch = [0.0, 1e-8];
        let loop_rank = [-1, -1];
        let view = full_view(2, &lambda, &branch, &[], &[], &loop_rank);

        let mut d = TransferMatrix::new();
        let t = 1e8;
        fill_decay(&mut d, &view, t, &numerics()).expect("fill");

        assert_relative_eq!(d.get(0, 0), (-1e-8 * t).exp(), max_relative = 1e-12);
        assert_relative_eq!(d.get(1, 1), 1.0, max_relative = 1e-12);
        assert_relative_eq!(d.get(1, 0), 1.0 - (-1e-8f64 * t).exp(), max_relative = 1e-10);
    }

    #[test]
    fn test_decay_degenerate_routes_to_laplace() {
        // equal decay constants: N_b(t) = l t e^{-l t}
        let l = 1e-6;
        let lambda = [l, l, 0.0];
        let branch = [0.0, l, l];
        let loop_rank = [-1, -1, -1];
        let view = full_view(3, &lambda, &branch, &[], &[], &loop_rank);

        let mut d = TransferMatrix::new();
        let t = 1e6;
        fill_decay(&mut d, &view, t, &numerics()).expect("fill");
        assert_relative_eq!(d.get(1, 0), l * t * (-l * t).exp(), max_relative = 1e-10);
    }

    #[test]
    fn test_transmutation_diagonal_and_element() {
        let lambda = [0.0, 0.0];
        let branch = [0.0, 0.0];
        let prod = [0.0, 0.1];
        let dest = [0.1, 0.0];
        let loop_rank = [-1, -1];
        let view = full_view(2, &lambda, &branch, &prod, &dest, &loop_rank);

        let mut t_mat = TransferMatrix::new();
        fill_transmutation(&mut t_mat, &view, 1.0, 0, &numerics()).expect("fill");

        assert_relative_eq!(t_mat.get(0, 0), (-0.1f64).exp(), max_relative = 1e-12);
        // production 0.1 over span with rates [0.1, 0]: phi = (1 - e^{-0.1})/0.1
        let expected = 1.0 - (-0.1f64).exp();
        assert_relative_eq!(t_mat.get(1, 0), expected, max_relative = 1e-10);
    }

    #[test]
    fn test_loop_span_uses_expansion() {
        // a -> b -> a loop: spanned destruction rates repeat exactly
        let da = 0.2;
        let db = 0.05;
        let lambda = [0.0, 0.0, 0.0];
        let branch = [0.0, 0.0, 0.0];
        let prod = [0.0, da, db];
        let dest = [da, db, da];
        let loop_rank = [-1, -1, 0];
        let view = full_view(3, &lambda, &branch, &prod, &dest, &loop_rank);
        assert!(view.loop_in_span(2, 0));

        let mut t_mat = TransferMatrix::new();
        fill_transmutation(&mut t_mat, &view, 1.0, 0, &numerics()).expect("fill");

        // phi for 1/((s+da)^2 (s+db)) against the closed form
        let d = db - da;
        let t = 1.0;
        let phi =
            (-da * t).exp() * (t / d - 1.0 / (d * d)) + (-db * t).exp() / (d * d);
        assert_relative_eq!(t_mat.get(2, 0), da * db * phi, max_relative = 1e-9);
    }

    #[test]
    fn test_incremental_fill_matches_scratch() {
        let lambda = [3e-7, 1e-7, 0.0];
        let branch = [0.0, 3e-7, 1e-7];
        let loop_rank = [-1, -1, -1];

        // scratch build at length 3
        let view3 = full_view(3, &lambda, &branch, &[], &[], &loop_rank);
        let mut scratch = TransferMatrix::new();
        fill_decay(&mut scratch, &view3, 5e6, &numerics()).expect("fill");

        // incremental: length 2 first, then grow with new_rank = 2
        let view2 = full_view(2, &lambda[..2], &branch[..2], &[], &[], &loop_rank[..2]);
        let mut incremental = TransferMatrix::new();
        fill_decay(&mut incremental, &view2, 5e6, &numerics()).expect("fill");
        let mut grown = view3;
        grown.new_rank = 2;
        fill_decay(&mut incremental, &grown, 5e6, &numerics()).expect("fill");

        // bit-exact equality, not approximate
        assert_eq!(scratch, incremental);
    }

    #[test]
    fn test_multiply_triangular() {
        let lambda = [0.0; 2];
        let branch = [0.0; 2];
        let loop_rank = [-1, -1];
        let view = full_view(2, &lambda, &branch, &[], &[], &loop_rank);

        let mut a = TransferMatrix::identity(2);
        a.data = vec![2.0, 1.0, 3.0];
        let mut b = TransferMatrix::identity(2);
        b.data = vec![5.0, 7.0, 11.0];

        let mut c = TransferMatrix::new();
        multiply(&mut c, &a, &b, &view).expect("multiply");
        // [2 0; 1 3] * [5 0; 7 11] = [10 0; 26 33]
        assert_eq!(c.data, vec![10.0, 26.0, 33.0]);
    }

    #[test]
    fn test_identity() {
        let id = TransferMatrix::identity(3);
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(id.get(i, j), if i == j { 1.0 } else { 0.0 });
            }
        }
    }
}
