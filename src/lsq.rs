use ndarray::{Array2, ArrayView1, ArrayView2};
use thiserror::Error;

use crate::basis::{self, BasisScratch};

const SINGULARITY_TOL: f64 = 1e-12;

/// Errors from the banded least-squares solve.
#[derive(Debug, Error)]
pub enum LsqError {
    #[error(
        "band system is singular at coefficient {index}: the knot placement left the \
         least-squares problem rank-deficient"
    )]
    SingularSystem { index: usize },
}

/// Weighted least-squares solution for one fixed knot vector.
#[derive(Debug)]
pub(crate) struct BandedFit {
    /// One coefficient row per coordinate dimension, `n - k - 1` columns.
    pub(crate) coefficients: Array2<f64>,
    /// Weighted residual sum of squares over all points and dimensions.
    pub(crate) residual: f64,
    /// Residual mass attributed to each knot span, with samples on a span
    /// boundary split half and half between the adjacent spans.
    pub(crate) span_residuals: Vec<f64>,
}

/// Fits B-spline coefficients to `points` at the parameters `u` for a fixed
/// knot vector, weighted per sample.
///
/// Each observation row has only the `k + 1` non-zero basis values, so the
/// row is rotated into an `(n-k-1) x (k+1)` upper band by Givens rotations
/// as it is generated; the factorization costs `O(m (k+1)^2)` and is shared
/// by all coordinate dimensions, whose right-hand sides ride along through
/// the same rotations. Back-substitution then runs once per dimension.
pub(crate) fn solve_banded_lsq(
    points: ArrayView2<'_, f64>,
    u: ArrayView1<'_, f64>,
    weights: ArrayView1<'_, f64>,
    knots: ArrayView1<'_, f64>,
    degree: usize,
) -> Result<BandedFit, LsqError> {
    let (idim, m) = points.dim();
    let n = knots.len();
    let bandwidth = degree + 1;
    let num_coef = n - bandwidth;

    let mut band = Array2::<f64>::zeros((num_coef, bandwidth));
    let mut rhs = Array2::<f64>::zeros((num_coef, idim));

    // Basis rows are kept for the residual pass after back-substitution.
    let mut rows = Array2::<f64>::zeros((m, bandwidth));
    let mut starts = vec![0usize; m];

    let mut scratch = BasisScratch::new(degree);
    let mut h = vec![0.0; bandwidth];
    let mut y = vec![0.0; idim];

    for it in 0..m {
        let start = basis::nonzero_basis_into(u[it], degree, knots, &mut h, &mut scratch);
        starts[it] = start;
        for j in 0..bandwidth {
            rows[[it, j]] = h[j];
        }

        let w = weights[it];
        for value in h.iter_mut() {
            *value *= w;
        }
        for d in 0..idim {
            y[d] = points[[d, it]] * w;
        }

        // Rotate the weighted row into the band, one pivot per column.
        for i in 0..bandwidth {
            let pivot = h[i];
            if pivot == 0.0 {
                continue;
            }
            let row = start + i;
            let (cos, sin) = givens(pivot, &mut band[[row, 0]]);
            for d in 0..idim {
                rotate(cos, sin, &mut y[d], &mut rhs[[row, d]]);
            }
            for i2 in (i + 1)..bandwidth {
                rotate(cos, sin, &mut h[i2], &mut band[[row, i2 - i]]);
            }
        }
    }

    check_diagonal(&band)?;

    let mut coefficients = Array2::<f64>::zeros((idim, num_coef));
    for d in 0..idim {
        back_substitute(&band, &rhs, d, &mut coefficients, bandwidth);
    }

    let (residual, span_residuals) = attribute_residuals(
        points,
        u,
        weights,
        knots,
        degree,
        &rows,
        &starts,
        &coefficients,
    );

    Ok(BandedFit {
        coefficients,
        residual,
        span_residuals,
    })
}

/// One Givens rotation eliminating `pivot` against the band diagonal
/// `diag`, which is updated in place to the rotated magnitude.
#[inline]
fn givens(pivot: f64, diag: &mut f64) -> (f64, f64) {
    let ww = *diag;
    let dd = if pivot.abs() >= ww {
        pivot.abs() * (1.0 + (ww / pivot).powi(2)).sqrt()
    } else {
        ww * (1.0 + (pivot / ww).powi(2)).sqrt()
    };
    let cos = ww / dd;
    let sin = pivot / dd;
    *diag = dd;
    (cos, sin)
}

/// Applies a Givens rotation to the pair `(a, b)` in place.
#[inline]
fn rotate(cos: f64, sin: f64, a: &mut f64, b: &mut f64) {
    let stor1 = *a;
    let stor2 = *b;
    *b = cos * stor2 + sin * stor1;
    *a = cos * stor1 - sin * stor2;
}

fn check_diagonal(band: &Array2<f64>) -> Result<(), LsqError> {
    let diag_max = band.column(0).fold(0.0f64, |acc, &d| acc.max(d));
    let threshold = SINGULARITY_TOL * diag_max.max(1.0);
    for (index, &d) in band.column(0).iter().enumerate() {
        if d <= threshold {
            return Err(LsqError::SingularSystem { index });
        }
    }
    Ok(())
}

/// Solves the banded upper-triangular system for one coordinate dimension.
fn back_substitute(
    band: &Array2<f64>,
    rhs: &Array2<f64>,
    dim: usize,
    coefficients: &mut Array2<f64>,
    bandwidth: usize,
) {
    let num_coef = band.nrows();
    coefficients[[dim, num_coef - 1]] = rhs[[num_coef - 1, dim]] / band[[num_coef - 1, 0]];
    for i in (0..num_coef - 1).rev() {
        let mut value = rhs[[i, dim]];
        let reach = bandwidth.min(num_coef - i);
        for j in 1..reach {
            value -= band[[i, j]] * coefficients[[dim, i + j]];
        }
        coefficients[[dim, i]] = value / band[[i, 0]];
    }
}

/// Computes the total weighted residual and its per-span attribution from
/// the stored basis rows. A sample that opens a new span donates half of its
/// squared residual to the span it closes.
#[allow(clippy::too_many_arguments)]
fn attribute_residuals(
    points: ArrayView2<'_, f64>,
    u: ArrayView1<'_, f64>,
    weights: ArrayView1<'_, f64>,
    knots: ArrayView1<'_, f64>,
    degree: usize,
    rows: &Array2<f64>,
    starts: &[usize],
    coefficients: &Array2<f64>,
) -> (f64, Vec<f64>) {
    let (idim, m) = points.dim();
    let bandwidth = degree + 1;
    let num_spans = knots.len() - 2 * degree - 1;

    let mut span_residuals = vec![0.0; num_spans];
    let mut residual = 0.0;
    let mut partial = 0.0;
    let mut span = 0usize;
    let mut closed = 0usize;

    for it in 0..m {
        let mut crossings = 0usize;
        while span + 1 < num_spans && u[it] >= knots[degree + span + 1] {
            span += 1;
            crossings += 1;
        }

        let mut term = 0.0;
        let start = starts[it];
        for d in 0..idim {
            let mut value = 0.0;
            for j in 0..bandwidth {
                value += coefficients[[d, start + j]] * rows[[it, j]];
            }
            let r = weights[it] * (value - points[[d, it]]);
            term += r * r;
        }
        residual += term;
        partial += term;

        if crossings > 0 {
            let shared = 0.5 * term;
            span_residuals[closed] = partial - shared;
            closed += 1;
            for _ in 1..crossings {
                span_residuals[closed] = 0.0;
                closed += 1;
            }
            partial = shared;
        }
    }
    span_residuals[closed] = partial;

    (residual, span_residuals)
}
