use ndarray::{Array1, ArrayView1};
use thiserror::Error;

use crate::basis::{self, BasisError};

/// Errors from knot-vector construction and rank screening.
#[derive(Debug, Error)]
pub enum KnotError {
    #[error(
        "interior knot {value} lies outside the open parameter range ({begin}, {end})"
    )]
    KnotOutsideRange { value: f64, begin: f64, end: f64 },

    #[error("interior knots must be strictly increasing, but knot {index} ({value}) is not")]
    NotStrictlyIncreasing { index: usize, value: f64 },

    #[error(
        "Schoenberg-Whitney condition violated: no parameter sample lies strictly inside the \
         support of basis function {index}, so the least-squares system is rank-deficient"
    )]
    SchoenbergWhitney { index: usize },

    #[error(transparent)]
    Basis(#[from] BasisError),
}

/// The smallest clamped knot vector for a degree-`degree` spline on
/// `[begin, end]`: both boundary values repeated `degree + 1` times, no
/// interior knots, a single polynomial span.
pub fn minimal_knot_vector(begin: f64, end: f64, degree: usize) -> Array1<f64> {
    let mut knots = Array1::<f64>::zeros(2 * (degree + 1));
    for i in 0..=degree {
        knots[i] = begin;
        knots[degree + 1 + i] = end;
    }
    knots
}

/// The knot vector that makes the least-squares spline interpolate every
/// sample: `m + degree + 1` knots with interior knots at the data parameters
/// for odd degrees and at midpoints of consecutive parameters for even
/// degrees. Requires strictly increasing `u`.
pub fn interpolating_knot_vector(u: ArrayView1<'_, f64>, degree: usize) -> Array1<f64> {
    let m = u.len();
    let n = m + degree + 1;
    let interior = m - degree - 1;
    let mut knots = Array1::<f64>::zeros(n);

    let begin = u[0];
    let end = u[m - 1];
    for i in 0..=degree {
        knots[i] = begin;
        knots[n - 1 - i] = end;
    }

    let half = degree / 2;
    for i in 0..interior {
        knots[degree + 1 + i] = if degree % 2 == 1 {
            u[i + half + 1]
        } else {
            0.5 * (u[i + half] + u[i + half + 1])
        };
    }

    knots
}

/// Upper bound on the knot count ever needed for `m` samples: the
/// interpolating vector length `m + degree + 1`.
pub fn max_knot_count(m: usize, degree: usize) -> usize {
    m + degree + 1
}

/// Builds a full clamped knot vector from caller-supplied interior knots,
/// validating that they are finite, strictly increasing, and strictly inside
/// the parameter range.
pub fn build_clamped_knots(
    interior: ArrayView1<'_, f64>,
    begin: f64,
    end: f64,
    degree: usize,
) -> Result<Array1<f64>, KnotError> {
    for (index, &value) in interior.iter().enumerate() {
        if !value.is_finite() || value <= begin || value >= end {
            return Err(KnotError::KnotOutsideRange { value, begin, end });
        }
        if index > 0 && value <= interior[index - 1] {
            return Err(KnotError::NotStrictlyIncreasing { index, value });
        }
    }

    let n = interior.len() + 2 * (degree + 1);
    let mut knots = Array1::<f64>::zeros(n);
    for i in 0..=degree {
        knots[i] = begin;
        knots[n - 1 - i] = end;
    }
    for (i, &value) in interior.iter().enumerate() {
        knots[degree + 1 + i] = value;
    }

    basis::validate_knot_vector(knots.view(), degree)?;
    Ok(knots)
}

/// Verifies the Schoenberg-Whitney rank condition for sorted parameters `u`
/// against a clamped knot vector: there must be a strictly increasing
/// subsequence of samples `u[i_j]` with `t[j] < u[i_j] < t[j+k+1]` for every
/// basis index `j`. A violation means some basis function sees no data and
/// the least-squares design loses rank.
pub fn verify_schoenberg_whitney(
    knots: ArrayView1<'_, f64>,
    degree: usize,
    u: ArrayView1<'_, f64>,
) -> Result<(), KnotError> {
    let n = knots.len();
    let num_basis = n - degree - 1;
    let m = u.len();

    // Boundary basis functions only need the end samples inside their support.
    if u[0] >= knots[degree + 1] {
        return Err(KnotError::SchoenbergWhitney { index: 0 });
    }
    if u[m - 1] <= knots[n - degree - 2] {
        return Err(KnotError::SchoenbergWhitney {
            index: num_basis - 1,
        });
    }

    let mut i = 0usize;
    for j in 1..num_basis.saturating_sub(1) {
        let lower = knots[j];
        let upper = knots[j + degree + 1];
        loop {
            i += 1;
            if i >= m {
                return Err(KnotError::SchoenbergWhitney { index: j });
            }
            if u[i] > lower {
                break;
            }
        }
        if u[i] >= upper {
            return Err(KnotError::SchoenbergWhitney { index: j });
        }
    }

    Ok(())
}

/// Picks the location for the next interior knot during the smoothing
/// search. `span_residuals` carries the accumulated squared residual of each
/// knot span `[t[k+j], t[k+j+1]]`. The winning span has the largest
/// residual, ties broken by larger span width and then by earlier span
/// index; the new knot coincides with the median sample strictly inside the
/// winner. Returns `None` when no span holds an interior sample, in which
/// case the search cannot make progress.
pub(crate) fn propose_knot(
    knots: ArrayView1<'_, f64>,
    degree: usize,
    u: ArrayView1<'_, f64>,
    span_residuals: &[f64],
) -> Option<f64> {
    let num_spans = knots.len() - 2 * degree - 1;
    debug_assert_eq!(span_residuals.len(), num_spans);

    let mut best: Option<(f64, f64, f64)> = None; // (residual, width, candidate)
    let mut i = 0usize;

    for (j, &residual) in span_residuals.iter().enumerate() {
        let lower = knots[degree + j];
        let upper = knots[degree + j + 1];

        while i < u.len() && u[i] <= lower {
            i += 1;
        }
        let first = i;
        while i < u.len() && u[i] < upper {
            i += 1;
        }
        let count = i - first;
        if count == 0 {
            continue;
        }

        let width = upper - lower;
        let candidate = u[first + count / 2];
        let replace = match best {
            None => true,
            Some((best_residual, best_width, _)) => {
                residual > best_residual || (residual == best_residual && width > best_width)
            }
        };
        if replace {
            best = Some((residual, width, candidate));
        }
    }

    best.map(|(_, _, candidate)| candidate)
}

/// Returns a copy of `knots` with `value` inserted in sorted position.
pub(crate) fn insert_interior_knot(knots: &Array1<f64>, value: f64) -> Array1<f64> {
    let n = knots.len();
    let mut extended = Array1::<f64>::zeros(n + 1);
    let position = knots.iter().position(|&t| t > value).unwrap_or(n);
    for i in 0..position {
        extended[i] = knots[i];
    }
    extended[position] = value;
    for i in position..n {
        extended[i + 1] = knots[i];
    }
    extended
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn minimal_vector_is_a_single_clamped_span() {
        let knots = minimal_knot_vector(0.0, 1.0, 3);
        let expected = array![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        assert_abs_diff_eq!(
            knots.as_slice().unwrap(),
            expected.as_slice().unwrap(),
            epsilon = 0.0
        );
    }

    #[test]
    fn interpolating_knots_sit_on_data_parameters_for_odd_degrees() {
        let u = array![0.0, 0.1, 0.3, 0.5, 0.6, 0.8, 1.0];
        let knots = interpolating_knot_vector(u.view(), 3);
        assert_eq!(knots.len(), 7 + 3 + 1);
        // interior count m - k - 1 = 3, taken from u[2..5]
        let expected = array![
            0.0, 0.0, 0.0, 0.0, 0.3, 0.5, 0.6, 1.0, 1.0, 1.0, 1.0
        ];
        assert_abs_diff_eq!(
            knots.as_slice().unwrap(),
            expected.as_slice().unwrap(),
            epsilon = 1e-15
        );
    }

    #[test]
    fn interpolating_knots_use_midpoints_for_even_degrees() {
        let u = array![0.0, 0.2, 0.4, 0.6, 0.8, 1.0];
        let knots = interpolating_knot_vector(u.view(), 2);
        assert_eq!(knots.len(), 6 + 2 + 1);
        // interior count m - k - 1 = 3, midpoints of (u1,u2), (u2,u3), (u3,u4)
        let expected = array![0.0, 0.0, 0.0, 0.3, 0.5, 0.7, 1.0, 1.0, 1.0];
        assert_abs_diff_eq!(
            knots.as_slice().unwrap(),
            expected.as_slice().unwrap(),
            epsilon = 1e-15
        );
    }

    #[test]
    fn clamped_construction_rejects_misplaced_interior_knots() {
        let outside = array![0.5, 1.2];
        assert!(matches!(
            build_clamped_knots(outside.view(), 0.0, 1.0, 3),
            Err(KnotError::KnotOutsideRange { .. })
        ));

        let tied = array![0.4, 0.4];
        assert!(matches!(
            build_clamped_knots(tied.view(), 0.0, 1.0, 3),
            Err(KnotError::NotStrictlyIncreasing { index: 1, .. })
        ));

        let good = array![0.25, 0.75];
        let knots = build_clamped_knots(good.view(), 0.0, 1.0, 2).unwrap();
        let expected = array![0.0, 0.0, 0.0, 0.25, 0.75, 1.0, 1.0, 1.0];
        assert_abs_diff_eq!(
            knots.as_slice().unwrap(),
            expected.as_slice().unwrap(),
            epsilon = 0.0
        );
    }

    #[test]
    fn schoenberg_whitney_accepts_populated_spans() {
        let u = array![0.0, 0.1, 0.2, 0.4, 0.55, 0.7, 0.9, 1.0];
        let knots = build_clamped_knots(array![0.3, 0.6].view(), 0.0, 1.0, 2).unwrap();
        assert!(verify_schoenberg_whitney(knots.view(), 2, u.view()).is_ok());
    }

    #[test]
    fn schoenberg_whitney_rejects_an_empty_span() {
        // No sample between 0.8 and 0.9 leaves a basis function unsupported.
        let u = array![0.0, 0.05, 0.1, 0.15, 0.2, 1.0];
        let knots =
            build_clamped_knots(array![0.3, 0.5, 0.8, 0.9].view(), 0.0, 1.0, 1).unwrap();
        assert!(matches!(
            verify_schoenberg_whitney(knots.view(), 1, u.view()),
            Err(KnotError::SchoenbergWhitney { .. })
        ));
    }

    #[test]
    fn proposal_targets_the_largest_residual_span() {
        let u = array![0.0, 0.1, 0.2, 0.3, 0.45, 0.6, 0.7, 0.8, 0.9, 1.0];
        let knots = build_clamped_knots(array![0.4].view(), 0.0, 1.0, 2).unwrap();
        // Two spans: [0, 0.4) holds u[1..4], [0.4, 1] holds u[4..9].
        let candidate = propose_knot(knots.view(), 2, u.view(), &[10.0, 1.0]).unwrap();
        // Interior samples of the first span are 0.1, 0.2, 0.3; the median
        // choice takes the second.
        assert_abs_diff_eq!(candidate, 0.2, epsilon = 0.0);

        let candidate = propose_knot(knots.view(), 2, u.view(), &[1.0, 10.0]).unwrap();
        // Interior samples of the second span are 0.45 .. 0.9, five of them.
        assert_abs_diff_eq!(candidate, 0.7, epsilon = 0.0);
    }

    #[test]
    fn residual_ties_break_toward_the_wider_span() {
        let u = array![0.0, 0.05, 0.15, 0.25, 0.5, 0.75, 1.0];
        let knots = build_clamped_knots(array![0.3].view(), 0.0, 1.0, 1).unwrap();
        let candidate = propose_knot(knots.view(), 1, u.view(), &[2.0, 2.0]).unwrap();
        // Span widths 0.3 vs 0.7: the wider second span wins the tie; its
        // interior samples are 0.5 and 0.75.
        assert_abs_diff_eq!(candidate, 0.75, epsilon = 0.0);
    }

    #[test]
    fn proposal_gives_up_without_interior_samples() {
        let u = array![0.0, 1.0];
        let knots = minimal_knot_vector(0.0, 1.0, 1);
        assert!(propose_knot(knots.view(), 1, u.view(), &[3.0]).is_none());
    }

    #[test]
    fn insertion_keeps_the_vector_sorted() {
        let knots = minimal_knot_vector(0.0, 1.0, 2);
        let extended = insert_interior_knot(&knots, 0.4);
        let expected = array![0.0, 0.0, 0.0, 0.4, 1.0, 1.0, 1.0];
        assert_abs_diff_eq!(
            extended.as_slice().unwrap(),
            expected.as_slice().unwrap(),
            epsilon = 0.0
        );
    }
}
