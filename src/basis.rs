use ndarray::ArrayView1;
use thiserror::Error;

/// Errors from B-spline knot-vector validation.
#[derive(Debug, Error)]
pub enum BasisError {
    #[error("spline degree must be at least 1, but was {0}")]
    InvalidDegree(usize),

    #[error(
        "a degree-{degree} spline needs at least {required} knots, but only {provided} were provided"
    )]
    InsufficientKnots {
        degree: usize,
        required: usize,
        provided: usize,
    },

    #[error("invalid knot vector: {0}")]
    InvalidKnotVector(String),
}

/// Reusable scratch buffers for the Cox-de Boor recurrence, so repeated
/// evaluations do not allocate per point.
#[derive(Debug)]
pub(crate) struct BasisScratch {
    left: Vec<f64>,
    right: Vec<f64>,
    values: Vec<f64>,
}

impl BasisScratch {
    pub(crate) fn new(degree: usize) -> Self {
        let len = degree + 1;
        Self {
            left: vec![0.0; len],
            right: vec![0.0; len],
            values: vec![0.0; len],
        }
    }

    #[inline]
    fn ensure_degree(&mut self, degree: usize) {
        let len = degree + 1;
        if self.left.len() != len {
            self.left.resize(len, 0.0);
            self.right.resize(len, 0.0);
            self.values.resize(len, 0.0);
        }
    }
}

/// Evaluates the `degree + 1` non-zero B-spline basis functions at `x` and
/// returns the index of the first coefficient they multiply.
///
/// This is the iterative Cox-de Boor formulation of Algorithm A2.2 from
/// "The NURBS Book" (Piegl and Tiller), which avoids the cancellation-prone
/// divided-difference form. `x` is not clamped: values outside
/// `[t[k], t[n-k-1]]` select the boundary span and evaluate its polynomial,
/// so out-of-domain queries extrapolate. Callers that want a different
/// boundary policy apply it before calling.
#[inline]
pub(crate) fn nonzero_basis_into(
    x: f64,
    degree: usize,
    knots: ArrayView1<'_, f64>,
    values: &mut [f64],
    scratch: &mut BasisScratch,
) -> usize {
    let num_knots = knots.len();
    let num_basis = num_knots - degree - 1;
    debug_assert_eq!(values.len(), degree + 1);

    scratch.ensure_degree(degree);
    scratch.values.fill(0.0);
    scratch.left.fill(0.0);
    scratch.right.fill(0.0);

    let span = {
        if x >= knots[num_basis] {
            num_basis - 1
        } else if x < knots[degree] {
            degree
        } else {
            let mut span = degree;
            while span < num_basis && x >= knots[span + 1] {
                span += 1;
            }
            span
        }
    };

    let left = &mut scratch.left;
    let right = &mut scratch.right;
    let n = &mut scratch.values;

    n[0] = 1.0;

    for d in 1..=degree {
        left[d] = x - knots[span + 1 - d];
        right[d] = knots[span + d] - x;

        let mut saved = 0.0;

        for r in 0..d {
            let den = right[r + 1] + left[d - r];
            let temp = if den.abs() > 1e-12 { n[r] / den } else { 0.0 };

            n[r] = saved + right[r + 1] * temp;
            saved = left[d - r] * temp;
        }
        n[d] = saved;
    }

    values[..=degree].copy_from_slice(&n[..=degree]);

    span - degree
}

/// Checks that a full (boundary-inclusive) knot vector is usable for a
/// degree-`degree` spline: finite, non-decreasing, long enough to carry at
/// least one polynomial span.
pub fn validate_knot_vector(knots: ArrayView1<'_, f64>, degree: usize) -> Result<(), BasisError> {
    if degree < 1 {
        return Err(BasisError::InvalidDegree(degree));
    }

    let required = 2 * (degree + 1);
    if knots.len() < required {
        return Err(BasisError::InsufficientKnots {
            degree,
            required,
            provided: knots.len(),
        });
    }

    if knots.iter().any(|&t| !t.is_finite()) {
        return Err(BasisError::InvalidKnotVector(
            "knot vector contains non-finite values".to_string(),
        ));
    }

    for i in 0..knots.len() - 1 {
        if knots[i] > knots[i + 1] {
            return Err(BasisError::InvalidKnotVector(format!(
                "knot vector is not non-decreasing at position {i}"
            )));
        }
    }

    Ok(())
}
