use ndarray::{Array1, Array2, ArrayView1, ArrayView2, s};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::basis::{self, BasisError, BasisScratch};

/// Errors from spline evaluation and differentiation.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("query parameter {value} lies outside the spline domain [{begin}, {end}]")]
    OutsideDomain { value: f64, begin: f64, end: f64 },

    #[error(
        "derivative order {order} is not available for a degree-{degree} spline; orders \
         0..={degree} are supported"
    )]
    InvalidDerivativeOrder { order: usize, degree: usize },

    #[error(
        "coefficient matrix has {found} columns but the knot vector implies {expected} basis functions"
    )]
    CoefficientMismatch { expected: usize, found: usize },

    #[error(transparent)]
    Basis(#[from] BasisError),
}

/// Boundary policy for evaluating a spline outside its fitted parameter
/// domain, chosen per evaluation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtrapolationMode {
    /// Reject the first out-of-domain query with [`EvalError::OutsideDomain`].
    Error,
    /// Evaluate at the nearest domain endpoint instead.
    Clamp,
    /// Continue the boundary polynomial past the domain.
    Extrapolate,
    /// Return zero in every coordinate for out-of-domain queries.
    Zero,
}

/// A fitted parametric B-spline curve.
///
/// Holds the knot vector, one coefficient row per coordinate dimension, the
/// spline degree, and the parameter values the curve was fitted at. The
/// object is immutable: evaluation and differentiation return fresh arrays
/// and a refit produces a new `Spline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spline {
    knots: Array1<f64>,
    coefficients: Array2<f64>,
    degree: usize,
    parameters: Array1<f64>,
}

impl Spline {
    /// Builds a spline from its raw parts, validating that the knot vector
    /// is well formed and sized consistently with the coefficients.
    pub fn new(
        knots: Array1<f64>,
        coefficients: Array2<f64>,
        degree: usize,
        parameters: Array1<f64>,
    ) -> Result<Self, EvalError> {
        basis::validate_knot_vector(knots.view(), degree)?;
        let expected = knots.len() - degree - 1;
        if coefficients.ncols() != expected {
            return Err(EvalError::CoefficientMismatch {
                expected,
                found: coefficients.ncols(),
            });
        }
        Ok(Self {
            knots,
            coefficients,
            degree,
            parameters,
        })
    }

    /// Constructor for splines the fit loop has already validated by
    /// construction.
    pub(crate) fn from_fit(
        knots: Array1<f64>,
        coefficients: Array2<f64>,
        degree: usize,
        parameters: Array1<f64>,
    ) -> Self {
        Self {
            knots,
            coefficients,
            degree,
            parameters,
        }
    }

    pub fn knots(&self) -> ArrayView1<'_, f64> {
        self.knots.view()
    }

    /// Coefficient matrix, one row per coordinate dimension.
    pub fn coefficients(&self) -> ArrayView2<'_, f64> {
        self.coefficients.view()
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Parameter values the curve was fitted at.
    pub fn parameters(&self) -> ArrayView1<'_, f64> {
        self.parameters.view()
    }

    /// Number of coordinate dimensions.
    pub fn dimension(&self) -> usize {
        self.coefficients.nrows()
    }

    /// The fitted parameter domain `[t[k], t[n-k-1]]`.
    pub fn domain(&self) -> (f64, f64) {
        let n = self.knots.len();
        (self.knots[self.degree], self.knots[n - self.degree - 1])
    }

    /// Evaluates the curve at each query parameter, returning one coordinate
    /// column per query.
    pub fn evaluate(
        &self,
        params: ArrayView1<'_, f64>,
        mode: ExtrapolationMode,
    ) -> Result<Array2<f64>, EvalError> {
        evaluate_representation(
            self.knots.view(),
            self.coefficients.view(),
            self.degree,
            params,
            mode,
        )
    }

    /// Evaluates the `order`-th derivative of the curve with respect to the
    /// parameter at each query value.
    ///
    /// The representation is reduced `order` times with the B-spline
    /// derivative formula and then evaluated at degree `k - order`. Orders
    /// up to `k` are supported; the degree-`k` derivative is piecewise
    /// constant and anything beyond that is rejected rather than silently
    /// returned as zero.
    pub fn derivative(
        &self,
        order: usize,
        params: ArrayView1<'_, f64>,
        mode: ExtrapolationMode,
    ) -> Result<Array2<f64>, EvalError> {
        if order > self.degree {
            return Err(EvalError::InvalidDerivativeOrder {
                order,
                degree: self.degree,
            });
        }
        if order == 0 {
            return self.evaluate(params, mode);
        }

        let mut knots = self.knots.clone();
        let mut coefficients = self.coefficients.clone();
        let mut degree = self.degree;

        for _ in 0..order {
            let num_coef = coefficients.ncols() - 1;
            let idim = coefficients.nrows();
            let mut reduced = Array2::<f64>::zeros((idim, num_coef));
            for i in 0..num_coef {
                let dt = knots[i + degree + 1] - knots[i + 1];
                // A vanishing denominator only occurs on fully coincident
                // knots, where the basis difference vanishes as well.
                if dt > 0.0 {
                    let factor = degree as f64 / dt;
                    for d in 0..idim {
                        reduced[[d, i]] =
                            factor * (coefficients[[d, i + 1]] - coefficients[[d, i]]);
                    }
                }
            }
            coefficients = reduced;
            knots = knots.slice(s![1..knots.len() - 1]).to_owned();
            degree -= 1;
        }

        evaluate_representation(
            knots.view(),
            coefficients.view(),
            degree,
            params,
            mode,
        )
    }
}

/// Shared evaluation kernel for a spline and its derivative
/// representations. The domain endpoints are preserved by the derivative
/// reduction, so the extrapolation policy sees the original domain either
/// way.
fn evaluate_representation(
    knots: ArrayView1<'_, f64>,
    coefficients: ArrayView2<'_, f64>,
    degree: usize,
    params: ArrayView1<'_, f64>,
    mode: ExtrapolationMode,
) -> Result<Array2<f64>, EvalError> {
    let n = knots.len();
    let begin = knots[degree];
    let end = knots[n - degree - 1];
    let idim = coefficients.nrows();

    let mut out = Array2::<f64>::zeros((idim, params.len()));
    let mut values = vec![0.0; degree + 1];
    let mut scratch = BasisScratch::new(degree);

    for (column, &query) in params.iter().enumerate() {
        let outside = query < begin || query > end;
        let x = match mode {
            ExtrapolationMode::Error if outside => {
                return Err(EvalError::OutsideDomain {
                    value: query,
                    begin,
                    end,
                });
            }
            ExtrapolationMode::Zero if outside => continue,
            ExtrapolationMode::Clamp => query.clamp(begin, end),
            _ => query,
        };

        let start = basis::nonzero_basis_into(x, degree, knots, &mut values, &mut scratch);
        for d in 0..idim {
            let mut acc = 0.0;
            for (offset, &value) in values.iter().enumerate() {
                acc += coefficients[[d, start + offset]] * value;
            }
            out[[d, column]] = acc;
        }
    }

    Ok(out)
}
