use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::knots::{self, KnotError};
use crate::lsq::{self, LsqError};
use crate::parametrization::{self, ParametrizationError};
use crate::spline::Spline;

/// Configuration for a single curve fit.
///
/// The defaults reproduce the conventional smoothing setup: cubic spline,
/// unit weights, chord-length parametrization, smoothing factor
/// `m - sqrt(2m)`, knot budget `m + 2k`. Supplying `knots` switches to the
/// fixed-knot weighted least-squares mode in which no knot search runs.
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Spline degree `k`, `1 <= k <= 5`. Odd degrees behave best for small
    /// smoothing factors.
    pub degree: usize,
    /// Smoothing target `s`: the fit stops refining knots once the weighted
    /// residual sum of squares drops to `s` or below. `0` requests exact
    /// interpolation. `None` resolves to `m - sqrt(2m)`.
    pub smoothing: Option<f64>,
    /// Per-point weights, strictly positive. `None` resolves to ones.
    pub weights: Option<Array1<f64>>,
    /// Explicit parameter values, strictly increasing, one per point.
    /// `None` derives a normalized chord-length parametrization.
    pub parameters: Option<Array1<f64>>,
    /// Override for the parameter domain start; requires `parameters` and
    /// must satisfy `param_begin <= u[0]`.
    pub param_begin: Option<f64>,
    /// Override for the parameter domain end; requires `parameters` and
    /// must satisfy `param_end >= u[m-1]`.
    pub param_end: Option<f64>,
    /// Interior knots for the fixed-knot least-squares mode. Boundary knots
    /// are added automatically.
    pub knots: Option<Array1<f64>>,
    /// Knot budget `nest`: upper bound on the total knot count the
    /// smoothing search may reach. `None` resolves to `m + 2k`
    /// (`m + k + 1` when `s == 0`).
    pub max_knots: Option<usize>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            degree: 3,
            smoothing: None,
            weights: None,
            parameters: None,
            param_begin: None,
            param_end: None,
            knots: None,
            max_knots: None,
        }
    }
}

/// Terminal state of the knot search. Only `Converged` met the smoothing
/// target; the other states still carry a usable best-effort spline, so
/// callers must inspect this rather than rely on an error path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitStatus {
    /// The weighted residual target was met: `fp <= s`.
    Converged,
    /// The knot budget ran out before the residual target was reached.
    BudgetExhausted,
    /// No knot span with an interior sample remained to split, so the
    /// search could not refine further.
    Degenerate,
}

/// Result of a curve fit: the spline, the achieved weighted residual sum of
/// squares, and how the knot search ended.
#[derive(Debug, Clone)]
pub struct CurveFit {
    pub spline: Spline,
    pub residual: f64,
    pub status: FitStatus,
}

/// Errors from fit configuration and the fitting pipeline. All structural
/// validation happens before any numerical work.
#[derive(Debug, Error)]
pub enum FitError {
    #[error("spline degree must satisfy 1 <= k <= 5, but was {0}")]
    InvalidDegree(usize),

    #[error("a degree-{degree} fit needs at least {required} points, but {actual} were given")]
    TooFewPoints {
        degree: usize,
        required: usize,
        actual: usize,
    },

    #[error("point array must contain at least one coordinate dimension")]
    NoCoordinates,

    #[error("expected {expected} weights, one per sample point, but got {found}")]
    WeightCountMismatch { expected: usize, found: usize },

    #[error("weights must be strictly positive and finite, but weight {index} is {value}")]
    InvalidWeight { index: usize, value: f64 },

    #[error("expected {expected} parameter values, one per sample point, but got {found}")]
    ParameterCountMismatch { expected: usize, found: usize },

    #[error("smoothing factor must be non-negative and finite, but was {0}")]
    InvalidSmoothing(f64),

    #[error(
        "parameter range [{begin}, {end}] must be a non-empty interval bracketing the supplied \
         parameter values"
    )]
    InvalidParameterRange { begin: f64, end: f64 },

    #[error("parameter range overrides require explicitly supplied parameters")]
    RangeWithoutParameters,

    #[error(transparent)]
    Parametrization(#[from] ParametrizationError),

    #[error(transparent)]
    Knots(#[from] KnotError),

    #[error(transparent)]
    Lsq(#[from] LsqError),
}

/// Fits a smoothing B-spline curve through ordered samples.
///
/// `points` holds one coordinate row per dimension and one column per
/// sample, in curve order. In the default smoothing mode the knot vector
/// starts minimal and grows one knot per iteration, always splitting the
/// span carrying the largest residual, until the weighted residual sum of
/// squares reaches the smoothing target or no further progress is possible;
/// the residual is non-increasing across those iterations. With
/// `FitOptions::knots` set, the supplied knots are used as-is after a
/// Schoenberg-Whitney screen and a single least-squares solve runs.
pub fn fit_curve(points: ArrayView2<'_, f64>, options: &FitOptions) -> Result<CurveFit, FitError> {
    let (idim, m) = points.dim();
    if idim == 0 {
        return Err(FitError::NoCoordinates);
    }

    let degree = options.degree;
    if !(1..=5).contains(&degree) {
        return Err(FitError::InvalidDegree(degree));
    }
    if m < degree + 1 {
        return Err(FitError::TooFewPoints {
            degree,
            required: degree + 1,
            actual: m,
        });
    }

    let weights = resolve_weights(options, m)?;
    let (u, begin, end) = resolve_parameters(points, options, m)?;

    if let Some(value) = options.smoothing {
        if !value.is_finite() || value < 0.0 {
            return Err(FitError::InvalidSmoothing(value));
        }
    }

    if let Some(interior) = &options.knots {
        let knots = knots::build_clamped_knots(interior.view(), begin, end, degree)?;
        knots::verify_schoenberg_whitney(knots.view(), degree, u.view())?;
        let solved =
            lsq::solve_banded_lsq(points, u.view(), weights.view(), knots.view(), degree)?;
        return Ok(CurveFit {
            spline: Spline::from_fit(knots, solved.coefficients, degree, u),
            residual: solved.residual,
            status: FitStatus::Converged,
        });
    }

    let smoothing = options
        .smoothing
        .unwrap_or_else(|| (m as f64 - (2.0 * m as f64).sqrt()).max(0.0));

    let nmax = knots::max_knot_count(m, degree);
    let default_budget = if smoothing == 0.0 {
        nmax
    } else {
        m + 2 * degree
    };
    let budget = options
        .max_knots
        .unwrap_or(default_budget)
        .max(2 * degree + 3)
        .min(nmax);

    fit_with_smoothing(points, u, begin, end, weights, degree, smoothing, budget)
}

fn resolve_weights(options: &FitOptions, m: usize) -> Result<Array1<f64>, FitError> {
    match &options.weights {
        None => Ok(Array1::ones(m)),
        Some(weights) => {
            if weights.len() != m {
                return Err(FitError::WeightCountMismatch {
                    expected: m,
                    found: weights.len(),
                });
            }
            for (index, &value) in weights.iter().enumerate() {
                if !value.is_finite() || value <= 0.0 {
                    return Err(FitError::InvalidWeight { index, value });
                }
            }
            Ok(weights.clone())
        }
    }
}

fn resolve_parameters(
    points: ArrayView2<'_, f64>,
    options: &FitOptions,
    m: usize,
) -> Result<(Array1<f64>, f64, f64), FitError> {
    match &options.parameters {
        Some(u) => {
            if u.len() != m {
                return Err(FitError::ParameterCountMismatch {
                    expected: m,
                    found: u.len(),
                });
            }
            parametrization::validate_parameters(u.view())?;
            let begin = options.param_begin.unwrap_or(u[0]);
            let end = options.param_end.unwrap_or(u[m - 1]);
            if !begin.is_finite() || !end.is_finite() || begin > u[0] || end < u[m - 1] {
                return Err(FitError::InvalidParameterRange { begin, end });
            }
            Ok((u.clone(), begin, end))
        }
        None => {
            if options.param_begin.is_some() || options.param_end.is_some() {
                return Err(FitError::RangeWithoutParameters);
            }
            let u = parametrization::chord_length_parameters(points)?;
            Ok((u, 0.0, 1.0))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn fit_with_smoothing(
    points: ArrayView2<'_, f64>,
    u: Array1<f64>,
    begin: f64,
    end: f64,
    weights: Array1<f64>,
    degree: usize,
    smoothing: f64,
    budget: usize,
) -> Result<CurveFit, FitError> {
    let m = u.len();
    let nmax = knots::max_knot_count(m, degree);

    // Exact interpolation has a known optimal knot vector; build it directly
    // instead of discovering it one insertion at a time.
    if smoothing == 0.0 && budget >= nmax {
        let knots = knots::interpolating_knot_vector(u.view(), degree);
        let solved =
            lsq::solve_banded_lsq(points, u.view(), weights.view(), knots.view(), degree)?;
        return Ok(CurveFit {
            spline: Spline::from_fit(knots, solved.coefficients, degree, u),
            residual: solved.residual,
            status: FitStatus::Converged,
        });
    }

    let mut knot_vector = knots::minimal_knot_vector(begin, end, degree);
    loop {
        let solved = lsq::solve_banded_lsq(
            points,
            u.view(),
            weights.view(),
            knot_vector.view(),
            degree,
        )?;

        if solved.residual <= smoothing {
            return Ok(CurveFit {
                spline: Spline::from_fit(knot_vector, solved.coefficients, degree, u),
                residual: solved.residual,
                status: FitStatus::Converged,
            });
        }

        if knot_vector.len() >= budget {
            log::warn!(
                "knot budget {budget} exhausted at residual {:.6e} (target {:.6e}); returning \
                 the best-effort fit",
                solved.residual,
                smoothing
            );
            return Ok(CurveFit {
                spline: Spline::from_fit(knot_vector, solved.coefficients, degree, u),
                residual: solved.residual,
                status: FitStatus::BudgetExhausted,
            });
        }

        match knots::propose_knot(
            knot_vector.view(),
            degree,
            u.view(),
            &solved.span_residuals,
        ) {
            Some(value) => {
                knot_vector = knots::insert_interior_knot(&knot_vector, value);
            }
            None => {
                log::warn!(
                    "no knot span with interior samples remains at residual {:.6e} (target \
                     {:.6e}); returning the best-effort fit",
                    solved.residual,
                    smoothing
                );
                return Ok(CurveFit {
                    spline: Spline::from_fit(knot_vector, solved.coefficients, degree, u),
                    residual: solved.residual,
                    status: FitStatus::Degenerate,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spline::ExtrapolationMode;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    fn wavy_points(m: usize) -> Array2<f64> {
        let mut points = Array2::<f64>::zeros((2, m));
        for i in 0..m {
            let t = i as f64 / (m - 1) as f64;
            points[[0, i]] = t;
            points[[1, i]] = (4.0 * std::f64::consts::PI * t).sin();
        }
        points
    }

    #[test]
    fn degree_and_point_count_are_validated_first() {
        let points = wavy_points(10);
        for degree in [0usize, 6] {
            let err = fit_curve(
                points.view(),
                &FitOptions {
                    degree,
                    ..Default::default()
                },
            )
            .unwrap_err();
            assert!(matches!(err, FitError::InvalidDegree(_)));
        }

        let too_few = wavy_points(3);
        let err = fit_curve(too_few.view(), &FitOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            FitError::TooFewPoints {
                degree: 3,
                required: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn weight_and_parameter_lengths_are_checked() {
        let points = wavy_points(8);

        let err = fit_curve(
            points.view(),
            &FitOptions {
                weights: Some(array![1.0, 1.0]),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, FitError::WeightCountMismatch { .. }));

        let err = fit_curve(
            points.view(),
            &FitOptions {
                weights: Some(Array1::from_elem(8, -1.0)),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, FitError::InvalidWeight { index: 0, .. }));

        let err = fit_curve(
            points.view(),
            &FitOptions {
                parameters: Some(array![0.0, 1.0]),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, FitError::ParameterCountMismatch { .. }));
    }

    #[test]
    fn range_overrides_require_explicit_parameters() {
        let points = wavy_points(8);
        let err = fit_curve(
            points.view(),
            &FitOptions {
                param_begin: Some(-1.0),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, FitError::RangeWithoutParameters));

        let err = fit_curve(
            points.view(),
            &FitOptions {
                parameters: Some(Array1::linspace(0.0, 1.0, 8)),
                param_begin: Some(0.5),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, FitError::InvalidParameterRange { .. }));
    }

    #[test]
    fn negative_smoothing_is_rejected() {
        let points = wavy_points(8);
        let err = fit_curve(
            points.view(),
            &FitOptions {
                smoothing: Some(-1.0),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, FitError::InvalidSmoothing(s) if s == -1.0));
    }

    #[test]
    fn default_weights_match_explicit_unit_weights() {
        // The auto-parametrized path must fit with unit weights.
        let points = wavy_points(12);
        let implicit = fit_curve(points.view(), &FitOptions::default()).unwrap();
        let explicit = fit_curve(
            points.view(),
            &FitOptions {
                weights: Some(Array1::ones(12)),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(implicit.status, explicit.status);
        assert_abs_diff_eq!(implicit.residual, explicit.residual, epsilon = 1e-12);
        assert_eq!(
            implicit.spline.knots().len(),
            explicit.spline.knots().len()
        );
    }

    #[test]
    fn fixed_knot_mode_solves_once_with_the_given_knots() {
        let points = wavy_points(20);
        let fit = fit_curve(
            points.view(),
            &FitOptions {
                parameters: Some(Array1::linspace(0.0, 1.0, 20)),
                knots: Some(array![0.25, 0.5, 0.75]),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(fit.status, FitStatus::Converged);
        // 3 interior + 2 * (3 + 1) boundary knots.
        assert_eq!(fit.spline.knots().len(), 11);
        assert!(fit.residual.is_finite());
    }

    #[test]
    fn fixed_knots_violating_schoenberg_whitney_are_rejected() {
        // No parameter falls strictly between 0.9 and 0.95, so two interior
        // spans are unsupported.
        let mut points = Array2::<f64>::zeros((2, 8));
        for i in 0..8 {
            let t = 0.5 * i as f64 / 7.0;
            points[[0, i]] = t;
            points[[1, i]] = t * t;
        }
        let err = fit_curve(
            points.view(),
            &FitOptions {
                degree: 1,
                parameters: Some(Array1::linspace(0.0, 1.0, 8)),
                knots: Some(array![0.9, 0.92, 0.95]),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            FitError::Knots(KnotError::SchoenbergWhitney { .. })
        ));
    }

    #[test]
    fn interpolation_takes_the_direct_knot_path() {
        let points = wavy_points(10);
        let fit = fit_curve(
            points.view(),
            &FitOptions {
                smoothing: Some(0.0),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(fit.status, FitStatus::Converged);
        // Interpolating vector: m + k + 1 knots.
        assert_eq!(fit.spline.knots().len(), 14);
        assert!(fit.residual < 1e-16);

        let reproduced = fit
            .spline
            .evaluate(fit.spline.parameters(), ExtrapolationMode::Error)
            .unwrap();
        for i in 0..10 {
            assert_abs_diff_eq!(reproduced[[0, i]], points[[0, i]], epsilon = 1e-9);
            assert_abs_diff_eq!(reproduced[[1, i]], points[[1, i]], epsilon = 1e-9);
        }
    }

    #[test]
    fn tiny_budget_reports_exhaustion_with_a_usable_fit() {
        let points = wavy_points(40);
        let fit = fit_curve(
            points.view(),
            &FitOptions {
                smoothing: Some(1e-12),
                max_knots: Some(9),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(fit.status, FitStatus::BudgetExhausted);
        assert_eq!(fit.spline.knots().len(), 9);
        assert!(fit.residual > 1e-12);

        let sampled = fit
            .spline
            .evaluate(fit.spline.parameters(), ExtrapolationMode::Error)
            .unwrap();
        assert!(sampled.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn minimum_point_count_degenerates_to_a_single_span() {
        // m = k + 1 leaves no interior sample to split, and the minimal
        // budget clamp still admits the interpolating vector.
        let points = array![[0.0, 1.0, 2.0, 3.0], [1.0, -1.0, 1.0, -1.0]];
        let fit = fit_curve(
            points.view(),
            &FitOptions {
                smoothing: Some(0.0),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(fit.status, FitStatus::Converged);
        assert_eq!(fit.spline.knots().len(), 8);
        assert!(fit.residual < 1e-16);
    }
}
