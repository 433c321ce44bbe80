#![deny(dead_code)]
#![deny(unused_imports)]

pub mod basis;
pub mod fit;
pub mod knots;
pub mod lsq;
pub mod parametrization;
pub mod spline;

pub use basis::{BasisError, validate_knot_vector};
pub use fit::{CurveFit, FitError, FitOptions, FitStatus, fit_curve};
pub use knots::{
    KnotError, build_clamped_knots, interpolating_knot_vector, max_knot_count,
    minimal_knot_vector, verify_schoenberg_whitney,
};
pub use lsq::LsqError;
pub use parametrization::{ParametrizationError, chord_length_parameters, validate_parameters};
pub use spline::{EvalError, ExtrapolationMode, Spline};
