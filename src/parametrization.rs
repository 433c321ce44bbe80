use ndarray::{Array1, ArrayView1, ArrayView2};
use thiserror::Error;

/// Errors raised while deriving or validating the curve parametrization.
#[derive(Debug, Error)]
pub enum ParametrizationError {
    #[error("cannot derive a chord-length parametrization: all sample points coincide")]
    DegenerateInput,

    #[error(
        "consecutive sample points {0} and {1} coincide, so the chord-length parametrization would not be strictly increasing"
    )]
    ZeroLengthChord(usize, usize),

    #[error(
        "parameter values must be finite and strictly increasing, but u[{index}] = {value} is not"
    )]
    NonMonotonicParameters { index: usize, value: f64 },
}

/// Derives a normalized chord-length parametrization for an ordered point set.
///
/// `points` holds one coordinate row per dimension, one column per sample.
/// The cumulative Euclidean chord length is normalized so that the result
/// starts at 0 and ends at 1. Coincident consecutive samples would collapse a
/// knot span and are rejected.
pub fn chord_length_parameters(
    points: ArrayView2<'_, f64>,
) -> Result<Array1<f64>, ParametrizationError> {
    let (idim, m) = points.dim();
    let mut u = Array1::<f64>::zeros(m);

    let mut total = 0.0;
    for i in 1..m {
        let mut dist_sq = 0.0;
        for d in 0..idim {
            let delta = points[[d, i]] - points[[d, i - 1]];
            dist_sq += delta * delta;
        }
        if dist_sq == 0.0 {
            return Err(ParametrizationError::ZeroLengthChord(i - 1, i));
        }
        total += dist_sq.sqrt();
        u[i] = total;
    }

    if total <= 0.0 || !total.is_finite() {
        return Err(ParametrizationError::DegenerateInput);
    }

    u.mapv_inplace(|v| v / total);
    Ok(u)
}

/// Validates a caller-supplied parameter vector: finite values, strictly
/// increasing from the first entry to the last.
pub fn validate_parameters(u: ArrayView1<'_, f64>) -> Result<(), ParametrizationError> {
    for (index, &value) in u.iter().enumerate() {
        if !value.is_finite() || (index > 0 && value <= u[index - 1]) {
            return Err(ParametrizationError::NonMonotonicParameters { index, value });
        }
    }
    Ok(())
}
