//! Flat-array entry points for scripting front ends.
//!
//! These wrap [`crate::solve_coefficients`] and [`crate::warp_point`] with
//! plain `[f64; 3]` arrays so that foreign callers never see `nalgebra`
//! types. Results are bit-identical to the native path.

use crate::{LandmarkPair3D, TpsCoefficients3D, TpsError, TpsResult};
use nalgebra::Point3;

/// Opaque handle to solved coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientsHandle {
    coefficients: TpsCoefficients3D,
}

impl CoefficientsHandle {
    /// Warps a single point.
    #[must_use]
    pub fn warp_point(&self, point: [f64; 3]) -> [f64; 3] {
        let warped = crate::warp_point(&self.coefficients, &Point3::from(point));
        [warped.x, warped.y, warped.z]
    }

    /// Returns the underlying coefficients.
    #[must_use]
    pub const fn coefficients(&self) -> &TpsCoefficients3D {
        &self.coefficients
    }
}

/// Solves coefficients from parallel arrays of source and destination
/// landmarks.
///
/// # Errors
///
/// Returns [`TpsError::LengthMismatch`] if the arrays differ in length, and
/// otherwise any error [`crate::solve_coefficients`] returns.
///
/// # Example
///
/// ```
/// use warp_tps::bindings::solve_coefficients;
///
/// let src = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
/// let dst = src.map(|[x, y, z]| [x, y + 2.0, z]);
///
/// let handle = solve_coefficients(&src, &dst).unwrap();
/// let [x, y, z] = handle.warp_point([5.0, 5.0, 5.0]);
/// assert!((x - 5.0).abs() < 1e-9 && (y - 7.0).abs() < 1e-9 && (z - 5.0).abs() < 1e-9);
/// ```
pub fn solve_coefficients(
    source_landmarks: &[[f64; 3]],
    destination_landmarks: &[[f64; 3]],
) -> TpsResult<CoefficientsHandle> {
    if source_landmarks.len() != destination_landmarks.len() {
        return Err(TpsError::LengthMismatch {
            source_count: source_landmarks.len(),
            destination_count: destination_landmarks.len(),
        });
    }

    let pairs: Vec<LandmarkPair3D> = source_landmarks
        .iter()
        .zip(destination_landmarks)
        .map(|(s, d)| LandmarkPair3D::new(Point3::from(*s), Point3::from(*d)))
        .collect();

    crate::solve_coefficients(&pairs).map(|coefficients| CoefficientsHandle { coefficients })
}
