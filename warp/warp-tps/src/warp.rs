//! Evaluation of solved thin-plate spline warps.

use crate::{radial_basis, TpsCoefficients3D};
use nalgebra::Point3;
use rayon::prelude::*;

/// Point counts above which bulk evaluation runs in parallel.
const PARALLEL_THRESHOLD: usize = 1000;

/// Warps a single point.
///
/// Evaluation never fails; with default coefficients it returns `p`
/// unchanged.
#[must_use]
pub fn warp_point(coefs: &TpsCoefficients3D, p: &Point3<f64>) -> Point3<f64> {
    let mut out = coefs.affine_part(p);
    for term in &coefs.non_affine_terms {
        out += term.weight * radial_basis((p - term.control_point).norm());
    }
    Point3::from(out)
}

/// Warps a point and linearly interpolates between the original and the
/// warped location.
///
/// A `blend` of 0 returns `p`, 1 returns the fully warped point. Values
/// outside `[0, 1]` extrapolate.
///
/// # Example
///
/// ```
/// use warp_tps::{warp_point_blended, TpsCoefficients3D};
/// use nalgebra::{Point3, Vector3};
///
/// let coefs = TpsCoefficients3D {
///     a1: Vector3::new(2.0, 0.0, 0.0),
///     ..TpsCoefficients3D::default()
/// };
/// let halfway = warp_point_blended(&coefs, &Point3::origin(), 0.5);
/// assert!((halfway.x - 1.0).abs() < 1e-12);
/// ```
#[must_use]
pub fn warp_point_blended(coefs: &TpsCoefficients3D, p: &Point3<f64>, blend: f64) -> Point3<f64> {
    let warped = warp_point(coefs, p);
    p + (warped - p) * blend
}

/// Warps every point, returning the results in input order.
#[must_use]
pub fn warp_points(coefs: &TpsCoefficients3D, points: &[Point3<f64>]) -> Vec<Point3<f64>> {
    if points.len() > PARALLEL_THRESHOLD {
        points.par_iter().map(|p| warp_point(coefs, p)).collect()
    } else {
        points.iter().map(|p| warp_point(coefs, p)).collect()
    }
}

/// Warps every point in place, blending each with its original location.
pub fn warp_points_in_place(coefs: &TpsCoefficients3D, points: &mut [Point3<f64>], blend: f64) {
    if points.len() > PARALLEL_THRESHOLD {
        points
            .par_iter_mut()
            .for_each(|p| *p = warp_point_blended(coefs, p, blend));
    } else {
        for p in points.iter_mut() {
            *p = warp_point_blended(coefs, p, blend);
        }
    }
}

impl TpsCoefficients3D {
    /// Warps a single point. See [`warp_point`].
    #[must_use]
    pub fn warp_point(&self, p: &Point3<f64>) -> Point3<f64> {
        warp_point(self, p)
    }

    /// Warps a point with blending. See [`warp_point_blended`].
    #[must_use]
    pub fn warp_point_blended(&self, p: &Point3<f64>, blend: f64) -> Point3<f64> {
        warp_point_blended(self, p, blend)
    }
}
