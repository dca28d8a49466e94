//! Least-squares rigid fitting of landmark correspondences.
//!
//! The Kabsch algorithm finds the rotation and translation that minimize the
//! root mean square distance between the transformed source landmarks and
//! their destinations.

use nalgebra::{Isometry3, Matrix3, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};
use warp_tps::{affine_rank, LandmarkPair3D};

use crate::error::{ModelWarpError, ModelWarpResult};

/// Minimum number of correspondences a rigid fit needs.
pub const MIN_RIGID_CORRESPONDENCES: usize = 3;

/// A rotation followed by a translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    /// Rotation as a unit quaternion.
    pub rotation: UnitQuaternion<f64>,
    /// Translation vector.
    pub translation: Vector3<f64>,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    /// Creates a rigid transform.
    #[must_use]
    pub const fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// The identity transform.
    #[must_use]
    pub fn identity() -> Self {
        Self::new(UnitQuaternion::identity(), Vector3::zeros())
    }

    /// Applies the transform to a point.
    #[must_use]
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        self.rotation * p + self.translation
    }

    /// As an isometry.
    #[must_use]
    pub fn to_isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.translation), self.rotation)
    }
}

/// Fits the rigid transform that best maps every source landmark onto its
/// destination.
///
/// # Errors
///
/// Returns [`ModelWarpError::InsufficientCorrespondences`] if there are
/// fewer than [`MIN_RIGID_CORRESPONDENCES`] pairs or the sources are
/// collinear, and [`ModelWarpError::SvdFailed`] if the decomposition fails.
///
/// # Example
///
/// ```
/// use warp_model::fit_rigid_transform;
/// use warp_tps::LandmarkPair3D;
/// use nalgebra::{Point3, Vector3};
///
/// let offset = Vector3::new(1.0, 2.0, 3.0);
/// let pairs: Vec<_> = [
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(1.0, 0.0, 0.0),
///     Point3::new(0.0, 1.0, 0.0),
/// ]
/// .iter()
/// .map(|p| LandmarkPair3D::new(*p, p + offset))
/// .collect();
///
/// let fit = fit_rigid_transform(&pairs).unwrap();
/// assert!((fit.translation - offset).norm() < 1e-9);
/// ```
pub fn fit_rigid_transform(pairs: &[LandmarkPair3D]) -> ModelWarpResult<RigidTransform> {
    let sources: Vec<Point3<f64>> = pairs.iter().map(|p| p.source).collect();
    if pairs.len() < MIN_RIGID_CORRESPONDENCES || affine_rank(&sources) < 2 {
        return Err(ModelWarpError::InsufficientCorrespondences {
            found: pairs.len(),
            required: MIN_RIGID_CORRESPONDENCES,
        });
    }

    let source_centroid = centroid(pairs.iter().map(|p| &p.source));
    let destination_centroid = centroid(pairs.iter().map(|p| &p.destination));

    // Covariance matrix H = sum(source_i * destination_i^T)
    let mut h = Matrix3::zeros();
    for pair in pairs {
        let s = pair.source.coords - source_centroid;
        let d = pair.destination.coords - destination_centroid;
        h += s * d.transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u.ok_or(ModelWarpError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(ModelWarpError::SvdFailed)?;

    // R = V * U^T
    let mut rotation_matrix = v_t.transpose() * u.transpose();

    // Reflection: flip the last column of V
    if rotation_matrix.determinant() < 0.0 {
        let mut v = v_t.transpose();
        for i in 0..3 {
            v[(i, 2)] = -v[(i, 2)];
        }
        rotation_matrix = v * u.transpose();
    }

    let rotation =
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation_matrix));
    let translation = destination_centroid - rotation * source_centroid;

    Ok(RigidTransform::new(rotation, translation))
}

fn centroid<'a>(points: impl ExactSizeIterator<Item = &'a Point3<f64>>) -> Vector3<f64> {
    #[allow(clippy::cast_precision_loss)]
    let n = points.len() as f64;
    points.fold(Vector3::zeros(), |acc, p| acc + p.coords) / n
}
