//! Paired 3D landmarks.

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A correspondence between a point on the source shape and the matching
/// point on the destination shape.
///
/// # Example
///
/// ```
/// use warp_tps::LandmarkPair3D;
/// use nalgebra::Point3;
///
/// let pair = LandmarkPair3D::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0));
/// assert!(pair.is_finite());
/// assert!((pair.displacement().x - 1.0).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkPair3D {
    /// Location on the source shape.
    pub source: Point3<f64>,
    /// Location on the destination shape.
    pub destination: Point3<f64>,
}

impl LandmarkPair3D {
    /// Creates a landmark pair.
    #[must_use]
    pub const fn new(source: Point3<f64>, destination: Point3<f64>) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Creates a pair whose destination equals its source.
    #[must_use]
    pub const fn fixed(point: Point3<f64>) -> Self {
        Self::new(point, point)
    }

    /// Returns `destination - source`.
    #[must_use]
    pub fn displacement(&self) -> Vector3<f64> {
        self.destination - self.source
    }

    /// Returns true if every coordinate on both ends is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.source.coords.iter().all(|c| c.is_finite())
            && self.destination.coords.iter().all(|c| c.is_finite())
    }

    /// Returns a copy with each end multiplied by its own scale factor.
    #[must_use]
    pub fn prescaled(&self, source_scale: f64, destination_scale: f64) -> Self {
        Self::new(
            Point3::from(self.source.coords * source_scale),
            Point3::from(self.destination.coords * destination_scale),
        )
    }
}

impl fmt::Display for LandmarkPair3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LandmarkPair3D{{source = ({}, {}, {}), destination = ({}, {}, {})}}",
            self.source.x,
            self.source.y,
            self.source.z,
            self.destination.x,
            self.destination.y,
            self.destination.z
        )
    }
}

/// A landmark pair carrying a user-facing name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedLandmarkPair3D {
    /// Name of the landmark.
    pub name: String,
    /// The paired locations.
    pub pair: LandmarkPair3D,
}

impl NamedLandmarkPair3D {
    /// Creates a named landmark pair.
    #[must_use]
    pub fn new(name: impl Into<String>, pair: LandmarkPair3D) -> Self {
        Self {
            name: name.into(),
            pair,
        }
    }
}

/// Returns true if the points are neither coincident nor collinear.
///
/// Collinear (or coincident) clouds have at most one significant singular
/// value in their centered covariance.
#[must_use]
pub fn spans_plane(points: &[Point3<f64>]) -> bool {
    affine_rank(points) >= 2
}

/// Returns true if the points are not all coplanar.
#[must_use]
pub fn spans_volume(points: &[Point3<f64>]) -> bool {
    affine_rank(points) >= 3
}

/// Number of independent directions spanned by the point cloud (0 to 3).
#[must_use]
pub fn affine_rank(points: &[Point3<f64>]) -> usize {
    if points.len() < 2 {
        return 0;
    }

    #[allow(clippy::cast_precision_loss)]
    let centroid = points.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / points.len() as f64;

    let mut covariance = nalgebra::Matrix3::<f64>::zeros();
    for p in points {
        let d = p.coords - centroid;
        covariance += d * d.transpose();
    }

    let singular_values = covariance.singular_values();
    let largest = singular_values.max();
    if largest <= f64::EPSILON {
        return 0;
    }

    singular_values
        .iter()
        .filter(|&&s| s > largest * 1e-12)
        .count()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_displacement() {
        let pair = LandmarkPair3D::new(Point3::new(1.0, 2.0, 3.0), Point3::new(2.0, 2.0, 1.0));
        assert_eq!(pair.displacement(), Vector3::new(1.0, 0.0, -2.0));
    }

    #[test]
    fn test_non_finite_detected() {
        let pair = LandmarkPair3D::new(Point3::new(f64::NAN, 0.0, 0.0), Point3::origin());
        assert!(!pair.is_finite());

        let pair = LandmarkPair3D::new(Point3::origin(), Point3::new(0.0, f64::INFINITY, 0.0));
        assert!(!pair.is_finite());
    }

    #[test]
    fn test_prescale() {
        let pair = LandmarkPair3D::new(Point3::new(1.0, 1.0, 1.0), Point3::new(2.0, 2.0, 2.0))
            .prescaled(0.001, 10.0);
        assert_eq!(pair.source, Point3::new(0.001, 0.001, 0.001));
        assert_eq!(pair.destination, Point3::new(20.0, 20.0, 20.0));
    }

    #[test]
    fn test_affine_rank() {
        let coincident = [Point3::new(1.0, 1.0, 1.0); 4];
        assert_eq!(affine_rank(&coincident), 0);

        let collinear = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(2.0, 2.0, 2.0),
            Point3::new(-3.0, -3.0, -3.0),
        ];
        assert_eq!(affine_rank(&collinear), 1);
        assert!(!spans_plane(&collinear));

        let coplanar = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
        ];
        assert_eq!(affine_rank(&coplanar), 2);
        assert!(spans_plane(&coplanar));
        assert!(!spans_volume(&coplanar));

        let tetrahedron = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ];
        assert_eq!(affine_rank(&tetrahedron), 3);
        assert!(spans_volume(&tetrahedron));
    }

    #[test]
    fn test_display() {
        let pair = LandmarkPair3D::fixed(Point3::new(1.0, 2.0, 3.0));
        let s = pair.to_string();
        assert!(s.starts_with("LandmarkPair3D{source = (1, 2, 3)"));
    }
}
