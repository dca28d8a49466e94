//! Thin-plate spline coefficient solver.
//!
//! Solves the Bookstein system
//!
//! ```text
//! | K   P | | w |   | v |
//! | Pᵀ  0 | | a | = | 0 |
//! ```
//!
//! where `K[i][j] = U(|sᵢ - sⱼ|)`, each row of `P` is `[1, x, y, z]` of a
//! source landmark, `v` stacks the destination landmarks and the zero block
//! enforces `Σ wᵢ = 0` and `Σ wᵢ sᵢ = 0`. All three output axes are solved
//! at once against a three-column right-hand side.

use crate::{LandmarkPair3D, TpsCoefficients3D, TpsError, TpsNonAffineTerm3D, TpsResult};
use nalgebra::{DMatrix, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Smallest acceptable ratio between the smallest and largest LU pivot.
const MIN_PIVOT_RATIO: f64 = 1e-13;

/// The radial basis function `U(r) = r² ln(r)`, with `U(0) = 0`.
///
/// # Example
///
/// ```
/// use warp_tps::radial_basis;
///
/// assert_eq!(radial_basis(0.0), 0.0);
/// assert_eq!(radial_basis(1.0), 0.0);
/// assert!((radial_basis(2.0) - 4.0 * 2.0_f64.ln()).abs() < 1e-12);
/// ```
#[must_use]
pub fn radial_basis(r: f64) -> f64 {
    if r < 1e-10 {
        0.0
    } else {
        r * r * r.ln()
    }
}

/// Inputs to the coefficient solver.
///
/// The `apply_*` flags post-process the solved coefficients so that callers
/// can strip parts of the warp (e.g. keep only the non-affine bending).
///
/// # Example
///
/// ```
/// use warp_tps::{LandmarkPair3D, TpsSolverInputs3D};
/// use nalgebra::Point3;
///
/// let pairs = vec![
///     LandmarkPair3D::new(Point3::new(0.0, 0.0, 0.0), Point3::new(5.0, 0.0, 0.0)),
///     LandmarkPair3D::new(Point3::new(1.0, 0.0, 0.0), Point3::new(6.0, 0.0, 0.0)),
///     LandmarkPair3D::new(Point3::new(0.0, 1.0, 0.0), Point3::new(5.0, 1.0, 0.0)),
///     LandmarkPair3D::new(Point3::new(0.0, 0.0, 1.0), Point3::new(5.0, 0.0, 1.0)),
/// ];
///
/// let coefs = TpsSolverInputs3D::new(pairs)
///     .with_affine_translation(false)
///     .solve()
///     .unwrap();
/// assert!(coefs.a1.norm() < 1e-12);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TpsSolverInputs3D {
    /// Landmark pairs to interpolate.
    pub landmarks: Vec<LandmarkPair3D>,
    /// Keep the `a1` translation term.
    pub apply_affine_translation: bool,
    /// Keep the magnitude of the `a2..a4` linear terms.
    pub apply_affine_scale: bool,
    /// Keep the off-axis components of the `a2..a4` linear terms.
    pub apply_affine_rotation: bool,
    /// Keep the radial-basis terms.
    pub apply_non_affine_warp: bool,
}

impl Default for TpsSolverInputs3D {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl TpsSolverInputs3D {
    /// Creates inputs that keep every part of the warp.
    #[must_use]
    pub const fn new(landmarks: Vec<LandmarkPair3D>) -> Self {
        Self {
            landmarks,
            apply_affine_translation: true,
            apply_affine_scale: true,
            apply_affine_rotation: true,
            apply_non_affine_warp: true,
        }
    }

    /// Sets whether the translation term is kept.
    #[must_use]
    pub fn with_affine_translation(mut self, apply: bool) -> Self {
        self.apply_affine_translation = apply;
        self
    }

    /// Sets whether the linear terms keep their scale.
    #[must_use]
    pub fn with_affine_scale(mut self, apply: bool) -> Self {
        self.apply_affine_scale = apply;
        self
    }

    /// Sets whether the linear terms keep their rotation.
    #[must_use]
    pub fn with_affine_rotation(mut self, apply: bool) -> Self {
        self.apply_affine_rotation = apply;
        self
    }

    /// Sets whether the radial-basis terms are kept.
    #[must_use]
    pub fn with_non_affine_warp(mut self, apply: bool) -> Self {
        self.apply_non_affine_warp = apply;
        self
    }

    /// Solves for the coefficients and applies the configured adjustments.
    ///
    /// # Errors
    ///
    /// See [`solve_coefficients`].
    pub fn solve(&self) -> TpsResult<TpsCoefficients3D> {
        let mut coefs = solve_coefficients(&self.landmarks)?;

        if !self.apply_affine_translation {
            coefs.a1 = Vector3::zeros();
        }
        if !self.apply_affine_scale {
            coefs.a2 = normalize_or_zero(coefs.a2);
            coefs.a3 = normalize_or_zero(coefs.a3);
            coefs.a4 = normalize_or_zero(coefs.a4);
        }
        if !self.apply_affine_rotation {
            coefs.a2 = Vector3::new(coefs.a2.norm(), 0.0, 0.0);
            coefs.a3 = Vector3::new(0.0, coefs.a3.norm(), 0.0);
            coefs.a4 = Vector3::new(0.0, 0.0, coefs.a4.norm());
        }
        if !self.apply_non_affine_warp {
            coefs.non_affine_terms.clear();
        }

        Ok(coefs)
    }
}

fn normalize_or_zero(v: Vector3<f64>) -> Vector3<f64> {
    v.try_normalize(f64::EPSILON).unwrap_or_else(Vector3::zeros)
}

/// Computes thin-plate spline coefficients that map every source landmark
/// onto its destination.
///
/// The output holds one non-affine term per input pair, in input order.
/// Solving is deterministic: the same pairs in the same order always give
/// bit-identical coefficients.
///
/// # Errors
///
/// - [`TpsError::NoLandmarks`] if `pairs` is empty
/// - [`TpsError::NonFiniteLandmark`] if any coordinate is NaN or infinite
/// - [`TpsError::SingularSystem`] if the system cannot be solved (e.g.
///   coincident, collinear or coplanar source landmarks)
///
/// # Example
///
/// ```
/// use warp_tps::{solve_coefficients, warp_point, LandmarkPair3D};
/// use nalgebra::{Point3, Vector3};
///
/// let offset = Vector3::new(1.0, 0.0, 0.0);
/// let sources = [
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(1.0, 0.0, 0.0),
///     Point3::new(0.0, 1.0, 0.0),
///     Point3::new(0.0, 0.0, 1.0),
/// ];
/// let pairs: Vec<_> = sources
///     .iter()
///     .map(|s| LandmarkPair3D::new(*s, s + offset))
///     .collect();
///
/// let coefs = solve_coefficients(&pairs).unwrap();
/// let warped = warp_point(&coefs, &Point3::new(3.0, -2.0, 7.0));
/// assert!((warped - Point3::new(4.0, -2.0, 7.0)).norm() < 1e-9);
/// ```
pub fn solve_coefficients(pairs: &[LandmarkPair3D]) -> TpsResult<TpsCoefficients3D> {
    if pairs.is_empty() {
        return Err(TpsError::NoLandmarks);
    }
    if let Some(index) = pairs.iter().position(|p| !p.is_finite()) {
        return Err(TpsError::NonFiniteLandmark { index });
    }

    let n = pairs.len();
    let size = n + 4;
    debug!(landmarks = n, "solving TPS coefficients");

    let mut l = DMatrix::<f64>::zeros(size, size);

    // K block
    for (row, pi) in pairs.iter().enumerate() {
        for (col, pj) in pairs.iter().enumerate() {
            l[(row, col)] = radial_basis((pi.source - pj.source).norm());
        }
    }

    // P and Pᵀ blocks; the bottom-right 4x4 block stays zero
    for (i, pair) in pairs.iter().enumerate() {
        let s = &pair.source;
        l[(i, n)] = 1.0;
        l[(i, n + 1)] = s.x;
        l[(i, n + 2)] = s.y;
        l[(i, n + 3)] = s.z;

        l[(n, i)] = 1.0;
        l[(n + 1, i)] = s.x;
        l[(n + 2, i)] = s.y;
        l[(n + 3, i)] = s.z;
    }

    let mut rhs = DMatrix::<f64>::zeros(size, 3);
    for (i, pair) in pairs.iter().enumerate() {
        rhs[(i, 0)] = pair.destination.x;
        rhs[(i, 1)] = pair.destination.y;
        rhs[(i, 2)] = pair.destination.z;
    }

    let lu = l.lu();
    if !is_well_conditioned(&lu.u()) {
        return Err(TpsError::SingularSystem { landmarks: n });
    }
    let solution = lu
        .solve(&rhs)
        .ok_or(TpsError::SingularSystem { landmarks: n })?;

    let row = |r: usize| Vector3::new(solution[(r, 0)], solution[(r, 1)], solution[(r, 2)]);

    let coefs = TpsCoefficients3D {
        a1: row(n),
        a2: row(n + 1),
        a3: row(n + 2),
        a4: row(n + 3),
        non_affine_terms: pairs
            .iter()
            .enumerate()
            .map(|(i, pair)| TpsNonAffineTerm3D::new(pair.source, row(i)))
            .collect(),
    };

    if !coefs.is_finite() {
        return Err(TpsError::SingularSystem { landmarks: n });
    }

    debug!(landmarks = n, "solved TPS coefficients");
    Ok(coefs)
}

/// Rejects factorizations whose pivots span too many orders of magnitude.
fn is_well_conditioned(u: &DMatrix<f64>) -> bool {
    let diagonal = u.diagonal();
    let largest = diagonal.amax();
    let smallest = diagonal.amin();

    largest.is_finite() && largest > 0.0 && smallest / largest >= MIN_PIVOT_RATIO
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::needless_range_loop
)]
mod tests {
    use super::*;
    use crate::warp_point;
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    fn tetrahedron() -> [Point3<f64>; 4] {
        [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ]
    }

    fn bumpy_pairs() -> Vec<LandmarkPair3D> {
        let sources = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
            Point3::new(0.0, 0.0, 2.0),
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(2.0, 2.0, 0.5),
            Point3::new(-1.0, 0.5, 1.5),
        ];
        sources
            .iter()
            .enumerate()
            .map(|(i, s)| {
                #[allow(clippy::cast_precision_loss)]
                let wobble = Vector3::new(0.1 * i as f64, -0.05 * i as f64, 0.2);
                LandmarkPair3D::new(*s, s + wobble)
            })
            .collect()
    }

    #[test]
    fn test_radial_basis() {
        assert_eq!(radial_basis(0.0), 0.0);
        assert_eq!(radial_basis(1e-12), 0.0);
        assert_relative_eq!(radial_basis(3.0), 9.0 * 3.0_f64.ln(), epsilon = 1e-12);
        assert!(radial_basis(0.5) < 0.0);
    }

    #[test]
    fn test_empty_pairs_error() {
        assert_eq!(solve_coefficients(&[]), Err(TpsError::NoLandmarks));
    }

    #[test]
    fn test_non_finite_pair_error() {
        let mut pairs = bumpy_pairs();
        pairs[3].destination.y = f64::NAN;
        assert_eq!(
            solve_coefficients(&pairs),
            Err(TpsError::NonFiniteLandmark { index: 3 })
        );
    }

    #[test]
    fn test_one_term_per_pair() {
        let pairs = bumpy_pairs();
        let coefs = solve_coefficients(&pairs).unwrap();
        assert_eq!(coefs.non_affine_terms.len(), pairs.len());
        for (term, pair) in coefs.non_affine_terms.iter().zip(&pairs) {
            assert_eq!(term.control_point, pair.source);
        }
    }

    #[test]
    fn test_weights_satisfy_orthogonality_constraints() {
        let coefs = solve_coefficients(&bumpy_pairs()).unwrap();

        let sum: Vector3<f64> = coefs.non_affine_terms.iter().map(|t| t.weight).sum();
        assert!(sum.norm() < 1e-9, "Σw = {sum:?}");

        for axis in 0..3 {
            let moment: Vector3<f64> = coefs
                .non_affine_terms
                .iter()
                .map(|t| t.weight * t.control_point[axis])
                .sum();
            assert!(moment.norm() < 1e-9, "Σw·s[{axis}] = {moment:?}");
        }
    }

    #[test]
    fn test_interpolates_landmarks() {
        let pairs = bumpy_pairs();
        let coefs = solve_coefficients(&pairs).unwrap();
        for pair in &pairs {
            let warped = warp_point(&coefs, &pair.source);
            assert_relative_eq!(warped, pair.destination, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_pure_translation_is_affine() {
        let offset = Vector3::new(1.0, 0.0, 0.0);
        let pairs: Vec<_> = tetrahedron()
            .iter()
            .map(|s| LandmarkPair3D::new(*s, s + offset))
            .collect();

        let coefs = solve_coefficients(&pairs).unwrap();
        assert_relative_eq!(coefs.a1, offset, epsilon = 1e-10);
        assert_relative_eq!(coefs.a2, Vector3::x(), epsilon = 1e-10);
        assert_relative_eq!(coefs.a3, Vector3::y(), epsilon = 1e-10);
        assert_relative_eq!(coefs.a4, Vector3::z(), epsilon = 1e-10);
        for term in &coefs.non_affine_terms {
            assert!(term.weight.norm() < 1e-10);
        }
    }

    #[test]
    fn test_coplanar_sources_are_singular() {
        let pairs: Vec<_> = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.5, 0.25, 0.0),
        ]
        .into_iter()
        .map(LandmarkPair3D::fixed)
        .collect();

        assert_eq!(
            solve_coefficients(&pairs),
            Err(TpsError::SingularSystem { landmarks: 5 })
        );
    }

    #[test]
    fn test_duplicate_sources_are_singular() {
        let mut pairs: Vec<_> = tetrahedron().into_iter().map(LandmarkPair3D::fixed).collect();
        pairs.push(pairs[1]);

        assert!(matches!(
            solve_coefficients(&pairs),
            Err(TpsError::SingularSystem { .. })
        ));
    }

    #[test]
    fn test_solve_is_deterministic() {
        let pairs = bumpy_pairs();
        let a = solve_coefficients(&pairs).unwrap();
        let b = solve_coefficients(&pairs).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_inputs_strip_translation() {
        let offset = Vector3::new(3.0, -1.0, 2.0);
        let pairs: Vec<_> = tetrahedron()
            .iter()
            .map(|s| LandmarkPair3D::new(*s, s + offset))
            .collect();

        let coefs = TpsSolverInputs3D::new(pairs)
            .with_affine_translation(false)
            .solve()
            .unwrap();
        assert_eq!(coefs.a1, Vector3::zeros());
        assert_relative_eq!(coefs.a2, Vector3::x(), epsilon = 1e-10);
    }

    #[test]
    fn test_inputs_strip_scale() {
        let pairs: Vec<_> = tetrahedron()
            .iter()
            .map(|s| LandmarkPair3D::new(*s, Point3::from(s.coords * 3.0)))
            .collect();

        let coefs = TpsSolverInputs3D::new(pairs)
            .with_affine_scale(false)
            .solve()
            .unwrap();
        assert_relative_eq!(coefs.a2.norm(), 1.0, epsilon = 1e-10);
        assert_relative_eq!(coefs.a3.norm(), 1.0, epsilon = 1e-10);
        assert_relative_eq!(coefs.a4.norm(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_inputs_strip_rotation() {
        // 90 degrees about Z, scaled by 2
        let pairs: Vec<_> = tetrahedron()
            .iter()
            .map(|s| LandmarkPair3D::new(*s, Point3::new(-2.0 * s.y, 2.0 * s.x, 2.0 * s.z)))
            .collect();

        let coefs = TpsSolverInputs3D::new(pairs)
            .with_affine_rotation(false)
            .solve()
            .unwrap();
        assert_relative_eq!(coefs.a2, Vector3::new(2.0, 0.0, 0.0), epsilon = 1e-9);
        assert_relative_eq!(coefs.a3, Vector3::new(0.0, 2.0, 0.0), epsilon = 1e-9);
        assert_relative_eq!(coefs.a4, Vector3::new(0.0, 0.0, 2.0), epsilon = 1e-9);
    }

    #[test]
    fn test_inputs_strip_non_affine() {
        let coefs = TpsSolverInputs3D::new(bumpy_pairs())
            .with_non_affine_warp(false)
            .solve()
            .unwrap();
        assert!(coefs.non_affine_terms.is_empty());
    }

    #[test]
    fn test_default_inputs_fail_like_empty_solve() {
        assert_eq!(TpsSolverInputs3D::default().solve(), Err(TpsError::NoLandmarks));
    }
}
