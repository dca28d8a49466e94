//! Solved thin-plate spline coefficients.

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One radial-basis term of a thin-plate spline warp.
///
/// Contributes `weight * U(|p - control_point|)` to the warped location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TpsNonAffineTerm3D {
    /// Source landmark the term is centered on.
    pub control_point: Point3<f64>,
    /// Per-axis weight of the term.
    pub weight: Vector3<f64>,
}

impl TpsNonAffineTerm3D {
    /// Creates a non-affine term.
    #[must_use]
    pub const fn new(control_point: Point3<f64>, weight: Vector3<f64>) -> Self {
        Self {
            control_point,
            weight,
        }
    }
}

impl fmt::Display for TpsNonAffineTerm3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TpsNonAffineTerm3D{{weight = ({}, {}, {}), control_point = ({}, {}, {})}}",
            self.weight.x,
            self.weight.y,
            self.weight.z,
            self.control_point.x,
            self.control_point.y,
            self.control_point.z
        )
    }
}

/// Coefficients of a 3D thin-plate spline warp.
///
/// The warp evaluates as
///
/// ```text
/// f(p) = a1 + a2*p.x + a3*p.y + a4*p.z + Σᵢ wᵢ U(|p - cᵢ|)
/// ```
///
/// where each `aN` holds the X, Y and Z output coefficients together.
///
/// Default-constructed coefficients describe the identity warp.
///
/// # Example
///
/// ```
/// use warp_tps::TpsCoefficients3D;
/// use nalgebra::Point3;
///
/// let identity = TpsCoefficients3D::default();
/// let p = Point3::new(1.0, 2.0, 3.0);
/// assert_eq!(identity.warp_point(&p), p);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TpsCoefficients3D {
    /// Constant (translation) term.
    pub a1: Vector3<f64>,
    /// Coefficient of `p.x`.
    pub a2: Vector3<f64>,
    /// Coefficient of `p.y`.
    pub a3: Vector3<f64>,
    /// Coefficient of `p.z`.
    pub a4: Vector3<f64>,
    /// Radial-basis terms, one per landmark pair the coefficients were solved from.
    pub non_affine_terms: Vec<TpsNonAffineTerm3D>,
}

impl Default for TpsCoefficients3D {
    fn default() -> Self {
        Self {
            a1: Vector3::zeros(),
            a2: Vector3::x(),
            a3: Vector3::y(),
            a4: Vector3::z(),
            non_affine_terms: Vec::new(),
        }
    }
}

impl TpsCoefficients3D {
    /// Number of non-affine terms.
    #[must_use]
    pub fn num_non_affine_terms(&self) -> usize {
        self.non_affine_terms.len()
    }

    /// Evaluates only the affine part of the warp at `p`.
    #[must_use]
    pub fn affine_part(&self, p: &Point3<f64>) -> Vector3<f64> {
        self.a1 + self.a2 * p.x + self.a3 * p.y + self.a4 * p.z
    }

    /// Returns true if every coefficient is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        let finite = |v: &Vector3<f64>| v.iter().all(|c| c.is_finite());
        finite(&self.a1)
            && finite(&self.a2)
            && finite(&self.a3)
            && finite(&self.a4)
            && self
                .non_affine_terms
                .iter()
                .all(|t| finite(&t.weight) && t.control_point.coords.iter().all(|c| c.is_finite()))
    }
}

impl fmt::Display for TpsCoefficients3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = |v: &Vector3<f64>| format!("({}, {}, {})", v.x, v.y, v.z);
        write!(
            f,
            "TpsCoefficients3D{{a1 = {}, a2 = {}, a3 = {}, a4 = {}",
            v(&self.a1),
            v(&self.a2),
            v(&self.a3),
            v(&self.a4)
        )?;
        for (i, term) in self.non_affine_terms.iter().enumerate() {
            write!(f, ", w{i} = {term}")?;
        }
        write!(f, "}}")
    }
}
