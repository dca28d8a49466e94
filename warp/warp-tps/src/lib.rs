//! Thin-plate spline warping of 3D points.
//!
//! Given a set of corresponding landmarks on a source and a destination
//! shape, this crate solves for a smooth warp that maps every source
//! landmark exactly onto its destination and can then be evaluated at any
//! other point (mesh vertices, frame origins, ...).
//!
//! # Layer 0
//!
//! This is a Layer 0 crate: pure math with no file I/O. Loading landmarks
//! and binding warps to model components lives in `warp-model`.
//!
//! # Quick Start
//!
//! ```
//! use warp_tps::{solve_coefficients, warp_point, LandmarkPair3D};
//! use nalgebra::Point3;
//!
//! let pairs = vec![
//!     LandmarkPair3D::new(Point3::new(0.0, 0.0, 0.0), Point3::new(0.0, 0.0, 0.0)),
//!     LandmarkPair3D::new(Point3::new(1.0, 0.0, 0.0), Point3::new(1.2, 0.0, 0.0)),
//!     LandmarkPair3D::new(Point3::new(0.0, 1.0, 0.0), Point3::new(0.0, 1.0, 0.1)),
//!     LandmarkPair3D::new(Point3::new(0.0, 0.0, 1.0), Point3::new(0.0, 0.0, 1.0)),
//!     LandmarkPair3D::new(Point3::new(0.5, 0.5, 0.5), Point3::new(0.6, 0.5, 0.5)),
//! ];
//!
//! let coefs = solve_coefficients(&pairs).unwrap();
//!
//! // Landmarks are interpolated exactly
//! for pair in &pairs {
//!     assert!((warp_point(&coefs, &pair.source) - pair.destination).norm() < 1e-8);
//! }
//! ```
//!
//! # Basis Function
//!
//! The radial basis is `U(r) = r² ln(r)` with `U(0) = 0`, as in
//! Bookstein's formulation. Every output axis shares the same system and is
//! solved in a single LU factorization.
//!
//! # Degenerate Input
//!
//! Coincident, collinear or coplanar source landmarks make the system
//! singular. This is reported as [`TpsError::SingularSystem`] rather than
//! silently producing a degraded warp.

mod coefficients;
mod error;
mod landmark;
mod solver;
mod warp;

pub mod bindings;

pub use coefficients::{TpsCoefficients3D, TpsNonAffineTerm3D};
pub use error::{TpsError, TpsResult};
pub use landmark::{affine_rank, spans_plane, spans_volume, LandmarkPair3D, NamedLandmarkPair3D};
pub use solver::{radial_basis, solve_coefficients, TpsSolverInputs3D};
pub use warp::{warp_point, warp_point_blended, warp_points, warp_points_in_place};
