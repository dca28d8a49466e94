//! Warp strategy definitions.
//!
//! A [`StrategyDefinition`] is the typed form of one strategy declared in a
//! [`crate::ModelWarpConfiguration`]: which entities it targets and how it
//! warps them. Definitions are bound to concrete meshes and frames by the
//! factories, producing [`crate::WarpingStrategy`] instances.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use warp_tps::{LandmarkPair3D, TpsSolverInputs3D};

use crate::config::{StrategyDeclaration, StrategyParam};
use crate::error::{ModelWarpError, ModelWarpResult};

/// Target string that matches every entity of a strategy's kind.
pub const WILDCARD_TARGET: &str = "*";

/// The kind of entity a strategy warps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Warps mesh vertices.
    Mesh,
    /// Warps frame offsets.
    Frame,
}

impl StrategyKind {
    /// Lowercase name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mesh => "mesh",
            Self::Frame => "frame",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How well a strategy's targets match an entity path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StrategyMatchQuality {
    /// No target matches.
    None,
    /// Only the wildcard matches.
    Wildcard,
    /// A target names the entity explicitly.
    Exact,
}

/// One target of a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyTarget {
    /// Matches every entity of the strategy's kind.
    Wildcard,
    /// Matches the entity with this absolute path.
    Path(String),
}

impl StrategyTarget {
    /// Parses a target string; `*` is the wildcard.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s == WILDCARD_TARGET {
            Self::Wildcard
        } else {
            Self::Path(s.to_string())
        }
    }

    /// The target as written in configuration.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Wildcard => WILDCARD_TARGET,
            Self::Path(p) => p,
        }
    }

    /// How well this target matches `path`.
    #[must_use]
    pub fn match_quality(&self, path: &str) -> StrategyMatchQuality {
        match self {
            Self::Wildcard => StrategyMatchQuality::Wildcard,
            Self::Path(p) if p == path => StrategyMatchQuality::Exact,
            Self::Path(_) => StrategyMatchQuality::None,
        }
    }
}

impl fmt::Display for StrategyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables shared by the landmark-driven strategies.
///
/// # Example
///
/// ```
/// use warp_model::TpsStrategyParams;
///
/// let params = TpsStrategyParams::new()
///     .with_source_landmarks_prescale(0.001)
///     .with_affine_translation(false);
/// assert!(!params.apply_affine_translation);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TpsStrategyParams {
    /// Factor applied to every source landmark before solving.
    pub source_landmarks_prescale: f64,
    /// Factor applied to every destination landmark before solving.
    pub destination_landmarks_prescale: f64,
    /// Keep the affine translation term.
    pub apply_affine_translation: bool,
    /// Keep the affine scale.
    pub apply_affine_scale: bool,
    /// Keep the affine rotation.
    pub apply_affine_rotation: bool,
    /// Keep the non-affine terms.
    pub apply_non_affine_warp: bool,
    /// Explicit source landmarks file, relative to the model file.
    pub source_landmarks_file: Option<PathBuf>,
    /// Explicit destination landmarks file, relative to the model file.
    pub destination_landmarks_file: Option<PathBuf>,
}

impl Default for TpsStrategyParams {
    fn default() -> Self {
        Self {
            source_landmarks_prescale: 1.0,
            destination_landmarks_prescale: 1.0,
            apply_affine_translation: true,
            apply_affine_scale: true,
            apply_affine_rotation: true,
            apply_non_affine_warp: true,
            source_landmarks_file: None,
            destination_landmarks_file: None,
        }
    }
}

/// Parameter names accepted by the TPS mesh strategy.
pub(crate) const TPS_MESH_PARAMS: &[&str] = &[
    "source_landmarks_prescale",
    "destination_landmarks_prescale",
    "apply_affine_translation",
    "apply_affine_scale",
    "apply_affine_rotation",
    "apply_non_affine_warp",
];

/// Parameter names accepted by the TPS frame strategy.
pub(crate) const TPS_FRAME_PARAMS: &[&str] = &[
    "source_landmarks_prescale",
    "destination_landmarks_prescale",
    "apply_affine_translation",
    "apply_affine_scale",
    "apply_affine_rotation",
    "apply_non_affine_warp",
    "source_landmarks_file",
    "destination_landmarks_file",
];

/// Parameter names accepted by the least-squares frame strategy.
pub(crate) const LEAST_SQUARES_FRAME_PARAMS: &[&str] = &[
    "source_landmarks_prescale",
    "destination_landmarks_prescale",
    "source_landmarks_file",
    "destination_landmarks_file",
];

impl TpsStrategyParams {
    /// Creates default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source landmark prescale.
    #[must_use]
    pub fn with_source_landmarks_prescale(mut self, scale: f64) -> Self {
        self.source_landmarks_prescale = scale;
        self
    }

    /// Sets the destination landmark prescale.
    #[must_use]
    pub fn with_destination_landmarks_prescale(mut self, scale: f64) -> Self {
        self.destination_landmarks_prescale = scale;
        self
    }

    /// Sets whether the affine translation is kept.
    #[must_use]
    pub fn with_affine_translation(mut self, apply: bool) -> Self {
        self.apply_affine_translation = apply;
        self
    }

    /// Sets whether the non-affine terms are kept.
    #[must_use]
    pub fn with_non_affine_warp(mut self, apply: bool) -> Self {
        self.apply_non_affine_warp = apply;
        self
    }

    /// Sets explicit landmark files.
    #[must_use]
    pub fn with_landmark_files(mut self, source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        self.source_landmarks_file = Some(source.into());
        self.destination_landmarks_file = Some(destination.into());
        self
    }

    /// Parses declaration parameters, rejecting any not in `accepted`.
    pub(crate) fn from_params(
        strategy: &str,
        params: &[StrategyParam],
        accepted: &[&str],
    ) -> ModelWarpResult<Self> {
        let mut out = Self::default();

        for param in params {
            if !accepted.contains(&param.name.as_str()) {
                return Err(ModelWarpError::UnknownParameter {
                    strategy: strategy.to_string(),
                    parameter: param.name.clone(),
                });
            }
            let invalid = || ModelWarpError::InvalidParameter {
                strategy: strategy.to_string(),
                parameter: param.name.clone(),
                value: param.value.clone(),
            };
            let parse_f64 = || {
                param
                    .value
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(invalid)
            };
            let parse_bool = || param.value.trim().parse::<bool>().map_err(|_| invalid());

            match param.name.as_str() {
                "source_landmarks_prescale" => out.source_landmarks_prescale = parse_f64()?,
                "destination_landmarks_prescale" => out.destination_landmarks_prescale = parse_f64()?,
                "apply_affine_translation" => out.apply_affine_translation = parse_bool()?,
                "apply_affine_scale" => out.apply_affine_scale = parse_bool()?,
                "apply_affine_rotation" => out.apply_affine_rotation = parse_bool()?,
                "apply_non_affine_warp" => out.apply_non_affine_warp = parse_bool()?,
                "source_landmarks_file" => out.source_landmarks_file = Some(PathBuf::from(&param.value)),
                "destination_landmarks_file" => {
                    out.destination_landmarks_file = Some(PathBuf::from(&param.value));
                }
                _ => {}
            }
        }

        if out.source_landmarks_file.is_some() != out.destination_landmarks_file.is_some() {
            let missing = if out.source_landmarks_file.is_some() {
                "destination_landmarks_file"
            } else {
                "source_landmarks_file"
            };
            return Err(ModelWarpError::InvalidParameter {
                strategy: strategy.to_string(),
                parameter: missing.to_string(),
                value: String::new(),
            });
        }

        Ok(out)
    }

    /// Applies the prescales to each pair.
    #[must_use]
    pub fn prescale(&self, pairs: &[LandmarkPair3D]) -> Vec<LandmarkPair3D> {
        pairs
            .iter()
            .map(|p| p.prescaled(self.source_landmarks_prescale, self.destination_landmarks_prescale))
            .collect()
    }

    /// Solver inputs for `pairs`, prescaled and with the `apply_*` flags set.
    #[must_use]
    pub fn solver_inputs(&self, pairs: &[LandmarkPair3D]) -> TpsSolverInputs3D {
        TpsSolverInputs3D::new(self.prescale(pairs))
            .with_affine_translation(self.apply_affine_translation)
            .with_affine_scale(self.apply_affine_scale)
            .with_affine_rotation(self.apply_affine_rotation)
            .with_non_affine_warp(self.apply_non_affine_warp)
    }
}

/// What a strategy does, independent of the entities it targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StrategySpec {
    /// Thin-plate spline warp of mesh vertices.
    TpsMesh(TpsStrategyParams),
    /// Thin-plate spline warp of a frame's origin.
    TpsFrame(TpsStrategyParams),
    /// Rigid least-squares fit applied to a frame.
    LeastSquaresFrame(TpsStrategyParams),
    /// Leaves entities of the given kind unwarped.
    Identity(StrategyKind),
    /// Always fails validation.
    ProduceError(StrategyKind),
}

impl StrategySpec {
    /// The kind of entity this strategy warps.
    #[must_use]
    pub const fn kind(&self) -> StrategyKind {
        match self {
            Self::TpsMesh(_) => StrategyKind::Mesh,
            Self::TpsFrame(_) | Self::LeastSquaresFrame(_) => StrategyKind::Frame,
            Self::Identity(kind) | Self::ProduceError(kind) => *kind,
        }
    }

    /// The configuration type tag for this strategy.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::TpsMesh(_) => crate::registry::TPS_MESH_TAG,
            Self::TpsFrame(_) => crate::registry::TPS_FRAME_TAG,
            Self::LeastSquaresFrame(_) => crate::registry::LEAST_SQUARES_FRAME_TAG,
            Self::Identity(StrategyKind::Mesh) => crate::registry::IDENTITY_MESH_TAG,
            Self::Identity(StrategyKind::Frame) => crate::registry::IDENTITY_FRAME_TAG,
            Self::ProduceError(StrategyKind::Mesh) => crate::registry::PRODUCE_ERROR_MESH_TAG,
            Self::ProduceError(StrategyKind::Frame) => crate::registry::PRODUCE_ERROR_FRAME_TAG,
        }
    }
}

/// A named strategy with its targets, ready to be bound to entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDefinition {
    /// Name of the strategy declaration.
    pub name: String,
    /// Targets, in declaration order, without duplicates.
    pub targets: Vec<StrategyTarget>,
    /// What the strategy does.
    pub spec: StrategySpec,
}

impl StrategyDefinition {
    /// Creates a definition from a declaration's name and targets.
    ///
    /// # Errors
    ///
    /// Returns [`ModelWarpError::NoTargets`] if the declaration has no
    /// targets and [`ModelWarpError::DuplicateTarget`] if any target
    /// (including the wildcard) appears twice.
    pub fn new(declaration: &StrategyDeclaration, spec: StrategySpec) -> ModelWarpResult<Self> {
        if declaration.targets.is_empty() {
            return Err(ModelWarpError::NoTargets {
                strategy: declaration.name.clone(),
            });
        }

        let mut targets: Vec<StrategyTarget> = Vec::with_capacity(declaration.targets.len());
        for raw in &declaration.targets {
            let target = StrategyTarget::parse(raw);
            if targets.contains(&target) {
                return Err(ModelWarpError::DuplicateTarget {
                    strategy: declaration.name.clone(),
                    target: raw.clone(),
                });
            }
            targets.push(target);
        }

        Ok(Self {
            name: declaration.name.clone(),
            targets,
            spec,
        })
    }

    /// The kind of entity this strategy warps.
    #[must_use]
    pub const fn kind(&self) -> StrategyKind {
        self.spec.kind()
    }

    /// Best match quality over every target.
    #[must_use]
    pub fn match_quality(&self, path: &str) -> StrategyMatchQuality {
        self.targets
            .iter()
            .map(|t| t.match_quality(path))
            .max()
            .unwrap_or(StrategyMatchQuality::None)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    fn param(name: &str, value: &str) -> StrategyParam {
        StrategyParam::new(name, value)
    }

    #[test]
    fn test_match_quality_ordering() {
        assert!(StrategyMatchQuality::None < StrategyMatchQuality::Wildcard);
        assert!(StrategyMatchQuality::Wildcard < StrategyMatchQuality::Exact);
    }

    #[test]
    fn test_target_matching() {
        assert_eq!(StrategyTarget::parse("*"), StrategyTarget::Wildcard);
        let exact = StrategyTarget::parse("/pelvis/geom");
        assert_eq!(exact.match_quality("/pelvis/geom"), StrategyMatchQuality::Exact);
        assert_eq!(exact.match_quality("/pelvis"), StrategyMatchQuality::None);
        assert_eq!(
            StrategyTarget::Wildcard.match_quality("/anything"),
            StrategyMatchQuality::Wildcard
        );
    }

    #[test]
    fn test_definition_prefers_exact() {
        let declaration = StrategyDeclaration::new("identity_mesh", "keep")
            .with_target("*")
            .with_target("/a/geom");
        let definition =
            StrategyDefinition::new(&declaration, StrategySpec::Identity(StrategyKind::Mesh)).unwrap();
        assert_eq!(definition.match_quality("/a/geom"), StrategyMatchQuality::Exact);
        assert_eq!(definition.match_quality("/b/geom"), StrategyMatchQuality::Wildcard);
    }

    #[test]
    fn test_definition_rejects_duplicate_targets() {
        let declaration = StrategyDeclaration::new("identity_mesh", "keep")
            .with_target("*")
            .with_target("*");
        let result = StrategyDefinition::new(&declaration, StrategySpec::Identity(StrategyKind::Mesh));
        assert!(matches!(result, Err(ModelWarpError::DuplicateTarget { target, .. }) if target == "*"));
    }

    #[test]
    fn test_definition_rejects_no_targets() {
        let declaration = StrategyDeclaration::new("identity_mesh", "keep");
        let result = StrategyDefinition::new(&declaration, StrategySpec::Identity(StrategyKind::Mesh));
        assert!(matches!(result, Err(ModelWarpError::NoTargets { .. })));
    }

    #[test]
    fn test_params_parse() {
        let params = TpsStrategyParams::from_params(
            "s",
            &[
                param("source_landmarks_prescale", "0.001"),
                param("apply_affine_rotation", "false"),
            ],
            TPS_MESH_PARAMS,
        )
        .unwrap();
        assert_eq!(params.source_landmarks_prescale, 0.001);
        assert!(!params.apply_affine_rotation);
        assert!(params.apply_affine_scale);
    }

    #[test]
    fn test_params_reject_unknown_and_invalid() {
        let unknown = TpsStrategyParams::from_params("s", &[param("source_landmarks_file", "a.csv")], TPS_MESH_PARAMS);
        assert!(matches!(unknown, Err(ModelWarpError::UnknownParameter { .. })));

        let invalid = TpsStrategyParams::from_params("s", &[param("apply_affine_scale", "maybe")], TPS_MESH_PARAMS);
        assert!(matches!(invalid, Err(ModelWarpError::InvalidParameter { .. })));

        let nan = TpsStrategyParams::from_params("s", &[param("source_landmarks_prescale", "NaN")], TPS_MESH_PARAMS);
        assert!(matches!(nan, Err(ModelWarpError::InvalidParameter { .. })));
    }

    #[test]
    fn test_params_require_both_files() {
        let result = TpsStrategyParams::from_params(
            "s",
            &[param("source_landmarks_file", "a.csv")],
            TPS_FRAME_PARAMS,
        );
        assert!(matches!(
            result,
            Err(ModelWarpError::InvalidParameter { parameter, .. }) if parameter == "destination_landmarks_file"
        ));
    }

    #[test]
    fn test_solver_inputs_prescale() {
        let params = TpsStrategyParams::new()
            .with_source_landmarks_prescale(2.0)
            .with_destination_landmarks_prescale(0.5)
            .with_non_affine_warp(false);
        let inputs = params.solver_inputs(&[LandmarkPair3D::fixed(Point3::new(1.0, 1.0, 1.0))]);
        assert_eq!(inputs.landmarks[0].source, Point3::new(2.0, 2.0, 2.0));
        assert_eq!(inputs.landmarks[0].destination, Point3::new(0.5, 0.5, 0.5));
        assert!(!inputs.apply_non_affine_warp);
    }

    #[test]
    fn test_spec_kind_and_tag() {
        assert_eq!(StrategySpec::TpsMesh(TpsStrategyParams::new()).kind(), StrategyKind::Mesh);
        assert_eq!(
            StrategySpec::LeastSquaresFrame(TpsStrategyParams::new()).tag(),
            "least_squares_frame"
        );
        assert_eq!(StrategySpec::ProduceError(StrategyKind::Frame).kind(), StrategyKind::Frame);
    }
}
