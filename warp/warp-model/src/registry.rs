//! Registry mapping configuration type tags to strategy constructors.

use hashbrown::HashMap;

use crate::config::StrategyDeclaration;
use crate::error::{ModelWarpError, ModelWarpResult};
use crate::strategy::{
    StrategyDefinition, StrategyKind, StrategySpec, TpsStrategyParams, LEAST_SQUARES_FRAME_PARAMS,
    TPS_FRAME_PARAMS, TPS_MESH_PARAMS,
};

/// Tag of the thin-plate spline mesh strategy.
pub const TPS_MESH_TAG: &str = "thin_plate_spline_mesh";
/// Tag of the thin-plate spline frame-origin strategy.
pub const TPS_FRAME_TAG: &str = "thin_plate_spline_frame";
/// Tag of the least-squares rigid frame strategy.
pub const LEAST_SQUARES_FRAME_TAG: &str = "least_squares_frame";
/// Tag of the mesh strategy that leaves meshes unwarped.
pub const IDENTITY_MESH_TAG: &str = "identity_mesh";
/// Tag of the frame strategy that leaves frames unwarped.
pub const IDENTITY_FRAME_TAG: &str = "identity_frame";
/// Tag of the mesh strategy that always fails validation.
pub const PRODUCE_ERROR_MESH_TAG: &str = "produce_error_mesh";
/// Tag of the frame strategy that always fails validation.
pub const PRODUCE_ERROR_FRAME_TAG: &str = "produce_error_frame";

/// Builds a strategy spec from a declaration.
pub type StrategyConstructor = fn(&StrategyDeclaration) -> ModelWarpResult<StrategySpec>;

/// Maps type tags to constructors.
///
/// # Example
///
/// ```
/// use warp_model::{StrategyDeclaration, StrategyRegistry};
///
/// let registry = StrategyRegistry::with_builtin_strategies();
/// let declaration = StrategyDeclaration::new("identity_mesh", "keep").with_target("*");
/// let definition = registry.build(&declaration).unwrap();
/// assert_eq!(definition.name, "keep");
///
/// assert!(StrategyRegistry::new().build(&declaration).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    constructors: HashMap<String, StrategyConstructor>,
}

impl StrategyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every built-in strategy.
    #[must_use]
    pub fn with_builtin_strategies() -> Self {
        let mut registry = Self::new();
        registry.register(TPS_MESH_TAG, build_tps_mesh);
        registry.register(TPS_FRAME_TAG, build_tps_frame);
        registry.register(LEAST_SQUARES_FRAME_TAG, build_least_squares_frame);
        registry.register(IDENTITY_MESH_TAG, |d| {
            no_params(d).map(|()| StrategySpec::Identity(StrategyKind::Mesh))
        });
        registry.register(IDENTITY_FRAME_TAG, |d| {
            no_params(d).map(|()| StrategySpec::Identity(StrategyKind::Frame))
        });
        registry.register(PRODUCE_ERROR_MESH_TAG, |d| {
            no_params(d).map(|()| StrategySpec::ProduceError(StrategyKind::Mesh))
        });
        registry.register(PRODUCE_ERROR_FRAME_TAG, |d| {
            no_params(d).map(|()| StrategySpec::ProduceError(StrategyKind::Frame))
        });
        registry
    }

    /// Registers (or replaces) the constructor for `tag`.
    pub fn register(&mut self, tag: impl Into<String>, constructor: StrategyConstructor) {
        self.constructors.insert(tag.into(), constructor);
    }

    /// Returns true if `tag` has a constructor.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    /// Registered tags, sorted.
    #[must_use]
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Builds a definition from a declaration.
    ///
    /// # Errors
    ///
    /// Returns [`ModelWarpError::UnknownStrategyType`] for unregistered
    /// tags, and otherwise any error from the constructor or from
    /// [`StrategyDefinition::new`].
    pub fn build(&self, declaration: &StrategyDeclaration) -> ModelWarpResult<StrategyDefinition> {
        let constructor = self
            .constructors
            .get(&declaration.type_tag)
            .ok_or_else(|| ModelWarpError::UnknownStrategyType(declaration.type_tag.clone()))?;
        let spec = constructor(declaration)?;
        StrategyDefinition::new(declaration, spec)
    }
}

fn build_tps_mesh(declaration: &StrategyDeclaration) -> ModelWarpResult<StrategySpec> {
    TpsStrategyParams::from_params(&declaration.name, &declaration.params, TPS_MESH_PARAMS)
        .map(StrategySpec::TpsMesh)
}

fn build_tps_frame(declaration: &StrategyDeclaration) -> ModelWarpResult<StrategySpec> {
    TpsStrategyParams::from_params(&declaration.name, &declaration.params, TPS_FRAME_PARAMS)
        .map(StrategySpec::TpsFrame)
}

fn build_least_squares_frame(declaration: &StrategyDeclaration) -> ModelWarpResult<StrategySpec> {
    TpsStrategyParams::from_params(&declaration.name, &declaration.params, LEAST_SQUARES_FRAME_PARAMS)
        .map(StrategySpec::LeastSquaresFrame)
}

fn no_params(declaration: &StrategyDeclaration) -> ModelWarpResult<()> {
    match declaration.params.first() {
        Some(param) => Err(ModelWarpError::UnknownParameter {
            strategy: declaration.name.clone(),
            parameter: param.name.clone(),
        }),
        None => Ok(()),
    }
}
