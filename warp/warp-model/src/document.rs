//! The model warp document.
//!
//! A [`ModelWarpDocument`] ties a model, its warp configuration and the
//! strategies bound from that configuration together, and answers every
//! question a user interface asks about whether and how the model can be
//! warped.
//!
//! Documents are cheap to clone. Clones share their contents until one of
//! them is mutated, so a copy can be edited without affecting the original.

use hashbrown::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ModelWarpConfiguration;
use crate::error::{ModelWarpError, ModelWarpResult};
use crate::factories::{FrameWarperFactories, PointWarperFactories};
use crate::mesh_io::{load_obj, save_obj, SurfaceMesh};
use crate::model::{AnatomicalModel, ModelAndState, ModelFrame, ModelMesh, ModelState};
use crate::model_xml::load_model;
use crate::registry::StrategyRegistry;
use crate::validation::{ValidationCheckResult, ValidationCheckState, WarpDetail};
use crate::warper::WarpingStrategy;

/// A mesh or frame whose warp can be queried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WarpTarget<'a> {
    /// A mesh.
    Mesh(&'a ModelMesh),
    /// A frame.
    Frame(&'a ModelFrame),
}

impl WarpTarget<'_> {
    /// Absolute path of the target.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Mesh(m) => &m.path,
            Self::Frame(f) => &f.path,
        }
    }
}

impl<'a> From<&'a ModelMesh> for WarpTarget<'a> {
    fn from(mesh: &'a ModelMesh) -> Self {
        Self::Mesh(mesh)
    }
}

impl<'a> From<&'a ModelFrame> for WarpTarget<'a> {
    fn from(frame: &'a ModelFrame) -> Self {
        Self::Frame(frame)
    }
}

#[derive(Debug, Clone, Default)]
struct BoundFactories {
    points: PointWarperFactories,
    frames: FrameWarperFactories,
}

impl BoundFactories {
    fn build(
        model: &AnatomicalModel,
        configuration: &ModelWarpConfiguration,
        registry: &StrategyRegistry,
    ) -> ModelWarpResult<Self> {
        let definitions = configuration.finalize(registry)?;
        Ok(Self {
            points: PointWarperFactories::new(model, &definitions)?,
            frames: FrameWarperFactories::new(model, &definitions)?,
        })
    }

    fn find(&self, target: WarpTarget<'_>) -> Option<&WarpingStrategy> {
        match target {
            WarpTarget::Mesh(m) => self.points.find(&m.path),
            WarpTarget::Frame(f) => self.frames.find(&f.path),
        }
    }
}

/// A mesh after warping.
#[derive(Debug, Clone, PartialEq)]
pub struct WarpedMesh {
    /// Absolute path of the mesh component.
    pub path: String,
    /// The source mesh file.
    pub source_file: PathBuf,
    /// Warped geometry.
    pub mesh: SurfaceMesh,
}

/// A model after warping.
#[derive(Debug, Clone, PartialEq)]
pub struct WarpedModel {
    /// The model with warped frame offsets.
    pub model: AnatomicalModel,
    /// Frame poses of the warped model.
    pub state: ModelState,
    /// Every warped mesh, in model order.
    pub meshes: Vec<WarpedMesh>,
}

/// A model, its warp configuration and the strategies bound from it.
///
/// # Example
///
/// ```
/// use warp_model::{ModelWarpDocument, ValidationCheckState};
///
/// let mut document = ModelWarpDocument::default();
/// assert_eq!(document.state(), ValidationCheckState::Ok);
/// assert_eq!(document.warp_blending_factor(), 1.0);
///
/// let mut copy = document.clone();
/// copy.set_warp_blending_factor(0.25);
/// assert_eq!(document.warp_blending_factor(), 1.0);
/// assert_ne!(copy, document);
/// ```
#[derive(Debug, Clone)]
pub struct ModelWarpDocument {
    model: Arc<ModelAndState>,
    configuration: Arc<ModelWarpConfiguration>,
    factories: Arc<BoundFactories>,
    registry: Arc<StrategyRegistry>,
}

impl Default for ModelWarpDocument {
    fn default() -> Self {
        Self {
            model: Arc::default(),
            configuration: Arc::default(),
            factories: Arc::default(),
            registry: Arc::new(StrategyRegistry::with_builtin_strategies()),
        }
    }
}

/// Documents are equal when they share every part.
impl PartialEq for ModelWarpDocument {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.model, &other.model)
            && Arc::ptr_eq(&self.configuration, &other.configuration)
            && Arc::ptr_eq(&self.factories, &other.factories)
            && Arc::ptr_eq(&self.registry, &other.registry)
    }
}

impl ModelWarpDocument {
    /// Creates a document using the built-in strategies.
    ///
    /// # Errors
    ///
    /// Returns an error if the model's frames do not form a tree or the
    /// configuration cannot be finalized.
    pub fn new(model: AnatomicalModel, configuration: ModelWarpConfiguration) -> ModelWarpResult<Self> {
        Self::with_registry(model, configuration, StrategyRegistry::with_builtin_strategies())
    }

    /// Creates a document resolving strategy types through `registry`.
    ///
    /// # Errors
    ///
    /// See [`ModelWarpDocument::new`].
    pub fn with_registry(
        model: AnatomicalModel,
        configuration: ModelWarpConfiguration,
        registry: StrategyRegistry,
    ) -> ModelWarpResult<Self> {
        let factories = BoundFactories::build(&model, &configuration, &registry)?;
        info!(
            model = %model.name,
            meshes = factories.points.len(),
            frames = factories.frames.len(),
            "built model warp document"
        );
        Ok(Self {
            model: Arc::new(ModelAndState::new(model)?),
            configuration: Arc::new(configuration),
            factories: Arc::new(factories),
            registry: Arc::new(registry),
        })
    }

    /// Loads a model file and the warp configuration beside it.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be read or parsed.
    pub fn from_model_file<P: AsRef<Path>>(path: P) -> ModelWarpResult<Self> {
        Self::from_model_file_with_registry(path, StrategyRegistry::with_builtin_strategies())
    }

    /// Like [`ModelWarpDocument::from_model_file`], resolving strategy types
    /// through `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be read or parsed.
    pub fn from_model_file_with_registry<P: AsRef<Path>>(path: P, registry: StrategyRegistry) -> ModelWarpResult<Self> {
        let path = path.as_ref();
        let model = load_model(path)?;
        let configuration = ModelWarpConfiguration::load_for_model(path)?;
        Self::with_registry(model, configuration, registry)
    }

    /// The wrapped model.
    #[must_use]
    pub fn model(&self) -> &AnatomicalModel {
        &self.model.model
    }

    /// Frame poses of the unwarped model.
    #[must_use]
    pub fn model_state(&self) -> &ModelState {
        &self.model.state
    }

    /// The warp configuration.
    #[must_use]
    pub fn configuration(&self) -> &ModelWarpConfiguration {
        &self.configuration
    }

    /// The strategy bound to `target`, if any.
    #[must_use]
    pub fn strategy<'a>(&self, target: impl Into<WarpTarget<'a>>) -> Option<&WarpingStrategy> {
        self.factories.find(target.into())
    }

    /// Diagnostics for `target`; empty when no strategy is bound.
    #[must_use]
    pub fn details<'a>(&self, target: impl Into<WarpTarget<'a>>) -> Vec<WarpDetail> {
        self.strategy(target).map(WarpingStrategy::details).unwrap_or_default()
    }

    /// Validation checks for `target`.
    ///
    /// A target with no bound strategy yields a single error check.
    #[must_use]
    pub fn validate<'a>(&self, target: impl Into<WarpTarget<'a>>) -> Vec<ValidationCheckResult> {
        let target = target.into();
        match self.factories.find(target) {
            Some(strategy) => strategy.validate().to_vec(),
            None => vec![missing_strategy(target)],
        }
    }

    /// Worst validation state of `target`.
    #[must_use]
    pub fn state_of<'a>(&self, target: impl Into<WarpTarget<'a>>) -> ValidationCheckState {
        match self.factories.find(target.into()) {
            Some(strategy) => strategy.state(),
            None => ValidationCheckState::Error,
        }
    }

    /// Worst validation state over every mesh and frame. A model with
    /// nothing to warp is `Ok`.
    #[must_use]
    pub fn state(&self) -> ValidationCheckState {
        let model = self.model();
        model
            .meshes
            .iter()
            .map(|m| self.state_of(m))
            .chain(model.frames.iter().map(|f| self.state_of(f)))
            .max()
            .unwrap_or_default()
    }

    /// Every failing or warning check across the model, prefixed by path.
    #[must_use]
    pub fn problems(&self) -> Vec<(String, ValidationCheckResult)> {
        let model = self.model();
        let targets = model
            .meshes
            .iter()
            .map(WarpTarget::from)
            .chain(model.frames.iter().map(WarpTarget::from));

        let mut out = Vec::new();
        for target in targets {
            for check in self.validate(target) {
                if check.state != ValidationCheckState::Ok {
                    out.push((target.path().to_string(), check));
                }
            }
        }
        out
    }

    /// Blend between the unwarped (0) and fully warped (1) model.
    #[must_use]
    pub fn warp_blending_factor(&self) -> f64 {
        self.configuration.blending_factor()
    }

    /// Sets the blending factor, clamped to `[0, 1]`.
    pub fn set_warp_blending_factor(&mut self, factor: f64) {
        Arc::make_mut(&mut self.configuration).set_blending_factor(factor);
    }

    /// Replaces the configuration and rebinds every strategy.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be finalized; the
    /// document is left unchanged.
    pub fn set_configuration(&mut self, configuration: ModelWarpConfiguration) -> ModelWarpResult<()> {
        let factories = BoundFactories::build(self.model(), &configuration, &self.registry)?;
        self.configuration = Arc::new(configuration);
        self.factories = Arc::new(factories);
        Ok(())
    }

    /// Re-reads the model and its configuration from disk and rebinds every
    /// strategy. Documents without a model file only rebind.
    ///
    /// # Errors
    ///
    /// Returns an error if loading fails; the document is left unchanged.
    pub fn reload(&mut self) -> ModelWarpResult<()> {
        let reloaded = match &self.model().file_path {
            Some(path) => {
                let path = path.clone();
                let model = load_model(&path)?;
                let configuration = ModelWarpConfiguration::load_for_model(&path)?;
                Self::with_registry(model, configuration, (*self.registry).clone())?
            }
            None => Self::with_registry(
                self.model().clone(),
                (*self.configuration).clone(),
                (*self.registry).clone(),
            )?,
        };
        *self = reloaded;
        info!(model = %self.model().name, "reloaded model warp document");
        Ok(())
    }

    /// Returns true unless some mesh or frame fails validation.
    #[must_use]
    pub fn can_warp_model(&self) -> bool {
        self.state() != ValidationCheckState::Error
    }

    /// Warps every frame and mesh at the current blending factor.
    ///
    /// # Errors
    ///
    /// Returns [`ModelWarpError::NotWarpable`] if some entity fails
    /// validation, or an I/O error if a source mesh cannot be read.
    pub fn warp_model(&self) -> ModelWarpResult<WarpedModel> {
        if let Some((path, check)) = self
            .problems()
            .into_iter()
            .find(|(_, check)| check.state == ValidationCheckState::Error)
        {
            return Err(ModelWarpError::not_warpable(path, check.description));
        }

        let blend = self.warp_blending_factor();
        let source = self.model();
        let mut model = source.clone();

        for frame in &mut model.frames {
            if let Some(strategy) = self.factories.frames.find(&frame.path) {
                *frame = strategy.warp_frame(frame, blend)?;
            }
        }

        let mut meshes = Vec::with_capacity(source.meshes.len());
        for mesh in &source.meshes {
            let source_file = source.resolve_mesh_file(mesh);
            let input = load_obj(&source_file)?;
            let warped = match self.factories.points.find(&mesh.path) {
                Some(strategy) => strategy.warp_mesh(&input, blend)?,
                None => input,
            };
            debug!(mesh = %mesh.path, vertices = warped.vertices.len(), "warped mesh");
            meshes.push(WarpedMesh {
                path: mesh.path.clone(),
                source_file,
                mesh: warped,
            });
        }

        let state = ModelState::new(&model)?;
        info!(model = %model.name, blend, meshes = meshes.len(), "warped model");
        Ok(WarpedModel { model, state, meshes })
    }

    /// Warps the model and writes every warped mesh into `directory` as OBJ.
    ///
    /// Each mesh keeps its file path relative to the model directory, so
    /// `Geometry/femur.obj` is written to `directory/Geometry/femur.obj`.
    /// Mesh files outside the model directory keep only their file name.
    /// Returns the written paths in model order.
    ///
    /// # Errors
    ///
    /// See [`ModelWarpDocument::warp_model`]. Returns
    /// [`ModelWarpError::ExportCollision`] before writing anything if two
    /// meshes map to the same output file, and an I/O error if a directory
    /// or mesh cannot be written.
    pub fn export_warped_meshes<P: AsRef<Path>>(&self, directory: P) -> ModelWarpResult<Vec<PathBuf>> {
        let directory = directory.as_ref();
        let warped = self.warp_model()?;
        let model_directory = self.model().directory();

        let mut claimed: HashMap<PathBuf, &str> = HashMap::with_capacity(warped.meshes.len());
        let mut planned = Vec::with_capacity(warped.meshes.len());
        for mesh in &warped.meshes {
            let Some(path) = export_path(directory, &model_directory, &mesh.source_file) else {
                continue;
            };
            if let Some(first) = claimed.insert(path.clone(), &mesh.path) {
                return Err(ModelWarpError::ExportCollision {
                    path,
                    first: first.to_string(),
                    second: mesh.path.clone(),
                });
            }
            planned.push((path, &mesh.mesh));
        }

        std::fs::create_dir_all(directory)?;
        let mut written = Vec::with_capacity(planned.len());
        for (path, mesh) in planned {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            save_obj(mesh, &path)?;
            written.push(path);
        }
        info!(directory = %directory.display(), meshes = written.len(), "exported warped meshes");
        Ok(written)
    }
}

fn export_path(directory: &Path, model_directory: &Path, source_file: &Path) -> Option<PathBuf> {
    match source_file.strip_prefix(model_directory) {
        Ok(relative) if relative.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir)) => {
            Some(directory.join(relative))
        }
        _ => source_file.file_name().map(|name| directory.join(name)),
    }
}

fn missing_strategy(target: WarpTarget<'_>) -> ValidationCheckResult {
    ValidationCheckResult::required(format!("no warp strategy found for {}", target.path()), false)
}
