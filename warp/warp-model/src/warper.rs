//! Strategies bound to a single mesh or frame.
//!
//! Binding resolves every file a strategy needs for its entity. Landmarks
//! are only read, and coefficients only solved, the first time the strategy
//! is validated or asked to warp; the result is cached for the lifetime of
//! the strategy. Configuration changes rebuild strategies from scratch.

use nalgebra::{Point3, UnitQuaternion};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{debug, warn};
use warp_tps::{spans_plane, warp_point_blended, warp_points_in_place, LandmarkPair3D, TpsCoefficients3D, TpsResult};

use crate::error::{ModelWarpError, ModelWarpResult};
use crate::landmarks::{
    destination_mesh_path, landmarks_path_for, pair_landmarks, paired_only, read_landmarks_csv, MaybePairedLandmark,
};
use crate::mesh_io::SurfaceMesh;
use crate::model::{AnatomicalModel, ModelFrame, ModelMesh};
use crate::rigid::{fit_rigid_transform, RigidTransform, MIN_RIGID_CORRESPONDENCES};
use crate::strategy::{StrategyDefinition, StrategyKind, StrategySpec, TpsStrategyParams};
use crate::validation::{aggregate_state, ValidationCheckResult, ValidationCheckState, WarpDetail};

/// Minimum number of paired landmarks a thin-plate spline strategy needs.
pub const MIN_TPS_LANDMARKS: usize = 4;

/// A source landmarks file and the destination file it pairs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LandmarkFiles {
    /// Landmarks on the source shape.
    pub source: PathBuf,
    /// Landmarks on the destination shape.
    pub destination: PathBuf,
}

#[derive(Debug, Clone)]
struct BoundTarget {
    strategy: String,
    spec_tag: &'static str,
    kind: StrategyKind,
    path: String,
}

impl BoundTarget {
    fn new(definition: &StrategyDefinition, path: &str) -> Self {
        Self {
            strategy: definition.name.clone(),
            spec_tag: definition.spec.tag(),
            kind: definition.kind(),
            path: path.to_string(),
        }
    }

    fn details(&self) -> Vec<WarpDetail> {
        vec![
            WarpDetail::new("strategy", &self.strategy),
            WarpDetail::new("strategy type", self.spec_tag),
        ]
    }
}

// ---------------------------------------------------------------------------
// Landmark loading shared by the landmark-driven strategies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct LandmarkFileReport {
    files: LandmarkFiles,
    /// `None` when the file is missing or unreadable.
    source_count: Option<usize>,
    destination_count: Option<usize>,
}

#[derive(Debug, Clone, Default)]
struct CorrespondenceAnalysis {
    reports: Vec<LandmarkFileReport>,
    landmarks: Vec<MaybePairedLandmark>,
}

impl CorrespondenceAnalysis {
    fn load(files: &[LandmarkFiles]) -> Self {
        let mut analysis = Self::default();
        for f in files {
            let source = read_optional(&f.source);
            let destination = read_optional(&f.destination);
            analysis.reports.push(LandmarkFileReport {
                files: f.clone(),
                source_count: source.as_ref().map(Vec::len),
                destination_count: destination.as_ref().map(Vec::len),
            });
            analysis.landmarks.extend(pair_landmarks(
                source.as_deref().unwrap_or_default(),
                destination.as_deref().unwrap_or_default(),
            ));
        }
        analysis
    }

    fn pairs(&self) -> Vec<LandmarkPair3D> {
        paired_only(&self.landmarks)
    }

    fn unpaired_count(&self) -> usize {
        self.landmarks.iter().filter(|l| !l.is_paired()).count()
    }

    /// At least `n` pairs whose sources are not collinear.
    fn has_at_least(&self, n: usize) -> bool {
        let sources: Vec<Point3<f64>> = self.pairs().iter().map(|p| p.source).collect();
        sources.len() >= n && spans_plane(&sources)
    }

    fn file_checks(&self, checks: &mut Vec<ValidationCheckResult>) {
        for report in &self.reports {
            checks.push(ValidationCheckResult::required(
                format!("has source landmarks file at {}", report.files.source.display()),
                report.source_count.is_some(),
            ));
            checks.push(ValidationCheckResult::required(
                format!("has destination landmarks file at {}", report.files.destination.display()),
                report.destination_count.is_some(),
            ));
        }
    }

    fn count_checks(&self, minimum: usize, checks: &mut Vec<ValidationCheckResult>) {
        checks.push(ValidationCheckResult::required(
            format!(
                "has at least {minimum} non-collinear paired landmarks (found {})",
                self.pairs().len()
            ),
            self.has_at_least(minimum),
        ));
    }

    fn unpaired_check(&self, checks: &mut Vec<ValidationCheckResult>) {
        let unpaired = self.unpaired_count();
        checks.push(ValidationCheckResult::recommended(
            format!("all landmarks are paired ({unpaired} unpaired)"),
            unpaired == 0,
        ));
    }

    fn details(&self, details: &mut Vec<WarpDetail>) {
        let present = |count: Option<usize>| count.is_some();
        for report in &self.reports {
            details.push(WarpDetail::new("source landmarks path", report.files.source.display()));
            details.push(WarpDetail::new("has source landmarks file", present(report.source_count)));
            details.push(WarpDetail::new("number of source landmarks", report.source_count.unwrap_or(0)));
            details.push(WarpDetail::new("destination landmarks path", report.files.destination.display()));
            details.push(WarpDetail::new("has destination landmarks file", present(report.destination_count)));
            details.push(WarpDetail::new(
                "number of destination landmarks",
                report.destination_count.unwrap_or(0),
            ));
        }
        details.push(WarpDetail::new("number of paired landmarks", self.pairs().len()));
        details.push(WarpDetail::new("number of unpaired landmarks", self.unpaired_count()));
    }
}

fn read_optional(path: &std::path::Path) -> Option<Vec<crate::landmarks::Landmark>> {
    match read_landmarks_csv(path) {
        Ok(landmarks) => Some(landmarks),
        Err(ModelWarpError::FileNotFound { .. }) => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read landmarks file");
            None
        }
    }
}

fn solve_check(coefficients: &TpsResult<TpsCoefficients3D>) -> ValidationCheckResult {
    match coefficients {
        Ok(_) => ValidationCheckResult::required("TPS coefficients solved", true),
        Err(e) => ValidationCheckResult::required(format!("TPS coefficients could not be solved: {e}"), false),
    }
}

#[derive(Debug, Clone)]
struct TpsSolution {
    analysis: CorrespondenceAnalysis,
    coefficients: TpsResult<TpsCoefficients3D>,
    checks: Vec<ValidationCheckResult>,
}

// ---------------------------------------------------------------------------
// Bound strategies
// ---------------------------------------------------------------------------

/// Thin-plate spline warp of one mesh's vertices.
#[derive(Debug, Clone)]
pub struct TpsPointWarper {
    target: BoundTarget,
    params: TpsStrategyParams,
    source_mesh: PathBuf,
    destination_mesh: PathBuf,
    landmarks: LandmarkFiles,
    solution: OnceLock<TpsSolution>,
}

impl TpsPointWarper {
    fn solution(&self) -> &TpsSolution {
        self.solution.get_or_init(|| {
            let analysis = CorrespondenceAnalysis::load(std::slice::from_ref(&self.landmarks));
            let coefficients = self.params.solver_inputs(&analysis.pairs()).solve();

            let (source_count, destination_count) = analysis
                .reports
                .first()
                .map_or((None, None), |r| (r.source_count, r.destination_count));

            let mut checks = vec![
                ValidationCheckResult::required(
                    format!("has source landmarks file at {}", self.landmarks.source.display()),
                    source_count.is_some(),
                ),
                ValidationCheckResult::required(
                    "source landmarks file contains landmarks",
                    source_count.unwrap_or(0) > 0,
                ),
                ValidationCheckResult::required(
                    format!("has destination mesh at {}", self.destination_mesh.display()),
                    self.destination_mesh.exists(),
                ),
                ValidationCheckResult::required(
                    format!("has destination landmarks file at {}", self.landmarks.destination.display()),
                    destination_count.is_some(),
                ),
                ValidationCheckResult::required(
                    "destination landmarks file contains landmarks",
                    destination_count.unwrap_or(0) > 0,
                ),
            ];
            analysis.count_checks(MIN_TPS_LANDMARKS, &mut checks);
            checks.push(solve_check(&coefficients));
            analysis.unpaired_check(&mut checks);

            debug!(mesh = %self.target.path, pairs = analysis.pairs().len(), "validated TPS mesh strategy");
            TpsSolution {
                analysis,
                coefficients,
                checks,
            }
        })
    }

    fn details(&self) -> Vec<WarpDetail> {
        let solution = self.solution();
        let mut details = self.target.details();
        details.push(WarpDetail::new("source mesh path", self.source_mesh.display()));
        details.push(WarpDetail::new("destination mesh path", self.destination_mesh.display()));
        details.push(WarpDetail::new("has destination mesh", self.destination_mesh.exists()));
        solution.analysis.details(&mut details);
        details
    }
}

/// Thin-plate spline warp of one frame's origin.
///
/// The frame's translation is expressed in its parent, so the warp is
/// solved from landmarks in the parent's coordinates: those of the meshes
/// attached to the parent, or explicitly configured files.
#[derive(Debug, Clone)]
pub struct TpsFrameWarper {
    target: BoundTarget,
    parent: String,
    params: TpsStrategyParams,
    landmarks: Vec<LandmarkFiles>,
    solution: OnceLock<TpsSolution>,
}

impl TpsFrameWarper {
    fn solution(&self) -> &TpsSolution {
        self.solution.get_or_init(|| {
            let analysis = CorrespondenceAnalysis::load(&self.landmarks);
            let coefficients = self.params.solver_inputs(&analysis.pairs()).solve();

            let mut checks = vec![landmark_sources_check(&self.parent, &self.landmarks)];
            analysis.file_checks(&mut checks);
            analysis.count_checks(MIN_TPS_LANDMARKS, &mut checks);
            checks.push(solve_check(&coefficients));
            analysis.unpaired_check(&mut checks);

            debug!(frame = %self.target.path, pairs = analysis.pairs().len(), "validated TPS frame strategy");
            TpsSolution {
                analysis,
                coefficients,
                checks,
            }
        })
    }

    fn details(&self) -> Vec<WarpDetail> {
        let mut details = self.target.details();
        details.push(WarpDetail::new("parent frame", &self.parent));
        self.solution().analysis.details(&mut details);
        details
    }
}

fn landmark_sources_check(parent: &str, files: &[LandmarkFiles]) -> ValidationCheckResult {
    ValidationCheckResult::required(
        format!("has landmark sources (meshes attached to {parent} or explicit landmark files)"),
        !files.is_empty(),
    )
}

#[derive(Debug)]
struct RigidSolution {
    analysis: CorrespondenceAnalysis,
    fit: ModelWarpResult<RigidTransform>,
    checks: Vec<ValidationCheckResult>,
}

/// Rigid least-squares fit applied to one frame.
#[derive(Debug)]
pub struct LeastSquaresFrameWarper {
    target: BoundTarget,
    parent: String,
    params: TpsStrategyParams,
    landmarks: Vec<LandmarkFiles>,
    solution: OnceLock<RigidSolution>,
}

impl Clone for LeastSquaresFrameWarper {
    // The cached fit holds a non-cloneable error, so clones start unvalidated.
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            parent: self.parent.clone(),
            params: self.params.clone(),
            landmarks: self.landmarks.clone(),
            solution: OnceLock::new(),
        }
    }
}

impl LeastSquaresFrameWarper {
    fn solution(&self) -> &RigidSolution {
        self.solution.get_or_init(|| {
            let analysis = CorrespondenceAnalysis::load(&self.landmarks);
            let fit = fit_rigid_transform(&self.params.prescale(&analysis.pairs()));

            let mut checks = vec![landmark_sources_check(&self.parent, &self.landmarks)];
            analysis.file_checks(&mut checks);
            analysis.count_checks(MIN_RIGID_CORRESPONDENCES, &mut checks);
            checks.push(match &fit {
                Ok(_) => ValidationCheckResult::required("rigid transform fitted", true),
                Err(e) => ValidationCheckResult::required(format!("rigid transform could not be fitted: {e}"), false),
            });
            analysis.unpaired_check(&mut checks);

            debug!(frame = %self.target.path, pairs = analysis.pairs().len(), "validated least-squares frame strategy");
            RigidSolution { analysis, fit, checks }
        })
    }

    fn details(&self) -> Vec<WarpDetail> {
        let solution = self.solution();
        let mut details = self.target.details();
        details.push(WarpDetail::new("parent frame", &self.parent));
        solution.analysis.details(&mut details);
        if let Ok(fit) = &solution.fit {
            let t = fit.translation;
            details.push(WarpDetail::new("fitted translation", format!("({}, {}, {})", t.x, t.y, t.z)));
            details.push(WarpDetail::new("fitted rotation angle", fit.rotation.angle()));
        }
        details
    }
}

/// Leaves its entity unwarped.
#[derive(Debug, Clone)]
pub struct IgnoreWarper {
    target: BoundTarget,
    checks: OnceLock<Vec<ValidationCheckResult>>,
}

/// Always fails validation.
#[derive(Debug, Clone)]
pub struct ProduceErrorWarper {
    target: BoundTarget,
    checks: OnceLock<Vec<ValidationCheckResult>>,
}

/// A strategy bound to exactly one mesh or frame.
#[derive(Debug, Clone)]
pub enum WarpingStrategy {
    /// Thin-plate spline warp of mesh vertices.
    TpsPoint(TpsPointWarper),
    /// Thin-plate spline warp of a frame origin.
    TpsFrame(TpsFrameWarper),
    /// Rigid least-squares fit applied to a frame.
    LeastSquaresFrame(LeastSquaresFrameWarper),
    /// Leaves the entity unwarped.
    Ignore(IgnoreWarper),
    /// Always fails validation.
    ProduceError(ProduceErrorWarper),
}

impl WarpingStrategy {
    /// Binds a mesh strategy definition to `mesh`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelWarpError::StrategyKindMismatch`] if `definition` is a
    /// frame strategy.
    pub fn for_mesh(
        definition: &StrategyDefinition,
        mesh: &ModelMesh,
        model: &AnatomicalModel,
    ) -> ModelWarpResult<Self> {
        let target = BoundTarget::new(definition, &mesh.path);
        match &definition.spec {
            StrategySpec::TpsMesh(params) => {
                let source_mesh = model.resolve_mesh_file(mesh);
                let destination_mesh = destination_mesh_path(&model.directory(), &mesh.file);
                let landmarks = LandmarkFiles {
                    source: landmarks_path_for(&source_mesh),
                    destination: landmarks_path_for(&destination_mesh),
                };
                Ok(Self::TpsPoint(TpsPointWarper {
                    target,
                    params: params.clone(),
                    source_mesh,
                    destination_mesh,
                    landmarks,
                    solution: OnceLock::new(),
                }))
            }
            StrategySpec::Identity(StrategyKind::Mesh) => Ok(Self::ignore(target)),
            StrategySpec::ProduceError(StrategyKind::Mesh) => Ok(Self::produce_error(target)),
            _ => Err(kind_mismatch(&target, StrategyKind::Frame)),
        }
    }

    /// Binds a frame strategy definition to `frame`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelWarpError::StrategyKindMismatch`] if `definition` is a
    /// mesh strategy.
    pub fn for_frame(
        definition: &StrategyDefinition,
        frame: &ModelFrame,
        model: &AnatomicalModel,
    ) -> ModelWarpResult<Self> {
        let target = BoundTarget::new(definition, &frame.path);
        match &definition.spec {
            StrategySpec::TpsFrame(params) => Ok(Self::TpsFrame(TpsFrameWarper {
                target,
                parent: frame.parent.clone(),
                landmarks: frame_landmark_files(frame, model, params),
                params: params.clone(),
                solution: OnceLock::new(),
            })),
            StrategySpec::LeastSquaresFrame(params) => Ok(Self::LeastSquaresFrame(LeastSquaresFrameWarper {
                target,
                parent: frame.parent.clone(),
                landmarks: frame_landmark_files(frame, model, params),
                params: params.clone(),
                solution: OnceLock::new(),
            })),
            StrategySpec::Identity(StrategyKind::Frame) => Ok(Self::ignore(target)),
            StrategySpec::ProduceError(StrategyKind::Frame) => Ok(Self::produce_error(target)),
            _ => Err(kind_mismatch(&target, StrategyKind::Mesh)),
        }
    }

    fn ignore(target: BoundTarget) -> Self {
        Self::Ignore(IgnoreWarper {
            target,
            checks: OnceLock::new(),
        })
    }

    fn produce_error(target: BoundTarget) -> Self {
        Self::ProduceError(ProduceErrorWarper {
            target,
            checks: OnceLock::new(),
        })
    }

    fn target(&self) -> &BoundTarget {
        match self {
            Self::TpsPoint(w) => &w.target,
            Self::TpsFrame(w) => &w.target,
            Self::LeastSquaresFrame(w) => &w.target,
            Self::Ignore(w) => &w.target,
            Self::ProduceError(w) => &w.target,
        }
    }

    /// The kind of entity this strategy warps.
    #[must_use]
    pub fn kind(&self) -> StrategyKind {
        self.target().kind
    }

    /// Name of the strategy declaration this was bound from.
    #[must_use]
    pub fn strategy_name(&self) -> &str {
        &self.target().strategy
    }

    /// Configuration type tag of the strategy.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        self.target().spec_tag
    }

    /// Path of the mesh or frame this strategy is bound to.
    #[must_use]
    pub fn target_path(&self) -> &str {
        &self.target().path
    }

    /// Returns true once validation has run.
    #[must_use]
    pub fn is_validated(&self) -> bool {
        match self {
            Self::TpsPoint(w) => w.solution.get().is_some(),
            Self::TpsFrame(w) => w.solution.get().is_some(),
            Self::LeastSquaresFrame(w) => w.solution.get().is_some(),
            Self::Ignore(w) => w.checks.get().is_some(),
            Self::ProduceError(w) => w.checks.get().is_some(),
        }
    }

    /// Runs (once) and returns every validation check.
    pub fn validate(&self) -> &[ValidationCheckResult] {
        match self {
            Self::TpsPoint(w) => &w.solution().checks,
            Self::TpsFrame(w) => &w.solution().checks,
            Self::LeastSquaresFrame(w) => &w.solution().checks,
            Self::Ignore(w) => w.checks.get_or_init(|| {
                vec![ValidationCheckResult::new(
                    format!("{} is explicitly left unwarped", w.target.path),
                    ValidationCheckState::Ok,
                )]
            }),
            Self::ProduceError(w) => w.checks.get_or_init(|| {
                vec![ValidationCheckResult::required(
                    "this strategy always produces an error (for testing)",
                    false,
                )]
            }),
        }
    }

    /// Worst state over every validation check.
    pub fn state(&self) -> ValidationCheckState {
        aggregate_state(self.validate())
    }

    /// Human-readable diagnostics.
    pub fn details(&self) -> Vec<WarpDetail> {
        match self {
            Self::TpsPoint(w) => w.details(),
            Self::TpsFrame(w) => w.details(),
            Self::LeastSquaresFrame(w) => w.details(),
            Self::Ignore(w) => w.target.details(),
            Self::ProduceError(w) => w.target.details(),
        }
    }

    /// Solved coefficients, for the thin-plate spline strategies.
    pub fn coefficients(&self) -> Option<&TpsCoefficients3D> {
        match self {
            Self::TpsPoint(w) => w.solution().coefficients.as_ref().ok(),
            Self::TpsFrame(w) => w.solution().coefficients.as_ref().ok(),
            _ => None,
        }
    }

    fn ensure_warpable(&self) -> ModelWarpResult<()> {
        match self.validate().iter().find(|c| c.state == ValidationCheckState::Error) {
            Some(failed) => Err(ModelWarpError::not_warpable(self.target_path(), failed.description.clone())),
            None => Ok(()),
        }
    }

    /// Warps `mesh`, blending each vertex between its original and fully
    /// warped location.
    ///
    /// # Errors
    ///
    /// Returns [`ModelWarpError::StrategyKindMismatch`] for frame strategies
    /// and [`ModelWarpError::NotWarpable`] if validation reports an error.
    pub fn warp_mesh(&self, mesh: &SurfaceMesh, blend: f64) -> ModelWarpResult<SurfaceMesh> {
        if self.kind() != StrategyKind::Mesh {
            return Err(kind_mismatch(self.target(), StrategyKind::Frame));
        }
        self.ensure_warpable()?;

        match self {
            Self::TpsPoint(w) => {
                let coefficients = w.solution().coefficients.as_ref().map_err(|e| ModelWarpError::Tps(e.clone()))?;
                let mut warped = mesh.clone();
                warp_points_in_place(coefficients, &mut warped.vertices, blend);
                Ok(warped)
            }
            _ => Ok(mesh.clone()),
        }
    }

    /// Warps `frame`, blending between its original and fully warped pose.
    ///
    /// # Errors
    ///
    /// Returns [`ModelWarpError::StrategyKindMismatch`] for mesh strategies
    /// and [`ModelWarpError::NotWarpable`] if validation reports an error.
    pub fn warp_frame(&self, frame: &ModelFrame, blend: f64) -> ModelWarpResult<ModelFrame> {
        if self.kind() != StrategyKind::Frame {
            return Err(kind_mismatch(self.target(), StrategyKind::Mesh));
        }
        self.ensure_warpable()?;

        let mut warped = frame.clone();
        match self {
            Self::TpsFrame(w) => {
                let coefficients = w.solution().coefficients.as_ref().map_err(|e| ModelWarpError::Tps(e.clone()))?;
                let origin = Point3::from(frame.translation);
                warped.translation = warp_point_blended(coefficients, &origin, blend).coords;
            }
            Self::LeastSquaresFrame(w) => {
                let fit = w
                    .solution()
                    .fit
                    .as_ref()
                    .map_err(|e| ModelWarpError::not_warpable(&w.target.path, e.to_string()))?;

                let origin = Point3::from(frame.translation);
                let moved = fit.transform_point(&origin);
                warped.translation = origin.coords.lerp(&moved.coords, blend);

                let rotation = frame.rotation();
                let fitted: UnitQuaternion<f64> = fit.rotation * rotation;
                let blended = rotation
                    .try_slerp(&fitted, blend, 1e-9)
                    .unwrap_or(if blend < 0.5 { rotation } else { fitted });
                warped.set_rotation(&blended);
            }
            _ => {}
        }
        Ok(warped)
    }
}

fn kind_mismatch(target: &BoundTarget, kind: StrategyKind) -> ModelWarpError {
    ModelWarpError::StrategyKindMismatch {
        strategy: target.strategy.clone(),
        target: target.path.clone(),
        kind: kind.as_str(),
    }
}

fn frame_landmark_files(frame: &ModelFrame, model: &AnatomicalModel, params: &TpsStrategyParams) -> Vec<LandmarkFiles> {
    let directory = model.directory();
    if let (Some(source), Some(destination)) = (&params.source_landmarks_file, &params.destination_landmarks_file) {
        return vec![LandmarkFiles {
            source: directory.join(source),
            destination: directory.join(destination),
        }];
    }

    model
        .meshes_attached_to(&frame.parent)
        .map(|mesh| LandmarkFiles {
            source: landmarks_path_for(&model.resolve_mesh_file(mesh)),
            destination: landmarks_path_for(&destination_mesh_path(&directory, &mesh.file)),
        })
        .collect()
}
