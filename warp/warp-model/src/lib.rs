//! Warping anatomical models with per-mesh and per-frame strategies.
//!
//! A model is a tree of frames with meshes attached. Each mesh and frame is
//! warped by the strategy that targets it in the model's warp
//! configuration:
//!
//! | Type tag | Warps | How |
//! |----------|-------|-----|
//! | `thin_plate_spline_mesh` | meshes | TPS from the mesh's own landmarks |
//! | `thin_plate_spline_frame` | frames | TPS of the frame origin |
//! | `least_squares_frame` | frames | rigid Kabsch fit of translation and orientation |
//! | `identity_mesh` / `identity_frame` | either | left unwarped |
//! | `produce_error_mesh` / `produce_error_frame` | either | always fails validation |
//!
//! # File Layout
//!
//! ```text
//! model.xml
//! model.warpconfig.xml                 optional, defaults to TPS everywhere
//! Geometry/femur.obj
//! Geometry/femur.landmarks.csv
//! DestinationGeometry/femur.obj
//! DestinationGeometry/femur.landmarks.csv
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use warp_model::ModelWarpDocument;
//!
//! let mut document = ModelWarpDocument::from_model_file("model.xml")?;
//! for (path, check) in document.problems() {
//!     println!("{path}: {check}");
//! }
//!
//! if document.can_warp_model() {
//!     document.set_warp_blending_factor(0.5);
//!     document.export_warped_meshes("warped")?;
//! }
//! # Ok::<(), warp_model::ModelWarpError>(())
//! ```
//!
//! # Validation
//!
//! Strategies validate lazily, the first time they are queried, and cache
//! the result. `Warning` checks are reported but do not block warping; any
//! `Error` check does. A mesh or frame with no strategy is an `Error`.

mod config;
mod document;
mod error;
mod factories;
mod landmarks;
mod mesh_io;
mod model;
mod model_xml;
mod registry;
mod rigid;
mod strategy;
mod validation;
mod warper;

pub use config::{ModelWarpConfiguration, StrategyDeclaration, StrategyParam, CONFIG_EXTENSION};
pub use document::{ModelWarpDocument, WarpTarget, WarpedMesh, WarpedModel};
pub use error::{ModelWarpError, ModelWarpResult};
pub use factories::{check_target_conflicts, FrameWarperFactories, PointWarperFactories};
pub use landmarks::{
    destination_mesh_path, landmarks_path_for, pair_landmarks, paired_only, parse_landmarks_csv, read_landmarks_csv,
    Landmark, MaybePairedLandmark, DESTINATION_GEOMETRY_DIR, LANDMARKS_EXTENSION,
};
pub use mesh_io::{load_obj, parse_obj, save_obj, write_obj, SurfaceMesh};
pub use model::{child_path, AnatomicalModel, ModelAndState, ModelFrame, ModelMesh, ModelState, GROUND_PATH};
pub use model_xml::{load_model, parse_model_str};
pub use registry::{
    StrategyConstructor, StrategyRegistry, IDENTITY_FRAME_TAG, IDENTITY_MESH_TAG, LEAST_SQUARES_FRAME_TAG,
    PRODUCE_ERROR_FRAME_TAG, PRODUCE_ERROR_MESH_TAG, TPS_FRAME_TAG, TPS_MESH_TAG,
};
pub use rigid::{fit_rigid_transform, RigidTransform, MIN_RIGID_CORRESPONDENCES};
pub use strategy::{
    StrategyDefinition, StrategyKind, StrategyMatchQuality, StrategySpec, StrategyTarget, TpsStrategyParams,
    WILDCARD_TARGET,
};
pub use validation::{aggregate_state, ValidationCheckResult, ValidationCheckState, WarpDetail};
pub use warper::{
    IgnoreWarper, LandmarkFiles, LeastSquaresFrameWarper, ProduceErrorWarper, TpsFrameWarper, TpsPointWarper,
    WarpingStrategy, MIN_TPS_LANDMARKS,
};
