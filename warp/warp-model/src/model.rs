//! The anatomical model being warped.
//!
//! A model is a tree of coordinate frames rooted at `/ground`, with meshes
//! attached to frames. Every frame and mesh is addressed by an absolute
//! component path such as `/pelvis` or `/pelvis/pelvis_geom`.

use crate::error::{ModelWarpError, ModelWarpResult};
use hashbrown::{HashMap, HashSet};
use nalgebra::{Isometry3, Rotation3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Path of the implicit root frame.
pub const GROUND_PATH: &str = "/ground";

/// A coordinate frame offset from its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFrame {
    /// Absolute component path.
    pub path: String,
    /// Short name (last path segment).
    pub name: String,
    /// Absolute path of the parent frame, [`GROUND_PATH`] for top-level frames.
    pub parent: String,
    /// Origin of this frame expressed in the parent frame.
    pub translation: Vector3<f64>,
    /// Body-fixed X-Y-Z Euler angles (radians) relative to the parent frame.
    pub orientation: Vector3<f64>,
}

impl ModelFrame {
    /// Creates a frame with no offset from its parent.
    pub fn new(name: impl Into<String>, parent: impl Into<String>) -> Self {
        let name = name.into();
        let parent = parent.into();
        Self {
            path: child_path(&parent, &name),
            name,
            parent,
            translation: Vector3::zeros(),
            orientation: Vector3::zeros(),
        }
    }

    /// Sets the translation.
    #[must_use]
    pub fn with_translation(mut self, translation: Vector3<f64>) -> Self {
        self.translation = translation;
        self
    }

    /// Sets the orientation.
    #[must_use]
    pub fn with_orientation(mut self, orientation: Vector3<f64>) -> Self {
        self.orientation = orientation;
        self
    }

    /// Rotation of this frame relative to its parent.
    #[must_use]
    pub fn rotation(&self) -> UnitQuaternion<f64> {
        let [a, b, c] = [self.orientation.x, self.orientation.y, self.orientation.z];
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), a)
            * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), b)
            * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), c)
    }

    /// Replaces the orientation with the body-fixed X-Y-Z angles of `rotation`.
    pub fn set_rotation(&mut self, rotation: &UnitQuaternion<f64>) {
        self.orientation = body_fixed_xyz(&rotation.to_rotation_matrix());
    }

    /// Transform from this frame's coordinates to its parent's.
    #[must_use]
    pub fn local_transform(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.translation), self.rotation())
    }
}

fn body_fixed_xyz(r: &Rotation3<f64>) -> Vector3<f64> {
    let m = r.matrix();
    let b = m[(0, 2)].clamp(-1.0, 1.0).asin();
    if m[(0, 2)].abs() < 1.0 - 1e-12 {
        let a = (-m[(1, 2)]).atan2(m[(2, 2)]);
        let c = (-m[(0, 1)]).atan2(m[(0, 0)]);
        Vector3::new(a, b, c)
    } else {
        // gimbal lock: only a ± c is determined
        Vector3::new(m[(2, 1)].atan2(m[(1, 1)]), b, 0.0)
    }
}

/// A mesh attached to a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMesh {
    /// Absolute component path.
    pub path: String,
    /// Short name (last path segment).
    pub name: String,
    /// Absolute path of the frame the mesh is attached to.
    pub frame: String,
    /// Mesh file, relative to the model file's directory.
    pub file: PathBuf,
}

impl ModelMesh {
    /// Creates a mesh attached to `frame`.
    pub fn new(name: impl Into<String>, frame: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        let name = name.into();
        let frame = frame.into();
        Self {
            path: child_path(&frame, &name),
            name,
            frame,
            file: file.into(),
        }
    }

    /// File name of the mesh, without directories.
    #[must_use]
    pub fn file_name(&self) -> Option<&std::ffi::OsStr> {
        self.file.file_name()
    }
}

/// An anatomical model: frames, meshes and the file they were loaded from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnatomicalModel {
    /// Model name.
    pub name: String,
    /// File the model was loaded from, if any.
    pub file_path: Option<PathBuf>,
    /// Frames, parents before children.
    pub frames: Vec<ModelFrame>,
    /// Meshes attached to the frames.
    pub meshes: Vec<ModelMesh>,
}

impl AnatomicalModel {
    /// Creates an empty model.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds a frame.
    #[must_use]
    pub fn with_frame(mut self, frame: ModelFrame) -> Self {
        self.frames.push(frame);
        self
    }

    /// Adds a mesh.
    #[must_use]
    pub fn with_mesh(mut self, mesh: ModelMesh) -> Self {
        self.meshes.push(mesh);
        self
    }

    /// Finds a frame by absolute path.
    #[must_use]
    pub fn find_frame(&self, path: &str) -> Option<&ModelFrame> {
        self.frames.iter().find(|f| f.path == path)
    }

    /// Finds a mesh by absolute path.
    #[must_use]
    pub fn find_mesh(&self, path: &str) -> Option<&ModelMesh> {
        self.meshes.iter().find(|m| m.path == path)
    }

    /// Meshes attached directly to the given frame.
    pub fn meshes_attached_to<'a>(&'a self, frame_path: &'a str) -> impl Iterator<Item = &'a ModelMesh> + 'a {
        self.meshes.iter().filter(move |m| m.frame == frame_path)
    }

    /// Directory that relative mesh and landmark paths resolve against.
    #[must_use]
    pub fn directory(&self) -> PathBuf {
        self.file_path
            .as_deref()
            .and_then(Path::parent)
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    }

    /// Absolute (or working-directory relative) location of a mesh file.
    #[must_use]
    pub fn resolve_mesh_file(&self, mesh: &ModelMesh) -> PathBuf {
        self.directory().join(&mesh.file)
    }

    /// Checks that component paths are unique and every parent exists.
    ///
    /// # Errors
    ///
    /// Returns [`ModelWarpError::DuplicateComponent`] or
    /// [`ModelWarpError::UndefinedParent`].
    pub fn check_topology(&self) -> ModelWarpResult<()> {
        let mut seen = HashSet::new();
        for path in self
            .frames
            .iter()
            .map(|f| f.path.as_str())
            .chain(self.meshes.iter().map(|m| m.path.as_str()))
        {
            if path == GROUND_PATH || !seen.insert(path) {
                return Err(ModelWarpError::DuplicateComponent(path.to_string()));
            }
        }

        for frame in &self.frames {
            if frame.parent != GROUND_PATH && self.find_frame(&frame.parent).is_none() {
                return Err(ModelWarpError::UndefinedParent {
                    frame: frame.path.clone(),
                    parent: frame.parent.clone(),
                });
            }
        }
        for mesh in &self.meshes {
            if mesh.frame != GROUND_PATH && self.find_frame(&mesh.frame).is_none() {
                return Err(ModelWarpError::UndefinedParent {
                    frame: mesh.path.clone(),
                    parent: mesh.frame.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Pose of every frame in ground.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelState {
    poses: HashMap<String, Isometry3<f64>>,
}

impl ModelState {
    /// Computes the ground pose of every frame in `model`.
    ///
    /// # Errors
    ///
    /// Returns an error if the model's topology is invalid or its frames
    /// form a cycle.
    pub fn new(model: &AnatomicalModel) -> ModelWarpResult<Self> {
        model.check_topology()?;

        let mut poses = HashMap::with_capacity(model.frames.len());
        let mut remaining: Vec<&ModelFrame> = model.frames.iter().collect();

        // Resolve frames whose parent pose is known until none are left.
        while !remaining.is_empty() {
            let before = remaining.len();
            remaining.retain(|frame| {
                let parent_pose = if frame.parent == GROUND_PATH {
                    Some(Isometry3::identity())
                } else {
                    poses.get(&frame.parent).copied()
                };
                match parent_pose {
                    Some(parent) => {
                        poses.insert(frame.path.clone(), parent * frame.local_transform());
                        false
                    }
                    None => true,
                }
            });

            if remaining.len() == before {
                let frame = remaining[0];
                return Err(ModelWarpError::UndefinedParent {
                    frame: frame.path.clone(),
                    parent: frame.parent.clone(),
                });
            }
        }

        Ok(Self { poses })
    }

    /// Pose of a frame in ground; identity for [`GROUND_PATH`].
    #[must_use]
    pub fn pose_in_ground(&self, frame_path: &str) -> Option<Isometry3<f64>> {
        if frame_path == GROUND_PATH {
            return Some(Isometry3::identity());
        }
        self.poses.get(frame_path).copied()
    }

    /// Number of frames with a known pose (ground excluded).
    #[must_use]
    pub fn len(&self) -> usize {
        self.poses.len()
    }

    /// Returns true if no frame poses are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }
}

/// A model together with its computed state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelAndState {
    /// The model.
    pub model: AnatomicalModel,
    /// Frame poses computed from the model.
    pub state: ModelState,
}

impl ModelAndState {
    /// Computes the state for `model`.
    ///
    /// # Errors
    ///
    /// See [`ModelState::new`].
    pub fn new(model: AnatomicalModel) -> ModelWarpResult<Self> {
        let state = ModelState::new(&model)?;
        Ok(Self { model, state })
    }
}

/// Joins a parent path and a child name.
#[must_use]
pub fn child_path(parent: &str, name: &str) -> String {
    if parent == GROUND_PATH || parent.is_empty() || parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point3;
    use std::f64::consts::FRAC_PI_2;

    fn leg() -> AnatomicalModel {
        AnatomicalModel::new("leg")
            .with_frame(ModelFrame::new("pelvis", GROUND_PATH).with_translation(Vector3::new(0.0, 1.0, 0.0)))
            .with_frame(
                ModelFrame::new("femur", "/pelvis")
                    .with_translation(Vector3::new(0.0, -0.5, 0.0))
                    .with_orientation(Vector3::new(0.0, 0.0, FRAC_PI_2)),
            )
            .with_mesh(ModelMesh::new("femur_geom", "/pelvis/femur", "Geometry/femur.obj"))
    }

    #[test]
    fn test_paths() {
        let model = leg();
        assert_eq!(model.frames[0].path, "/pelvis");
        assert_eq!(model.frames[1].path, "/pelvis/femur");
        assert_eq!(model.meshes[0].path, "/pelvis/femur/femur_geom");
        assert_eq!(model.meshes_attached_to("/pelvis/femur").count(), 1);
        assert_eq!(model.meshes_attached_to("/pelvis").count(), 0);
    }

    #[test]
    fn test_state_chains_poses() {
        let state = ModelState::new(&leg()).unwrap();
        assert_eq!(state.len(), 2);

        let femur = state.pose_in_ground("/pelvis/femur").unwrap();
        assert_relative_eq!(
            femur.transform_point(&Point3::origin()),
            Point3::new(0.0, 0.5, 0.0),
            epsilon = 1e-12
        );
        // 90 degrees about Z maps local X onto ground Y
        assert_relative_eq!(
            femur.transform_vector(&Vector3::x()),
            Vector3::y(),
            epsilon = 1e-12
        );
        assert_eq!(state.pose_in_ground(GROUND_PATH), Some(Isometry3::identity()));
        assert!(state.pose_in_ground("/nope").is_none());
    }

    #[test]
    fn test_frames_may_precede_parents() {
        let mut model = leg();
        model.frames.reverse();
        assert!(ModelState::new(&model).is_ok());
    }

    #[test]
    fn test_undefined_parent() {
        let model = AnatomicalModel::new("broken").with_frame(ModelFrame::new("tibia", "/femur"));
        assert!(matches!(
            ModelState::new(&model),
            Err(ModelWarpError::UndefinedParent { .. })
        ));
    }

    #[test]
    fn test_duplicate_component() {
        let model = leg().with_frame(ModelFrame::new("pelvis", GROUND_PATH));
        assert!(matches!(
            model.check_topology(),
            Err(ModelWarpError::DuplicateComponent(p)) if p == "/pelvis"
        ));
    }

    #[test]
    fn test_rotation_roundtrip() {
        let orientation = Vector3::new(0.3, -0.7, 1.2);
        let frame = ModelFrame::new("f", GROUND_PATH).with_orientation(orientation);

        let mut copy = frame.clone();
        copy.orientation = Vector3::zeros();
        copy.set_rotation(&frame.rotation());
        assert_relative_eq!(copy.orientation, orientation, epsilon = 1e-10);
    }

    #[test]
    fn test_rotation_roundtrip_gimbal_lock() {
        let frame = ModelFrame::new("f", GROUND_PATH).with_orientation(Vector3::new(0.4, FRAC_PI_2, 0.0));

        let mut copy = frame.clone();
        copy.set_rotation(&frame.rotation());
        assert_relative_eq!(
            copy.rotation().to_rotation_matrix(),
            frame.rotation().to_rotation_matrix(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_directory() {
        let mut model = leg();
        assert_eq!(model.directory(), PathBuf::from("."));
        model.file_path = Some(PathBuf::from("/data/models/leg.xml"));
        assert_eq!(
            model.resolve_mesh_file(&model.meshes[0]),
            PathBuf::from("/data/models/Geometry/femur.obj")
        );
    }
}
