//! End-to-end tests of model warp documents built from on-disk fixtures.
//!
//! Every fixture is a small leg model written into a temporary directory:
//!
//! ```text
//! model.xml                              /pelvis (mesh pelvis_geom), /pelvis/femur
//! model.warpconfig.xml                   written per test
//! Geometry/pelvis.obj
//! Geometry/pelvis.landmarks.csv
//! DestinationGeometry/pelvis.obj
//! DestinationGeometry/pelvis.landmarks.csv
//! ```
//!
//! The destination landmarks are the source landmarks scaled by 2 and moved
//! one unit along X, so every warp is exactly `p -> 2p + (1, 0, 0)`.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::float_cmp)]

use approx::assert_relative_eq;
use nalgebra::{Point3, Vector3};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use warp_model::{
    load_obj, ModelWarpConfiguration, ModelWarpDocument, ModelWarpError, StrategyDeclaration, ValidationCheckState,
};

// =============================================================================
// Fixtures
// =============================================================================

const MODEL_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<model name="leg">
    <frame name="pelvis" translation="0 0 0">
        <mesh name="pelvis_geom" file="Geometry/pelvis.obj"/>
        <frame name="femur" translation="0.5 0.5 0.5"/>
    </frame>
</model>
"#;

const LANDMARKS: [[f64; 3]; 7] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
    [1.0, 1.0, 0.0],
    [1.0, 0.0, 1.0],
    [0.3, 0.6, 0.2],
];

const PELVIS_OBJ: &str = "\
v 0 0 0
v 1 0 0
v 0 1 0
v 0.2 0.2 0.8
f 1 2 3
f 1 2 4
f 2 3 4
f 1 3 4
";

const MESH: &str = "/pelvis/pelvis_geom";
const PELVIS: &str = "/pelvis";
const FEMUR: &str = "/pelvis/femur";

fn expected_warp(p: Point3<f64>) -> Point3<f64> {
    Point3::from(p.coords * 2.0 + Vector3::new(1.0, 0.0, 0.0))
}

fn write_landmarks(path: &Path, points: impl Iterator<Item = Point3<f64>>) {
    let mut csv = String::from("name,x,y,z\n");
    for (i, p) in points.enumerate() {
        csv.push_str(&format!("landmark_{i},{},{},{}\n", p.x, p.y, p.z));
    }
    fs::write(path, csv).unwrap();
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    /// Source and destination geometry with every landmark paired.
    fn paired() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("Geometry")).unwrap();
        fs::create_dir_all(root.join("DestinationGeometry")).unwrap();

        fs::write(root.join("model.xml"), MODEL_XML).unwrap();
        fs::write(root.join("Geometry/pelvis.obj"), PELVIS_OBJ).unwrap();
        fs::write(root.join("DestinationGeometry/pelvis.obj"), PELVIS_OBJ).unwrap();

        let source = LANDMARKS.iter().map(|&[x, y, z]| Point3::new(x, y, z));
        write_landmarks(&root.join("Geometry/pelvis.landmarks.csv"), source.clone());
        write_landmarks(
            &root.join("DestinationGeometry/pelvis.landmarks.csv"),
            source.map(expected_warp),
        );

        Self { dir }
    }

    /// Only source geometry and landmarks.
    fn source_only() -> Self {
        let fixture = Self::paired();
        fs::remove_dir_all(fixture.path("DestinationGeometry")).unwrap();
        fixture
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    fn model_file(&self) -> PathBuf {
        self.path("model.xml")
    }

    fn write_configuration(&self, configuration: &ModelWarpConfiguration) {
        configuration
            .save(ModelWarpConfiguration::conventional_path(&self.model_file()))
            .unwrap();
    }

    fn write_configuration_xml(&self, xml: &str) {
        fs::write(ModelWarpConfiguration::conventional_path(&self.model_file()), xml).unwrap();
    }

    fn document(&self) -> ModelWarpDocument {
        ModelWarpDocument::from_model_file(self.model_file()).unwrap()
    }
}

/// TPS for meshes and frames, with the top-level pelvis left alone.
fn tps_configuration() -> ModelWarpConfiguration {
    ModelWarpConfiguration::empty()
        .with_strategy(StrategyDeclaration::new("thin_plate_spline_mesh", "meshes").with_target("*"))
        .with_strategy(StrategyDeclaration::new("thin_plate_spline_frame", "frames").with_target("*"))
        .with_strategy(StrategyDeclaration::new("identity_frame", "keep_pelvis").with_target(PELVIS))
}

fn detail(document: &ModelWarpDocument, name: &str) -> Option<String> {
    let mesh = document.model().find_mesh(MESH).unwrap();
    document
        .details(mesh)
        .into_iter()
        .find(|d| d.name == name)
        .map(|d| d.value)
}

// =============================================================================
// Loading and validation
// =============================================================================

#[test]
fn paired_fixture_is_fully_valid() {
    let fixture = Fixture::paired();
    fixture.write_configuration(&tps_configuration());
    let document = fixture.document();

    assert_eq!(document.state(), ValidationCheckState::Ok, "{:#?}", document.problems());
    assert!(document.can_warp_model());
    assert_eq!(document.model().meshes.len(), 1);
    assert_eq!(document.model().frames.len(), 2);

    assert_eq!(detail(&document, "number of source landmarks").as_deref(), Some("7"));
    assert_eq!(detail(&document, "number of destination landmarks").as_deref(), Some("7"));
    assert_eq!(detail(&document, "number of paired landmarks").as_deref(), Some("7"));
    assert_eq!(detail(&document, "number of unpaired landmarks").as_deref(), Some("0"));

    let mesh = document.model().find_mesh(MESH).unwrap();
    let coefficients = document.strategy(mesh).unwrap().coefficients().unwrap();
    assert_eq!(coefficients.num_non_affine_terms(), 7);
}

#[test]
fn missing_destination_blocks_warping() {
    let fixture = Fixture::source_only();
    fixture.write_configuration(&tps_configuration());
    let document = fixture.document();

    let mesh = document.model().find_mesh(MESH).unwrap();
    assert_eq!(document.state_of(mesh), ValidationCheckState::Error);
    assert_eq!(document.state(), ValidationCheckState::Error);
    assert!(!document.can_warp_model());

    assert_eq!(detail(&document, "number of source landmarks").as_deref(), Some("7"));
    assert_eq!(detail(&document, "has destination landmarks file").as_deref(), Some("false"));
    assert_eq!(detail(&document, "number of destination landmarks").as_deref(), Some("0"));
    assert_eq!(detail(&document, "number of unpaired landmarks").as_deref(), Some("7"));

    let failures: Vec<String> = document
        .validate(mesh)
        .into_iter()
        .filter(|c| c.state == ValidationCheckState::Error)
        .map(|c| c.description)
        .collect();
    assert!(failures.iter().any(|d| d.starts_with("has destination mesh")));
    assert!(failures.iter().any(|d| d.starts_with("has destination landmarks file")));

    assert!(matches!(
        document.warp_model(),
        Err(ModelWarpError::NotWarpable { .. })
    ));
}

#[test]
fn unpaired_landmarks_only_warn() {
    let fixture = Fixture::paired();
    fixture.write_configuration(&tps_configuration());
    let mut csv = fs::read_to_string(fixture.path("Geometry/pelvis.landmarks.csv")).unwrap();
    csv.push_str("extra,0.5,0.5,0.5\n");
    fs::write(fixture.path("Geometry/pelvis.landmarks.csv"), csv).unwrap();

    let document = fixture.document();
    let mesh = document.model().find_mesh(MESH).unwrap();
    assert_eq!(document.state_of(mesh), ValidationCheckState::Warning);
    assert!(document.can_warp_model());
    assert!(document.warp_model().is_ok());
}

#[test]
fn default_configuration_needs_landmarks_for_top_level_frames() {
    let fixture = Fixture::paired();
    let document = fixture.document();

    assert_eq!(document.configuration(), &ModelWarpConfiguration::default());
    let model = document.model();
    assert_eq!(document.state_of(model.find_mesh(MESH).unwrap()), ValidationCheckState::Ok);
    assert_eq!(document.state_of(model.find_frame(FEMUR).unwrap()), ValidationCheckState::Ok);
    // nothing is attached to ground, so the pelvis offset has no landmarks
    assert_eq!(document.state_of(model.find_frame(PELVIS).unwrap()), ValidationCheckState::Error);
}

#[test]
fn configuration_conflicts_fail_to_load() {
    let fixture = Fixture::paired();
    fixture.write_configuration(
        &tps_configuration().with_strategy(StrategyDeclaration::new("produce_error_frame", "clash").with_target(PELVIS)),
    );

    let result = ModelWarpDocument::from_model_file(fixture.model_file());
    assert!(matches!(result, Err(ModelWarpError::ConflictingTargets { .. })));
}

#[test]
fn unknown_strategy_type_fails_to_load() {
    let fixture = Fixture::paired();
    fixture.write_configuration_xml(
        r#"<model_warp_configuration><strategy type="bend_everything" name="x"><target>*</target></strategy></model_warp_configuration>"#,
    );

    let result = ModelWarpDocument::from_model_file(fixture.model_file());
    assert!(matches!(result, Err(ModelWarpError::UnknownStrategyType(tag)) if tag == "bend_everything"));
}

#[test]
fn produce_error_strategy_is_reported() {
    let fixture = Fixture::paired();
    fixture.write_configuration_xml(
        r#"<model_warp_configuration>
            <strategy type="produce_error_mesh" name="broken"><target>*</target></strategy>
            <strategy type="identity_frame" name="frames"><target>*</target></strategy>
        </model_warp_configuration>"#,
    );

    let document = fixture.document();
    let problems = document.problems();
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].0, MESH);
    assert_eq!(problems[0].1.state, ValidationCheckState::Error);
}

// =============================================================================
// Warping and export
// =============================================================================

#[test]
fn warp_model_applies_mesh_and_frame_warps() {
    let fixture = Fixture::paired();
    fixture.write_configuration(&tps_configuration());
    let warped = fixture.document().warp_model().unwrap();

    let source = load_obj(fixture.path("Geometry/pelvis.obj")).unwrap();
    assert_eq!(warped.meshes.len(), 1);
    assert_eq!(warped.meshes[0].path, MESH);
    assert_eq!(warped.meshes[0].mesh.faces, source.faces);
    for (got, original) in warped.meshes[0].mesh.vertices.iter().zip(&source.vertices) {
        assert_relative_eq!(*got, expected_warp(*original), epsilon = 1e-8);
    }

    let femur = warped.model.find_frame(FEMUR).unwrap();
    assert_relative_eq!(femur.translation, Vector3::new(2.0, 1.0, 1.0), epsilon = 1e-8);
    let pelvis = warped.model.find_frame(PELVIS).unwrap();
    assert_eq!(pelvis.translation, Vector3::zeros());

    let femur_in_ground = warped.state.pose_in_ground(FEMUR).unwrap();
    assert_relative_eq!(femur_in_ground.translation.vector, Vector3::new(2.0, 1.0, 1.0), epsilon = 1e-8);
}

#[test]
fn blending_factor_interpolates_between_source_and_destination() {
    let fixture = Fixture::paired();
    fixture.write_configuration(&tps_configuration());
    let mut document = fixture.document();
    document.set_warp_blending_factor(0.5);

    let warped = document.warp_model().unwrap();
    let source = load_obj(fixture.path("Geometry/pelvis.obj")).unwrap();
    for (got, original) in warped.meshes[0].mesh.vertices.iter().zip(&source.vertices) {
        let halfway = Point3::from((original.coords + expected_warp(*original).coords) / 2.0);
        assert_relative_eq!(*got, halfway, epsilon = 1e-8);
    }

    document.set_warp_blending_factor(0.0);
    let unwarped = document.warp_model().unwrap();
    assert_eq!(unwarped.meshes[0].mesh.vertices, source.vertices);
}

#[test]
fn blending_factor_is_read_from_configuration() {
    let fixture = Fixture::paired();
    let mut configuration = tps_configuration();
    configuration.set_blending_factor(0.25);
    fixture.write_configuration(&configuration);

    assert_eq!(fixture.document().warp_blending_factor(), 0.25);
}

#[test]
fn least_squares_frame_follows_rigid_motion() {
    let fixture = Fixture::paired();
    // destination = source rotated a quarter turn about Z
    let rotated = LANDMARKS.iter().map(|&[x, y, z]| Point3::new(-y, x, z));
    write_landmarks(&fixture.path("DestinationGeometry/pelvis.landmarks.csv"), rotated);
    fixture.write_configuration(
        &ModelWarpConfiguration::empty()
            .with_strategy(StrategyDeclaration::new("identity_mesh", "meshes").with_target("*"))
            .with_strategy(StrategyDeclaration::new("identity_frame", "pelvis").with_target(PELVIS))
            .with_strategy(StrategyDeclaration::new("least_squares_frame", "femur").with_target(FEMUR)),
    );

    let document = fixture.document();
    assert_eq!(document.state(), ValidationCheckState::Ok, "{:#?}", document.problems());

    let warped = document.warp_model().unwrap();
    let femur = warped.model.find_frame(FEMUR).unwrap();
    assert_relative_eq!(femur.translation, Vector3::new(-0.5, 0.5, 0.5), epsilon = 1e-8);
    assert_relative_eq!(femur.orientation, Vector3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2), epsilon = 1e-8);
}

#[test]
fn export_writes_one_obj_per_mesh() {
    let fixture = Fixture::paired();
    fixture.write_configuration(&tps_configuration());
    let out = fixture.path("warped");

    let written = fixture.document().export_warped_meshes(&out).unwrap();
    assert_eq!(written, vec![out.join("Geometry/pelvis.obj")]);

    let exported = load_obj(&written[0]).unwrap();
    let source = load_obj(fixture.path("Geometry/pelvis.obj")).unwrap();
    assert_eq!(exported.faces, source.faces);
    for (got, original) in exported.vertices.iter().zip(&source.vertices) {
        assert_relative_eq!(*got, expected_warp(*original), epsilon = 1e-6);
    }
}

const TWO_BONES_XML: &str = r#"<model name="bones">
    <frame name="a"><mesh name="ga" file="Geometry/bone.obj"/></frame>
    <frame name="b"><mesh name="gb" file="Other/bone.obj"/></frame>
</model>
"#;

fn identity_configuration() -> ModelWarpConfiguration {
    ModelWarpConfiguration::empty()
        .with_strategy(StrategyDeclaration::new("identity_mesh", "meshes").with_target("*"))
        .with_strategy(StrategyDeclaration::new("identity_frame", "frames").with_target("*"))
}

/// Writes `root/model/model.xml` plus four meshes: a triangle at
/// `model/Geometry/bone.obj` and `outside/a/bone.obj`, and a square at
/// `model/Other/bone.obj` and `outside/b/bone.obj`.
fn write_two_bones(root: &Path, xml: &str) -> PathBuf {
    let triangle = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
    let square = "v 0 0 0\nv 2 0 0\nv 0 2 0\nv 2 2 0\nf 1 2 3\nf 2 4 3\n";
    for (file, obj) in [
        ("model/Geometry/bone.obj", triangle),
        ("model/Other/bone.obj", square),
        ("outside/a/bone.obj", triangle),
        ("outside/b/bone.obj", square),
    ] {
        let path = root.join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, obj).unwrap();
    }

    let model_file = root.join("model/model.xml");
    fs::write(&model_file, xml).unwrap();
    identity_configuration()
        .save(ModelWarpConfiguration::conventional_path(&model_file))
        .unwrap();
    model_file
}

#[test]
fn export_keeps_meshes_with_the_same_file_name_apart() {
    let dir = TempDir::new().unwrap();
    let model_file = write_two_bones(dir.path(), TWO_BONES_XML);
    let out = dir.path().join("warped");

    let document = ModelWarpDocument::from_model_file(&model_file).unwrap();
    let written = document.export_warped_meshes(&out).unwrap();
    assert_eq!(written, vec![out.join("Geometry/bone.obj"), out.join("Other/bone.obj")]);

    assert_eq!(load_obj(&written[0]).unwrap().vertices.len(), 3);
    assert_eq!(load_obj(&written[1]).unwrap().vertices.len(), 4);
}

#[test]
fn export_refuses_to_overwrite_a_mesh() {
    let dir = TempDir::new().unwrap();
    let xml = TWO_BONES_XML
        .replace("Geometry/bone.obj", "../outside/a/bone.obj")
        .replace("Other/bone.obj", "../outside/b/bone.obj");
    let model_file = write_two_bones(dir.path(), &xml);
    let out = dir.path().join("warped");

    let document = ModelWarpDocument::from_model_file(&model_file).unwrap();
    assert!(document.can_warp_model(), "{:#?}", document.problems());
    let result = document.export_warped_meshes(&out);
    assert!(
        matches!(&result, Err(ModelWarpError::ExportCollision { path, first, second })
            if *path == out.join("bone.obj") && first == "/a/ga" && second == "/b/gb"),
        "{result:?}"
    );
    assert!(!out.join("bone.obj").exists());
}

// =============================================================================
// Reloading
// =============================================================================

#[test]
fn reload_picks_up_new_files() {
    let fixture = Fixture::source_only();
    fixture.write_configuration(&tps_configuration());
    let mut document = fixture.document();
    assert_eq!(document.state(), ValidationCheckState::Error);

    // supply the missing destination, then reload
    let restored = Fixture::paired();
    fs::create_dir_all(fixture.path("DestinationGeometry")).unwrap();
    for name in ["pelvis.obj", "pelvis.landmarks.csv"] {
        fs::copy(
            restored.path("DestinationGeometry").join(name),
            fixture.path("DestinationGeometry").join(name),
        )
        .unwrap();
    }

    // strategies cache their validation, so the old document stays stale
    assert_eq!(document.state(), ValidationCheckState::Error);
    document.reload().unwrap();
    assert_eq!(document.state(), ValidationCheckState::Ok, "{:#?}", document.problems());
}

#[test]
fn reload_picks_up_configuration_changes() {
    let fixture = Fixture::paired();
    let mut document = fixture.document();
    assert_eq!(document.state(), ValidationCheckState::Error);

    fixture.write_configuration(&tps_configuration());
    document.reload().unwrap();
    assert_eq!(document.configuration(), &tps_configuration());
    assert_eq!(document.state(), ValidationCheckState::Ok);
}

#[test]
fn clones_are_independent() {
    let fixture = Fixture::paired();
    fixture.write_configuration(&tps_configuration());
    let document = fixture.document();

    let mut edited = document.clone();
    assert_eq!(edited, document);
    edited.set_warp_blending_factor(0.1);
    assert_ne!(edited, document);
    assert_eq!(document.warp_blending_factor(), 1.0);
    assert_eq!(edited.model(), document.model());
}
