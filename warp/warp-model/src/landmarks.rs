//! Landmark CSV reading and source/destination pairing.
//!
//! Landmark files are plain CSV with an optional header row. Each row is
//! either `x,y,z` or `name,x,y,z`. Rows that cannot be parsed are skipped
//! with a warning.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::warn;
use warp_tps::{LandmarkPair3D, NamedLandmarkPair3D};

use crate::error::{ModelWarpError, ModelWarpResult};

/// Directory, beside the model file, that holds destination meshes.
pub const DESTINATION_GEOMETRY_DIR: &str = "DestinationGeometry";

/// Extension that replaces a mesh file's extension to locate its landmarks.
pub const LANDMARKS_EXTENSION: &str = "landmarks.csv";

/// A single, optionally named, landmark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// Name of the landmark, if the file provided one.
    pub name: Option<String>,
    /// Location of the landmark.
    pub position: Point3<f64>,
}

impl Landmark {
    /// Creates a landmark.
    #[must_use]
    pub const fn new(name: Option<String>, position: Point3<f64>) -> Self {
        Self { name, position }
    }

    /// Creates a named landmark.
    pub fn named(name: impl Into<String>, position: Point3<f64>) -> Self {
        Self::new(Some(name.into()), position)
    }
}

/// Read landmarks from a CSV file.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn read_landmarks_csv<P: AsRef<Path>>(path: P) -> ModelWarpResult<Vec<Landmark>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| ModelWarpError::from_open(e, path))?;
    parse_landmarks_csv(BufReader::new(file), path)
}

/// Parse landmark CSV content. `path` is only used in log messages.
///
/// # Errors
///
/// Returns an error if reading fails.
pub fn parse_landmarks_csv<R: BufRead>(reader: R, path: &Path) -> ModelWarpResult<Vec<Landmark>> {
    let mut landmarks = Vec::new();

    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        let line = if line_number == 0 {
            line.trim_start_matches('\u{feff}')
        } else {
            &line
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_row(line) {
            Some(landmark) => landmarks.push(landmark),
            // A first row that does not parse is a header
            None if line_number == 0 => {
                if looks_numeric(line) {
                    warn!(
                        path = %path.display(),
                        row = line,
                        "skipping numeric-looking first row as a header"
                    );
                }
            }
            None => warn!(
                path = %path.display(),
                line = line_number + 1,
                "skipping malformed landmark row"
            ),
        }
    }

    Ok(landmarks)
}

/// True for a row shaped like data, with 3 or 4 columns whose trailing two
/// fields parse as numbers.
fn looks_numeric(line: &str) -> bool {
    let cols: Vec<&str> = line.split(',').map(str::trim).collect();
    matches!(cols.len(), 3 | 4) && cols[cols.len() - 2..].iter().all(|c| c.parse::<f64>().is_ok())
}

fn parse_row(line: &str) -> Option<Landmark> {
    let cols: Vec<&str> = line.split(',').map(str::trim).collect();
    let (name, coords) = match cols.as_slice() {
        [x, y, z] => (None, [*x, *y, *z]),
        [name, x, y, z] => (Some((*name).to_string()), [*x, *y, *z]),
        _ => return None,
    };

    let x: f64 = coords[0].parse().ok()?;
    let y: f64 = coords[1].parse().ok()?;
    let z: f64 = coords[2].parse().ok()?;
    let position = Point3::new(x, y, z);
    if !position.coords.iter().all(|c| c.is_finite()) {
        return None;
    }
    Some(Landmark::new(name.filter(|n| !n.is_empty()), position))
}

/// A landmark that may only exist on one side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaybePairedLandmark {
    /// Name shared by both sides (generated for unnamed landmarks).
    pub name: String,
    /// Location on the source shape, if present.
    pub source: Option<Point3<f64>>,
    /// Location on the destination shape, if present.
    pub destination: Option<Point3<f64>>,
}

impl MaybePairedLandmark {
    /// Returns true if both sides are present.
    #[must_use]
    pub const fn is_paired(&self) -> bool {
        self.source.is_some() && self.destination.is_some()
    }

    /// Returns the pair if both sides are present.
    #[must_use]
    pub fn as_pair(&self) -> Option<LandmarkPair3D> {
        Some(LandmarkPair3D::new(self.source?, self.destination?))
    }

    /// Returns the named pair if both sides are present.
    #[must_use]
    pub fn as_named_pair(&self) -> Option<NamedLandmarkPair3D> {
        self.as_pair()
            .map(|pair| NamedLandmarkPair3D::new(self.name.clone(), pair))
    }
}

/// Pair source and destination landmarks by name.
///
/// Unnamed landmarks on each side are named `unnamed_0`, `unnamed_1`, ... in
/// file order, so unnamed landmarks pair positionally. Source order is kept;
/// destination-only landmarks follow in destination order.
#[must_use]
pub fn pair_landmarks(source: &[Landmark], destination: &[Landmark]) -> Vec<MaybePairedLandmark> {
    let source = with_generated_names(source);
    let mut destination: Vec<Option<(String, Point3<f64>)>> =
        with_generated_names(destination).into_iter().map(Some).collect();

    let mut paired: Vec<MaybePairedLandmark> = source
        .into_iter()
        .map(|(name, position)| {
            let matched = destination
                .iter_mut()
                .find(|d| d.as_ref().is_some_and(|(n, _)| *n == name))
                .and_then(Option::take)
                .map(|(_, p)| p);
            MaybePairedLandmark {
                name,
                source: Some(position),
                destination: matched,
            }
        })
        .collect();

    paired.extend(destination.into_iter().flatten().map(|(name, position)| MaybePairedLandmark {
        name,
        source: None,
        destination: Some(position),
    }));

    paired
}

fn with_generated_names(landmarks: &[Landmark]) -> Vec<(String, Point3<f64>)> {
    let mut unnamed = 0;
    landmarks
        .iter()
        .map(|l| {
            let name = l.name.clone().unwrap_or_else(|| {
                let generated = format!("unnamed_{unnamed}");
                unnamed += 1;
                generated
            });
            (name, l.position)
        })
        .collect()
}

/// Every fully paired landmark, in pairing order.
#[must_use]
pub fn paired_only(landmarks: &[MaybePairedLandmark]) -> Vec<LandmarkPair3D> {
    landmarks.iter().filter_map(MaybePairedLandmark::as_pair).collect()
}

/// Landmarks file that accompanies a mesh file: `x.obj` -> `x.landmarks.csv`.
#[must_use]
pub fn landmarks_path_for(mesh_file: &Path) -> PathBuf {
    mesh_file.with_extension(LANDMARKS_EXTENSION)
}

/// Destination mesh matching a source mesh file, beside the model file.
#[must_use]
pub fn destination_mesh_path(model_directory: &Path, mesh_file: &Path) -> PathBuf {
    let mut path = model_directory.join(DESTINATION_GEOMETRY_DIR);
    if let Some(name) = mesh_file.file_name() {
        path.push(name);
    }
    path
}
