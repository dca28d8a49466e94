//! Wavefront OBJ support.
//!
//! Reading goes through `tobj` with triangulation and a single index buffer,
//! so only positions and triangles survive. All objects in a file are merged
//! into one mesh.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::debug;

use crate::error::{ModelWarpError, ModelWarpResult};

/// A triangle mesh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurfaceMesh {
    /// Vertex positions.
    pub vertices: Vec<Point3<f64>>,
    /// Triangles as zero-based vertex indices.
    pub faces: Vec<[u32; 3]>,
}

impl SurfaceMesh {
    /// Creates an empty mesh.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        single_index: true,
        triangulate: true,
        ..Default::default()
    }
}

/// Load a mesh from an OBJ file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or `tobj` rejects its
/// contents.
pub fn load_obj<P: AsRef<Path>>(path: P) -> ModelWarpResult<SurfaceMesh> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| ModelWarpError::from_open(e, path))?;
    let mesh = parse_obj(BufReader::new(file), path)?;
    debug!(
        path = %path.display(),
        vertices = mesh.vertices.len(),
        faces = mesh.faces.len(),
        "loaded OBJ mesh"
    );
    Ok(mesh)
}

/// Parse OBJ content. `path` is only used in error messages.
///
/// Material libraries are never opened.
///
/// # Errors
///
/// See [`load_obj`].
pub fn parse_obj<R: BufRead>(mut reader: R, path: &Path) -> ModelWarpResult<SurfaceMesh> {
    let (models, _materials) = tobj::load_obj_buf(&mut reader, &load_options(), |_| {
        Err(tobj::LoadError::OpenFileFailed)
    })
    .map_err(|e| ModelWarpError::invalid_content(path, e.to_string()))?;

    let mut mesh = SurfaceMesh::new();
    for model in &models {
        let offset = u32::try_from(mesh.vertices.len())
            .map_err(|_| ModelWarpError::invalid_content(path, "too many vertices"))?;
        debug!(object = %model.name, "merging OBJ object");

        mesh.vertices.extend(
            model
                .mesh
                .positions
                .chunks_exact(3)
                .map(|c| Point3::new(c[0], c[1], c[2])),
        );
        // indices are per object
        mesh.faces.extend(
            model
                .mesh
                .indices
                .chunks_exact(3)
                .map(|c| [c[0] + offset, c[1] + offset, c[2] + offset]),
        );
    }

    Ok(mesh)
}

/// Save a mesh as OBJ.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn save_obj<P: AsRef<Path>>(mesh: &SurfaceMesh, path: P) -> ModelWarpResult<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_obj(mesh, &mut writer)?;
    writer.flush()?;
    debug!(path = %path.display(), vertices = mesh.vertices.len(), "saved OBJ mesh");
    Ok(())
}

/// Write a mesh as OBJ text.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_obj<W: Write>(mesh: &SurfaceMesh, writer: &mut W) -> ModelWarpResult<()> {
    for v in &mesh.vertices {
        writeln!(writer, "v {} {} {}", v.x, v.y, v.z)?;
    }
    for [a, b, c] in &mesh.faces {
        writeln!(writer, "f {} {} {}", a + 1, b + 1, c + 1)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(s: &str) -> ModelWarpResult<SurfaceMesh> {
        parse_obj(Cursor::new(s), Path::new("test.obj"))
    }

    #[test]
    fn test_parse_quad_is_triangulated() {
        let mesh = parse(
            "# a quad\n\
             o quad\n\
             v 0 0 0\n\
             v 1 0 0\n\
             v 1 1 0\n\
             v 0 1 0\n\
             f 1 2 3 4\n",
        )
        .unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.faces.len(), 2);
        assert!(mesh.faces.iter().flatten().all(|&i| i < 4));
    }

    #[test]
    fn test_negative_indices() {
        let mesh = parse("v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n").unwrap();
        assert_eq!(mesh.faces, vec![[0, 1, 2]]);
        assert_eq!(mesh.vertices[1], Point3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_objects_are_merged() {
        let mesh = parse(
            "o first\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n\
             o second\nv 0 0 5\nv 1 0 5\nv 0 1 5\nf 4 5 6\n",
        )
        .unwrap();
        assert_eq!(mesh.vertices.len(), 6);
        assert_eq!(mesh.faces.len(), 2);
        let [a, b, c] = mesh.faces[1];
        for i in [a, b, c] {
            assert_eq!(mesh.vertices[i as usize].z, 5.0);
        }
    }

    #[test]
    fn test_missing_material_library_is_ignored() {
        let mesh = parse("mtllib missing.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();
        assert_eq!(mesh.faces.len(), 1);
    }

    #[test]
    fn test_out_of_range_index() {
        let result = parse("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 4\n");
        assert!(matches!(result, Err(ModelWarpError::InvalidContent { .. })));
    }

    #[test]
    fn test_malformed_vertex() {
        assert!(parse("v 0 zero 0\n").is_err());
        assert!(parse("v 0 0\n").is_err());
    }

    #[test]
    fn test_write_then_parse() {
        let mesh = SurfaceMesh {
            vertices: vec![
                Point3::new(0.5, -1.25, 3.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            faces: vec![[0, 1, 2]],
        };
        let mut out = Vec::new();
        write_obj(&mesh, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("v 0.5 -1.25 3\n"));
        assert_eq!(parse(&text).unwrap(), mesh);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = load_obj("nonexistent_file_12345.obj");
        if let Err(ModelWarpError::FileNotFound { path }) = result {
            assert!(path.to_string_lossy().contains("nonexistent"));
        } else {
            panic!("expected FileNotFound");
        }
    }
}
