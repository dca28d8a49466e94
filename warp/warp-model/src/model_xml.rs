//! Model XML parser.
//!
//! ```xml
//! <model name="leg">
//!   <frame name="pelvis" translation="0 1 0" orientation="0 0 0">
//!     <mesh name="pelvis_geom" file="Geometry/pelvis.obj"/>
//!     <frame name="femur" translation="0 -0.4 0"/>
//!   </frame>
//! </model>
//! ```
//!
//! Nested `<frame>` elements are children of the enclosing frame; top-level
//! frames are children of `/ground`.

use nalgebra::Vector3;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::BufRead;
use std::path::Path;
use tracing::debug;

use crate::error::{ModelWarpError, ModelWarpResult};
use crate::model::{AnatomicalModel, ModelFrame, ModelMesh, GROUND_PATH};

/// Load a model from an XML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, the XML is malformed or the
/// model's topology is invalid.
pub fn load_model<P: AsRef<Path>>(path: P) -> ModelWarpResult<AnatomicalModel> {
    let path = path.as_ref();
    let xml = std::fs::read_to_string(path).map_err(|e| ModelWarpError::from_open(e, path))?;
    let mut model = parse_model_str(&xml)?;
    model.file_path = Some(path.to_path_buf());
    debug!(
        path = %path.display(),
        frames = model.frames.len(),
        meshes = model.meshes.len(),
        "loaded model"
    );
    Ok(model)
}

/// Parse a model from an XML string.
///
/// # Errors
///
/// Returns an error if the XML is malformed, required attributes are missing
/// or the model's topology is invalid.
pub fn parse_model_str(xml: &str) -> ModelWarpResult<AnatomicalModel> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let model = parse_model_reader(&mut reader)?;
    model.check_topology()?;
    Ok(model)
}

fn parse_model_reader<R: BufRead>(reader: &mut Reader<R>) -> ModelWarpResult<AnatomicalModel> {
    let mut buf = Vec::new();
    let mut model: Option<AnatomicalModel> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"model" => {
                let mut m = AnatomicalModel::new(get_attribute_opt(e, "name").unwrap_or_default());
                parse_children(reader, b"model", GROUND_PATH, &mut m)?;
                model = Some(m);
            }
            Ok(Event::Empty(ref e)) if e.name().as_ref() == b"model" => {
                model = Some(AnatomicalModel::new(get_attribute_opt(e, "name").unwrap_or_default()));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ModelWarpError::XmlParse(e.to_string())),
        }
        buf.clear();
    }

    model.ok_or_else(|| ModelWarpError::missing_element("model", "model document"))
}

/// Parse the frames and meshes inside `end` until its closing tag.
fn parse_children<R: BufRead>(
    reader: &mut Reader<R>,
    end: &[u8],
    parent: &str,
    model: &mut AnatomicalModel,
) -> ModelWarpResult<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let elem_name = e.name().as_ref().to_vec();
                match elem_name.as_slice() {
                    b"frame" => {
                        let frame = parse_frame(e, parent)?;
                        let path = frame.path.clone();
                        model.frames.push(frame);
                        parse_children(reader, b"frame", &path, model)?;
                    }
                    b"mesh" => {
                        model.meshes.push(parse_mesh(e, parent)?);
                        skip_element(reader, b"mesh")?;
                    }
                    _ => skip_element(reader, &elem_name)?,
                }
            }
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"frame" => model.frames.push(parse_frame(e, parent)?),
                b"mesh" => model.meshes.push(parse_mesh(e, parent)?),
                _ => {}
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == end => break,
            Ok(Event::Eof) => {
                return Err(ModelWarpError::XmlParse(format!(
                    "unexpected EOF in {}",
                    String::from_utf8_lossy(end)
                )))
            }
            Ok(_) => {}
            Err(e) => return Err(ModelWarpError::XmlParse(e.to_string())),
        }
        buf.clear();
    }

    Ok(())
}

fn parse_frame(e: &BytesStart, parent: &str) -> ModelWarpResult<ModelFrame> {
    let name = get_attribute(e, "name")?;
    let translation = get_attribute_opt(e, "translation")
        .map(|s| parse_vector3(&s, "translation", "frame"))
        .transpose()?
        .unwrap_or_else(Vector3::zeros);
    let orientation = get_attribute_opt(e, "orientation")
        .map(|s| parse_vector3(&s, "orientation", "frame"))
        .transpose()?
        .unwrap_or_else(Vector3::zeros);

    Ok(ModelFrame::new(name, parent)
        .with_translation(translation)
        .with_orientation(orientation))
}

fn parse_mesh(e: &BytesStart, frame: &str) -> ModelWarpResult<ModelMesh> {
    let name = get_attribute(e, "name")?;
    let file = get_attribute(e, "file")?;
    Ok(ModelMesh::new(name, frame, file))
}

/// Get a required attribute value.
pub(crate) fn get_attribute(e: &BytesStart, name: &'static str) -> ModelWarpResult<String> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == name.as_bytes() {
            return attr
                .unescape_value()
                .map(std::borrow::Cow::into_owned)
                .map_err(|err| ModelWarpError::invalid_attribute(name, element_name(e), err.to_string()));
        }
    }
    Err(ModelWarpError::missing_attribute(name, element_name(e)))
}

/// Get an optional attribute value.
pub(crate) fn get_attribute_opt(e: &BytesStart, name: &str) -> Option<String> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == name.as_bytes() {
            return attr.unescape_value().ok().map(std::borrow::Cow::into_owned);
        }
    }
    None
}

/// Parse a space-separated vector3 string.
fn parse_vector3(s: &str, attribute: &'static str, element: &str) -> ModelWarpResult<Vector3<f64>> {
    let parts: Vec<f64> = s
        .split_whitespace()
        .map(str::parse::<f64>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ModelWarpError::invalid_attribute(attribute, element, format!("invalid vector3: {s}")))?;

    if parts.len() != 3 {
        return Err(ModelWarpError::invalid_attribute(
            attribute,
            element,
            format!("expected 3 values, got {}: {s}", parts.len()),
        ));
    }

    Ok(Vector3::new(parts[0], parts[1], parts[2]))
}

/// Get element name as string for error messages.
pub(crate) fn element_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).to_string()
}

/// Skip an element and all its children.
pub(crate) fn skip_element<R: BufRead>(reader: &mut Reader<R>, name: &[u8]) -> ModelWarpResult<()> {
    let mut buf = Vec::new();
    let mut depth = 1;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == name => {
                depth += 1;
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == name => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ModelWarpError::XmlParse(e.to_string())),
        }
        buf.clear();
    }

    Ok(())
}
