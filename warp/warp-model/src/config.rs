//! Persisted model warp configuration.
//!
//! ```xml
//! <model_warp_configuration blending_factor="1">
//!   <strategy type="thin_plate_spline_mesh" name="meshes">
//!     <target>*</target>
//!     <param name="source_landmarks_prescale" value="1"/>
//!   </strategy>
//! </model_warp_configuration>
//! ```
//!
//! Declarations are kept exactly as written so that load then save
//! round-trips. They are turned into typed [`StrategyDefinition`]s by
//! [`ModelWarpConfiguration::finalize`].

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Cursor};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{ModelWarpError, ModelWarpResult};
use crate::factories::check_target_conflicts;
use crate::model_xml::{get_attribute, get_attribute_opt, skip_element};
use crate::registry::{StrategyRegistry, TPS_FRAME_TAG, TPS_MESH_TAG};
use crate::strategy::{StrategyDefinition, WILDCARD_TARGET};

/// Suffix that replaces a model file's extension to locate its configuration.
pub const CONFIG_EXTENSION: &str = "warpconfig.xml";

/// A `name = value` strategy parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyParam {
    /// Parameter name.
    pub name: String,
    /// Parameter value, unparsed.
    pub value: String,
}

impl StrategyParam {
    /// Creates a parameter.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One strategy as declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyDeclaration {
    /// Registry tag naming the strategy type.
    pub type_tag: String,
    /// User-facing name.
    pub name: String,
    /// Target paths, or `*`, in declaration order.
    pub targets: Vec<String>,
    /// Parameters in declaration order.
    pub params: Vec<StrategyParam>,
}

impl StrategyDeclaration {
    /// Creates a declaration with no targets or parameters.
    pub fn new(type_tag: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            name: name.into(),
            targets: Vec::new(),
            params: Vec::new(),
        }
    }

    /// Adds a target.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(StrategyParam::new(name, value));
        self
    }
}

/// Strategy declarations plus the warp blending factor.
///
/// The default configuration warps every mesh and every frame origin with a
/// thin-plate spline and fully applies the warp.
///
/// # Example
///
/// ```
/// use warp_model::ModelWarpConfiguration;
///
/// let mut config = ModelWarpConfiguration::default();
/// config.set_blending_factor(5.0);
/// assert_eq!(config.blending_factor(), 1.0);
/// config.set_blending_factor(-2.0);
/// assert_eq!(config.blending_factor(), 0.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelWarpConfiguration {
    blending_factor: f64,
    strategies: Vec<StrategyDeclaration>,
}

impl Default for ModelWarpConfiguration {
    fn default() -> Self {
        Self::empty()
            .with_strategy(StrategyDeclaration::new(TPS_MESH_TAG, "default_mesh_warp").with_target(WILDCARD_TARGET))
            .with_strategy(StrategyDeclaration::new(TPS_FRAME_TAG, "default_frame_warp").with_target(WILDCARD_TARGET))
    }
}

impl ModelWarpConfiguration {
    /// A configuration with no strategies and a blending factor of 1.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            blending_factor: 1.0,
            strategies: Vec::new(),
        }
    }

    /// Adds a strategy declaration.
    #[must_use]
    pub fn with_strategy(mut self, declaration: StrategyDeclaration) -> Self {
        self.strategies.push(declaration);
        self
    }

    /// Adds a strategy declaration in place.
    pub fn add_strategy(&mut self, declaration: StrategyDeclaration) {
        self.strategies.push(declaration);
    }

    /// Strategy declarations in declaration order.
    #[must_use]
    pub fn strategies(&self) -> &[StrategyDeclaration] {
        &self.strategies
    }

    /// Blend between unwarped (0) and fully warped (1).
    #[must_use]
    pub const fn blending_factor(&self) -> f64 {
        self.blending_factor
    }

    /// Sets the blending factor, clamped to `[0, 1]`. NaN is ignored.
    pub fn set_blending_factor(&mut self, factor: f64) {
        if factor.is_nan() {
            warn!("ignoring NaN warp blending factor");
            return;
        }
        self.blending_factor = factor.clamp(0.0, 1.0);
    }

    /// Conventional configuration path for a model file:
    /// `foo.xml` -> `foo.warpconfig.xml`.
    #[must_use]
    pub fn conventional_path(model_file: &Path) -> PathBuf {
        model_file.with_extension(CONFIG_EXTENSION)
    }

    /// Loads the configuration beside `model_file`, or the default one if
    /// there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file exists but cannot be parsed.
    pub fn load_for_model(model_file: &Path) -> ModelWarpResult<Self> {
        let path = Self::conventional_path(model_file);
        if path.exists() {
            Self::from_file(&path)
        } else {
            info!(path = %path.display(), "no warp configuration found, using defaults");
            Ok(Self::default())
        }
    }

    /// Loads a configuration from an XML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ModelWarpResult<Self> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path).map_err(|e| ModelWarpError::from_open(e, path))?;
        let config = Self::from_xml_str(&xml)?;
        debug!(path = %path.display(), strategies = config.strategies.len(), "loaded warp configuration");
        Ok(config)
    }

    /// Parses a configuration from XML.
    ///
    /// # Errors
    ///
    /// Returns an error if the XML is malformed or required attributes are
    /// missing.
    pub fn from_xml_str(xml: &str) -> ModelWarpResult<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut config: Option<Self> = None;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) if e.name().as_ref() == b"model_warp_configuration" => {
                    let mut c = Self::empty();
                    c.read_blending_factor(e)?;
                    parse_strategies(&mut reader, &mut c)?;
                    config = Some(c);
                }
                Ok(Event::Empty(ref e)) if e.name().as_ref() == b"model_warp_configuration" => {
                    let mut c = Self::empty();
                    c.read_blending_factor(e)?;
                    config = Some(c);
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(ModelWarpError::XmlParse(e.to_string())),
            }
            buf.clear();
        }

        config.ok_or_else(|| ModelWarpError::missing_element("model_warp_configuration", "warp configuration"))
    }

    fn read_blending_factor(&mut self, e: &BytesStart) -> ModelWarpResult<()> {
        if let Some(s) = get_attribute_opt(e, "blending_factor") {
            let factor: f64 = s.trim().parse().map_err(|_| {
                ModelWarpError::invalid_attribute("blending_factor", "model_warp_configuration", "expected a number")
            })?;
            self.set_blending_factor(factor);
        }
        Ok(())
    }

    /// Serializes the configuration to indented XML.
    ///
    /// # Errors
    ///
    /// Returns an error if XML generation fails.
    pub fn to_xml_string(&self) -> ModelWarpResult<String> {
        let mut buffer = Vec::new();
        let mut writer = Writer::new_with_indent(Cursor::new(&mut buffer), b' ', 2);

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(|e| xml_write_error("declaration", &e))?;

        let mut root = BytesStart::new("model_warp_configuration");
        root.push_attribute(("blending_factor", self.blending_factor.to_string().as_str()));

        if self.strategies.is_empty() {
            writer
                .write_event(Event::Empty(root))
                .map_err(|e| xml_write_error("model_warp_configuration", &e))?;
        } else {
            writer
                .write_event(Event::Start(root))
                .map_err(|e| xml_write_error("model_warp_configuration", &e))?;
            for strategy in &self.strategies {
                write_strategy(&mut writer, strategy)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("model_warp_configuration")))
                .map_err(|e| xml_write_error("model_warp_configuration", &e))?;
        }

        String::from_utf8(buffer).map_err(|e| ModelWarpError::XmlParse(e.to_string()))
    }

    /// Writes the configuration as XML.
    ///
    /// # Errors
    ///
    /// Returns an error if XML generation or writing fails.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ModelWarpResult<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_xml_string()?)?;
        debug!(path = %path.display(), "saved warp configuration");
        Ok(())
    }

    /// Resolves every declaration through `registry` and checks that no two
    /// strategies of the same kind claim the same target.
    ///
    /// # Errors
    ///
    /// Returns the first unknown tag, invalid parameter, duplicate target
    /// or cross-strategy conflict.
    pub fn finalize(&self, registry: &StrategyRegistry) -> ModelWarpResult<Vec<StrategyDefinition>> {
        let definitions = self
            .strategies
            .iter()
            .map(|declaration| registry.build(declaration))
            .collect::<ModelWarpResult<Vec<_>>>()?;
        check_target_conflicts(&definitions)?;
        Ok(definitions)
    }
}

fn parse_strategies<R: BufRead>(reader: &mut Reader<R>, config: &mut ModelWarpConfiguration) -> ModelWarpResult<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let elem_name = e.name().as_ref().to_vec();
                if elem_name.as_slice() == b"strategy" {
                    let mut declaration = parse_strategy_header(e)?;
                    parse_strategy_body(reader, &mut declaration)?;
                    config.strategies.push(declaration);
                } else {
                    skip_element(reader, &elem_name)?;
                }
            }
            Ok(Event::Empty(ref e)) if e.name().as_ref() == b"strategy" => {
                config.strategies.push(parse_strategy_header(e)?);
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"model_warp_configuration" => break,
            Ok(Event::Eof) => {
                return Err(ModelWarpError::XmlParse(
                    "unexpected EOF in model_warp_configuration".into(),
                ))
            }
            Ok(_) => {}
            Err(e) => return Err(ModelWarpError::XmlParse(e.to_string())),
        }
        buf.clear();
    }

    Ok(())
}

fn parse_strategy_header(e: &BytesStart) -> ModelWarpResult<StrategyDeclaration> {
    let type_tag = get_attribute(e, "type")?;
    let name = get_attribute_opt(e, "name").unwrap_or_else(|| type_tag.clone());
    Ok(StrategyDeclaration::new(type_tag, name))
}

fn parse_strategy_body<R: BufRead>(reader: &mut Reader<R>, declaration: &mut StrategyDeclaration) -> ModelWarpResult<()> {
    let mut buf = Vec::new();
    let mut in_target = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let elem_name = e.name().as_ref().to_vec();
                match elem_name.as_slice() {
                    b"target" => in_target = true,
                    b"param" => {
                        declaration.params.push(parse_param(e)?);
                        skip_element(reader, b"param")?;
                    }
                    _ => skip_element(reader, &elem_name)?,
                }
            }
            Ok(Event::Empty(ref e)) if e.name().as_ref() == b"param" => {
                declaration.params.push(parse_param(e)?);
            }
            Ok(Event::Text(ref t)) if in_target => {
                let text = t.unescape().map_err(|e| ModelWarpError::XmlParse(e.to_string()))?;
                declaration.targets.push(text.trim().to_string());
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"target" => in_target = false,
            Ok(Event::End(ref e)) if e.name().as_ref() == b"strategy" => break,
            Ok(Event::Eof) => return Err(ModelWarpError::XmlParse("unexpected EOF in strategy".into())),
            Ok(_) => {}
            Err(e) => return Err(ModelWarpError::XmlParse(e.to_string())),
        }
        buf.clear();
    }

    Ok(())
}

fn parse_param(e: &BytesStart) -> ModelWarpResult<StrategyParam> {
    Ok(StrategyParam::new(get_attribute(e, "name")?, get_attribute(e, "value")?))
}

fn write_strategy<W: std::io::Write>(writer: &mut Writer<W>, strategy: &StrategyDeclaration) -> ModelWarpResult<()> {
    let mut start = BytesStart::new("strategy");
    start.push_attribute(("type", strategy.type_tag.as_str()));
    start.push_attribute(("name", strategy.name.as_str()));
    writer
        .write_event(Event::Start(start))
        .map_err(|e| xml_write_error("strategy", &e))?;

    for target in &strategy.targets {
        writer
            .write_event(Event::Start(BytesStart::new("target")))
            .map_err(|e| xml_write_error("target", &e))?;
        writer
            .write_event(Event::Text(BytesText::new(target)))
            .map_err(|e| xml_write_error("target", &e))?;
        writer
            .write_event(Event::End(BytesEnd::new("target")))
            .map_err(|e| xml_write_error("target", &e))?;
    }

    for param in &strategy.params {
        let mut element = BytesStart::new("param");
        element.push_attribute(("name", param.name.as_str()));
        element.push_attribute(("value", param.value.as_str()));
        writer
            .write_event(Event::Empty(element))
            .map_err(|e| xml_write_error("param", &e))?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("strategy")))
        .map_err(|e| xml_write_error("strategy", &e))?;
    Ok(())
}

fn xml_write_error(element: &str, e: &impl std::fmt::Display) -> ModelWarpError {
    ModelWarpError::XmlParse(format!("failed to write {element} element: {e}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::strategy::StrategyKind;

    const CONFIG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <model_warp_configuration blending_factor="0.25">
            <strategy type="thin_plate_spline_mesh" name="meshes">
                <target>*</target>
                <param name="source_landmarks_prescale" value="0.001"/>
            </strategy>
            <strategy type="identity_mesh" name="keep pelvis">
                <target>/pelvis/pelvis_geom</target>
                <target>/pelvis/sacrum_geom</target>
            </strategy>
            <strategy type="least_squares_frame" name="frames">
                <target>*</target>
            </strategy>
        </model_warp_configuration>
    "#;

    #[test]
    fn test_parse() {
        let config = ModelWarpConfiguration::from_xml_str(CONFIG).unwrap();
        assert_eq!(config.blending_factor(), 0.25);
        assert_eq!(config.strategies().len(), 3);

        let keep = &config.strategies()[1];
        assert_eq!(keep.type_tag, "identity_mesh");
        assert_eq!(keep.name, "keep pelvis");
        assert_eq!(keep.targets, ["/pelvis/pelvis_geom", "/pelvis/sacrum_geom"]);

        assert_eq!(
            config.strategies()[0].params,
            vec![StrategyParam::new("source_landmarks_prescale", "0.001")]
        );
    }

    #[test]
    fn test_roundtrip() {
        let config = ModelWarpConfiguration::from_xml_str(CONFIG).unwrap();
        let xml = config.to_xml_string().unwrap();
        let reloaded = ModelWarpConfiguration::from_xml_str(&xml).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_roundtrip_escapes() {
        let config = ModelWarpConfiguration::empty()
            .with_strategy(
                StrategyDeclaration::new("least_squares_frame", "a <b> & \"c\"")
                    .with_target("/x&y")
                    .with_param("source_landmarks_file", "dir/<odd>.csv"),
            );
        let xml = config.to_xml_string().unwrap();
        assert_eq!(ModelWarpConfiguration::from_xml_str(&xml).unwrap(), config);
    }

    #[test]
    fn test_empty_roundtrip() {
        let mut config = ModelWarpConfiguration::empty();
        config.set_blending_factor(0.5);
        let xml = config.to_xml_string().unwrap();
        assert_eq!(ModelWarpConfiguration::from_xml_str(&xml).unwrap(), config);
    }

    #[test]
    fn test_add_strategy_edits_in_place() {
        let mut config = ModelWarpConfiguration::from_xml_str(CONFIG).unwrap();
        config.add_strategy(StrategyDeclaration::new("identity_frame", "keep pelvis frame").with_target("/pelvis"));

        assert_eq!(config.strategies().len(), 4);
        assert_eq!(config.strategies()[3].name, "keep pelvis frame");
        assert_eq!(config.blending_factor(), 0.25);

        // an exact frame target alongside the frame wildcard is not a conflict
        let definitions = config.finalize(&StrategyRegistry::with_builtin_strategies()).unwrap();
        assert_eq!(definitions.len(), 4);

        let xml = config.to_xml_string().unwrap();
        assert_eq!(ModelWarpConfiguration::from_xml_str(&xml).unwrap(), config);

        config.add_strategy(StrategyDeclaration::new("produce_error_frame", "clash").with_target("/pelvis"));
        assert!(matches!(
            config.finalize(&StrategyRegistry::with_builtin_strategies()),
            Err(ModelWarpError::ConflictingTargets { .. })
        ));
    }

    #[test]
    fn test_blending_factor_clamped_on_load() {
        let config =
            ModelWarpConfiguration::from_xml_str(r#"<model_warp_configuration blending_factor="3"/>"#).unwrap();
        assert_eq!(config.blending_factor(), 1.0);
    }

    #[test]
    fn test_nan_blending_factor_ignored() {
        let mut config = ModelWarpConfiguration::default();
        config.set_blending_factor(0.3);
        config.set_blending_factor(f64::NAN);
        assert_eq!(config.blending_factor(), 0.3);
    }

    #[test]
    fn test_missing_root() {
        assert!(matches!(
            ModelWarpConfiguration::from_xml_str("<other/>"),
            Err(ModelWarpError::MissingElement { .. })
        ));
    }

    #[test]
    fn test_missing_type() {
        let xml = r#"<model_warp_configuration><strategy name="x"/></model_warp_configuration>"#;
        assert!(matches!(
            ModelWarpConfiguration::from_xml_str(xml),
            Err(ModelWarpError::MissingAttribute { attribute: "type", .. })
        ));
    }

    #[test]
    fn test_conventional_path() {
        assert_eq!(
            ModelWarpConfiguration::conventional_path(Path::new("/models/leg.xml")),
            PathBuf::from("/models/leg.warpconfig.xml")
        );
    }

    #[test]
    fn test_default_finalizes() {
        let definitions = ModelWarpConfiguration::default()
            .finalize(&StrategyRegistry::with_builtin_strategies())
            .unwrap();
        assert_eq!(definitions.len(), 2);
        assert_eq!(definitions[0].kind(), StrategyKind::Mesh);
        assert_eq!(definitions[1].kind(), StrategyKind::Frame);
    }

    #[test]
    fn test_finalize_rejects_two_mesh_wildcards() {
        let config = ModelWarpConfiguration::empty()
            .with_strategy(StrategyDeclaration::new("thin_plate_spline_mesh", "a").with_target("*"))
            .with_strategy(StrategyDeclaration::new("identity_mesh", "b").with_target("*"));
        let result = config.finalize(&StrategyRegistry::with_builtin_strategies());
        assert!(matches!(result, Err(ModelWarpError::ConflictingTargets { .. })));
    }

    #[test]
    fn test_finalize_allows_different_kinds_on_wildcard() {
        let config = ModelWarpConfiguration::empty()
            .with_strategy(StrategyDeclaration::new("identity_mesh", "a").with_target("*"))
            .with_strategy(StrategyDeclaration::new("identity_frame", "b").with_target("*"));
        assert!(config.finalize(&StrategyRegistry::with_builtin_strategies()).is_ok());
    }

    #[test]
    fn test_finalize_unknown_tag() {
        let config = ModelWarpConfiguration::empty()
            .with_strategy(StrategyDeclaration::new("bend_it_like_beckham", "a").with_target("*"));
        let result = config.finalize(&StrategyRegistry::with_builtin_strategies());
        assert!(matches!(result, Err(ModelWarpError::UnknownStrategyType(t)) if t == "bend_it_like_beckham"));
    }
}
