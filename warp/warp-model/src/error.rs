//! Error types for model warping.

use std::path::PathBuf;
use thiserror::Error;
use warp_tps::TpsError;

/// Result type for model warping operations.
pub type ModelWarpResult<T> = Result<T, ModelWarpError>;

/// Errors that can occur while loading, configuring or warping a model.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ModelWarpError {
    /// File not found.
    #[error("file not found: {path}")]
    FileNotFound {
        /// Path that was not found.
        path: PathBuf,
    },

    /// XML parsing error.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// Missing required element.
    #[error("missing required element: {element} in {context}")]
    MissingElement {
        /// The missing element name.
        element: &'static str,
        /// Where the element was expected.
        context: String,
    },

    /// Missing required attribute.
    #[error("missing required attribute: {attribute} on {element}")]
    MissingAttribute {
        /// The missing attribute name.
        attribute: &'static str,
        /// The element that should have the attribute.
        element: String,
    },

    /// Invalid attribute value.
    #[error("invalid value for {attribute} on {element}: {message}")]
    InvalidAttribute {
        /// The attribute with the invalid value.
        attribute: &'static str,
        /// The element containing the attribute.
        element: String,
        /// Description of why the value is invalid.
        message: String,
    },

    /// Invalid mesh or landmark file content.
    #[error("invalid content in {path}: {message}")]
    InvalidContent {
        /// File that failed to parse.
        path: PathBuf,
        /// Description of what was invalid.
        message: String,
    },

    /// Two components share the same absolute path.
    #[error("duplicate component path: {0}")]
    DuplicateComponent(String),

    /// A frame refers to a parent that does not exist.
    #[error("frame {frame} refers to undefined parent {parent}")]
    UndefinedParent {
        /// The frame with the dangling reference.
        frame: String,
        /// The parent path that could not be found.
        parent: String,
    },

    /// A strategy declaration uses a type tag the registry does not know.
    #[error("unknown warp strategy type: {0}")]
    UnknownStrategyType(String),

    /// A strategy declaration carries a parameter its type does not accept.
    #[error("strategy {strategy} does not accept parameter {parameter}")]
    UnknownParameter {
        /// Name of the strategy declaration.
        strategy: String,
        /// The rejected parameter name.
        parameter: String,
    },

    /// A strategy parameter could not be parsed.
    #[error("invalid value {value:?} for parameter {parameter} of strategy {strategy}")]
    InvalidParameter {
        /// Name of the strategy declaration.
        strategy: String,
        /// Name of the parameter.
        parameter: String,
        /// The value that failed to parse.
        value: String,
    },

    /// A strategy declares no targets at all.
    #[error("strategy {strategy} has no targets")]
    NoTargets {
        /// Name of the strategy declaration.
        strategy: String,
    },

    /// A strategy declares the same target more than once.
    #[error("strategy {strategy} declares target {target} more than once")]
    DuplicateTarget {
        /// Name of the strategy declaration.
        strategy: String,
        /// The repeated target.
        target: String,
    },

    /// Two strategies of the same kind claim the same target.
    #[error("strategies {first} and {second} both claim target {target}")]
    ConflictingTargets {
        /// The contested target.
        target: String,
        /// The strategy that claimed the target first.
        first: String,
        /// The strategy that claimed it again.
        second: String,
    },

    /// A mesh strategy was asked to warp a frame, or vice versa.
    #[error("strategy {strategy} cannot warp {target}: it is a {kind} strategy")]
    StrategyKindMismatch {
        /// Name of the strategy declaration.
        strategy: String,
        /// The entity it was asked to warp.
        target: String,
        /// The kind the strategy applies to.
        kind: &'static str,
    },

    /// A model, mesh or frame cannot be warped in its current state.
    #[error("cannot warp {target}: {reason}")]
    NotWarpable {
        /// The model or component path.
        target: String,
        /// Why warping was refused.
        reason: String,
    },

    /// Two meshes would be exported to the same file.
    #[error("meshes {first} and {second} would both be exported to {path}")]
    ExportCollision {
        /// The shared output file.
        path: PathBuf,
        /// The mesh that claimed the file first.
        first: String,
        /// The mesh that claimed it again.
        second: String,
    },

    /// Least-squares fitting was given too few or degenerate correspondences.
    #[error("rigid fit needs at least {required} non-collinear correspondences, got {found}")]
    InsufficientCorrespondences {
        /// Number of usable correspondences.
        found: usize,
        /// Minimum number required.
        required: usize,
    },

    /// SVD computation failed during rigid fitting.
    #[error("SVD computation failed during rigid fit")]
    SvdFailed,

    /// Thin-plate spline solve failed.
    #[error(transparent)]
    Tps(#[from] TpsError),

    /// I/O error from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModelWarpError {
    /// Create a missing element error.
    pub fn missing_element(element: &'static str, context: impl Into<String>) -> Self {
        Self::MissingElement {
            element,
            context: context.into(),
        }
    }

    /// Create a missing attribute error.
    pub fn missing_attribute(attribute: &'static str, element: impl Into<String>) -> Self {
        Self::MissingAttribute {
            attribute,
            element: element.into(),
        }
    }

    /// Create an invalid attribute error.
    pub fn invalid_attribute(
        attribute: &'static str,
        element: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidAttribute {
            attribute,
            element: element.into(),
            message: message.into(),
        }
    }

    /// Create an invalid content error.
    pub fn invalid_content(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidContent {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a not-warpable error.
    pub fn not_warpable(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotWarpable {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Maps an `open` failure to [`ModelWarpError::FileNotFound`] where
    /// appropriate.
    pub(crate) fn from_open(error: std::io::Error, path: &std::path::Path) -> Self {
        if error.kind() == std::io::ErrorKind::NotFound {
            Self::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            Self::Io(error)
        }
    }
}
