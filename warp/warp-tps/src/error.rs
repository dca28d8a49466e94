//! Error types for thin-plate spline solving.

use thiserror::Error;

/// Errors that can occur while computing thin-plate spline coefficients.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum TpsError {
    /// No landmark pairs were provided.
    #[error("at least one landmark pair is required to compute TPS coefficients")]
    NoLandmarks,

    /// Source and destination landmark arrays differ in length.
    #[error("landmark arrays must have equal length: {source_count} sources vs {destination_count} destinations")]
    LengthMismatch {
        /// Number of source landmarks.
        source_count: usize,
        /// Number of destination landmarks.
        destination_count: usize,
    },

    /// A landmark contains a NaN or infinite coordinate.
    #[error("landmark pair {index} contains a non-finite coordinate")]
    NonFiniteLandmark {
        /// Index of the offending pair.
        index: usize,
    },

    /// The `(N+4) x (N+4)` system could not be solved.
    #[error("TPS system built from {landmarks} landmark pairs is singular or ill-conditioned")]
    SingularSystem {
        /// Number of landmark pairs used to build the system.
        landmarks: usize,
    },
}

/// Result type for thin-plate spline operations.
pub type TpsResult<T> = Result<T, TpsError>;
