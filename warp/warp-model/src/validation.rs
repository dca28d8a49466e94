//! Validation results reported by warp strategies.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a single validation check.
///
/// Ordered so that the aggregate state of several checks is their maximum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValidationCheckState {
    /// The check passed.
    #[default]
    Ok,
    /// The check found something suspicious that does not prevent warping.
    Warning,
    /// The check failed; the entity cannot be warped.
    Error,
}

impl fmt::Display for ValidationCheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// A described validation check and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationCheckResult {
    /// Human-readable description of what was checked.
    pub description: String,
    /// Outcome of the check.
    pub state: ValidationCheckState,
}

impl ValidationCheckResult {
    /// Creates a check result.
    pub fn new(description: impl Into<String>, state: ValidationCheckState) -> Self {
        Self {
            description: description.into(),
            state,
        }
    }

    /// Creates a check that is `Ok` when `passed`, otherwise `Error`.
    pub fn required(description: impl Into<String>, passed: bool) -> Self {
        let state = if passed {
            ValidationCheckState::Ok
        } else {
            ValidationCheckState::Error
        };
        Self::new(description, state)
    }

    /// Creates a check that is `Ok` when `passed`, otherwise `Warning`.
    pub fn recommended(description: impl Into<String>, passed: bool) -> Self {
        let state = if passed {
            ValidationCheckState::Ok
        } else {
            ValidationCheckState::Warning
        };
        Self::new(description, state)
    }
}

impl fmt::Display for ValidationCheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.state, self.description)
    }
}

/// A named, human-readable diagnostic value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarpDetail {
    /// What the value describes.
    pub name: String,
    /// The value, already formatted for display.
    pub value: String,
}

impl WarpDetail {
    /// Creates a detail.
    pub fn new(name: impl Into<String>, value: impl ToString) -> Self {
        Self {
            name: name.into(),
            value: value.to_string(),
        }
    }
}

/// Reduces a set of checks to their worst state; `Ok` when empty.
pub fn aggregate_state<'a, I>(checks: I) -> ValidationCheckState
where
    I: IntoIterator<Item = &'a ValidationCheckResult>,
{
    checks
        .into_iter()
        .map(|c| c.state)
        .max()
        .unwrap_or_default()
}
