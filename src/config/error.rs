//! Configuration errors

use thiserror::Error;

/// Failure to read the environment into [`AppConfig`](super::AppConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// A configuration value that loaded but cannot be used.
///
/// Field names are the environment variables an operator has to fix.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("{field} must be {expected}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
    },

    #[error("{first} must be greater than {second}")]
    Inconsistent {
        first: &'static str,
        second: &'static str,
    },
}

impl ValidationError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn out_of_range(field: &'static str, expected: &'static str) -> Self {
        Self::OutOfRange { field, expected }
    }

    /// The environment variable this error points at.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Missing(field)
            | Self::Invalid { field, .. }
            | Self::OutOfRange { field, .. } => field,
            Self::Inconsistent { first, .. } => first,
        }
    }
}
