//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why a settings layer could not be turned into [`crate::EstimaSettings`].
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read settings file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings file {} is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// The merged document did not match the settings shape.
    #[error("settings do not match the expected shape: {0}")]
    Shape(#[from] serde_json::Error),
    /// A value parsed but the server cannot run with it. `key` is the
    /// dotted camelCase path as written in the settings file.
    #[error("invalid setting `{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

impl SettingsError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            reason: reason.into(),
        }
    }

    /// The offending key, for errors raised by validation.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Self::InvalidValue { key, .. } => Some(*key),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SettingsError>;
