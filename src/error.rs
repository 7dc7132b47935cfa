use std::error::Error as StdError;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Murmur's crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Murmur's crate-wide error type.
///
/// The variants follow the lifecycle of a decoder:
/// - `InvalidKey` / `Config` are raised while building a [`crate::config::Config`] or while
///   resolving the files it names.
/// - `ModelLoad` means a model file exists but could not be parsed. Both this and `Config` are
///   fatal to the decoder being constructed, never to the process.
/// - `Sequence` is a caller contract violation (API called out of lifecycle order). The session
///   stays usable once the caller corrects the call order.
///
/// A decode that produces no words is *not* an error; it yields an empty hypothesis.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown configuration option '{0}'")]
    InvalidKey(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to load model file '{}': {message}", path.display())]
    ModelLoad { path: PathBuf, message: String },

    #[error("API called out of order: {0}")]
    Sequence(String),

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] Box<dyn StdError + Send + Sync>),
}

impl Error {
    pub(crate) fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub(crate) fn sequence(message: impl Into<String>) -> Self {
        Self::Sequence(message.into())
    }

    pub(crate) fn model_load(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::ModelLoad {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Whether this error is fatal to decoder construction (as opposed to a single call).
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidKey(_) | Self::Config(_) | Self::ModelLoad { .. }
        )
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Message(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<hound::Error> for Error {
    fn from(err: hound::Error) -> Self {
        Self::Other(Box::new(err))
    }
}
