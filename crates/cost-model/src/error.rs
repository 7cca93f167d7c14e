//! Error types for the cost model crate

use std::path::PathBuf;

/// Errors surfaced by cost models, the booster and checkpointing
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reading or writing a checkpoint failed
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Checkpoint exists but cannot be trusted (bad checksum, wrong kind, undecodable)
    #[error("checkpoint {path:?} failed integrity check: {reason}")]
    Integrity { path: PathBuf, reason: String },

    #[error("serialization failed: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("length mismatch: {what} has {actual} entries, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Training data that cannot be stored (bad cost, duplicate group)
    #[error("invalid training data: {0}")]
    InvalidData(String),

    #[error("feature extraction failed: {0}")]
    Extractor(String),

    #[error("training failed: {0}")]
    Training(String),

    /// Serialized booster bytes could not be decoded
    #[error("corrupt booster data: {0}")]
    Corrupt(String),

    /// Errors from collaborators (custom extractors, callers) passed through unchanged
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn integrity(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Integrity {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::Integrity { .. } | Error::Corrupt(_))
    }

    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
