// ============================================================
// Layer 3: Error Taxonomy
// ============================================================
// Every library-level failure in the crate is one of these
// variants. The application and CLI layers wrap them in
// anyhow with extra context; below that line nothing is
// stringly typed.
//
// Persistence and vocabulary failures are never retried.
// They carry the path and the expected artifact so the
// caller can tell what was missing or broken.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by the tokenizer, persistence, model and
/// retrieval layers.
#[derive(Debug, Error)]
pub enum SiameseError {
    /// An expected artifact or directory does not exist.
    #[error("Not found: '{path}' (expected {expected})")]
    NotFound {
        /// Where we looked
        path: PathBuf,
        /// What should have been there
        expected: String,
    },

    /// An artifact exists but cannot be read back.
    #[error("Corrupt artifact at '{path}' (expected {expected}): {reason}")]
    CorruptArtifact {
        path: PathBuf,
        expected: String,
        reason: String,
    },

    /// Vocabulary training was given nothing to count.
    #[error("Empty corpus: {0}")]
    EmptyCorpus(String),

    /// Optimizer state was about to be bound to parameters living
    /// on a different device.
    #[error("Device mismatch: expected {expected}, found {found}")]
    DeviceMismatch { expected: String, found: String },

    /// Unknown split, unknown sample domain, or an operation that the
    /// current mode does not allow.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Failure inside a tokenizer implementation.
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Tensor data could not be converted back to host values.
    #[error("Tensor error: {0}")]
    Tensor(String),

    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SiameseError>;

impl SiameseError {
    pub fn not_found(path: impl AsRef<Path>, expected: impl Into<String>) -> Self {
        Self::NotFound {
            path: path.as_ref().to_path_buf(),
            expected: expected.into(),
        }
    }

    pub fn corrupt(
        path: impl AsRef<Path>,
        expected: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::CorruptArtifact {
            path: path.as_ref().to_path_buf(),
            expected: expected.into(),
            reason: reason.to_string(),
        }
    }

    /// Adapter for `map_err` on `std::io` results.
    pub fn io(path: impl AsRef<Path>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        move |source| Self::Io { path, source }
    }
}
