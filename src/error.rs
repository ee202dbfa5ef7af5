// src/error.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Error taxonomy for the storage layer.

use thiserror::Error;

use crate::backend::BackendError;

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

/// Errors surfaced by [`crate::S3Storage`] and its helpers.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The object behind a logical name does not exist.
    #[error("File {name} does not exist")]
    NotFound { name: String },

    /// Programmer error: write-mode open, unknown setting, malformed value.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Any other failure reported by the backend, with the logical name it concerned.
    #[error("backend error for {name}: {message}")]
    Backend { name: String, message: String },

    /// Settings that cannot be combined, or that cannot change on reload.
    #[error("configuration conflict: {0}")]
    ConfigurationConflict(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Attach a logical name to a backend failure.
    pub fn from_backend(name: &str, err: BackendError) -> Self {
        match err {
            BackendError::NoSuchKey { .. } => StorageError::NotFound { name: name.to_string() },
            other => StorageError::Backend {
                name: name.to_string(),
                message: other.to_string(),
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}
