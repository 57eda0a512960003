//! Storage tier error types.

use thiserror::Error;

/// Storage tier operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage ref: {0}")]
    InvalidRef(String),

    #[error("catalog error: {0}")]
    Catalog(#[from] strata_catalog::CatalogError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<strata_core::Error> for StorageError {
    fn from(err: strata_core::Error) -> Self {
        match err {
            strata_core::Error::InvalidStorageRef(msg) => StorageError::InvalidRef(msg),
            other => StorageError::Config(other.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
