//! Error types for the storage layer.

use coffer_core::VaultError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// A user with this login already exists.
    #[error("login already taken: {0}")]
    LoginTaken(String),

    /// A metadata record with this id already exists.
    #[error("duplicate file id: {0}")]
    DuplicateFileId(String),

    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// The upload stream carried a different byte count than declared.
    #[error("declared size {expected} bytes, received {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Reading the caller-supplied upload stream failed.
    #[error("upload stream: {0}")]
    Source(std::io::Error),

    #[error("blob backend: {0}")]
    Blob(#[from] opendal::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("database lock poisoned")]
    Poisoned,

    #[error("blocking task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl From<StorageError> for VaultError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::LoginTaken(login) => {
                VaultError::AlreadyExists(format!("login {login} already taken"))
            }
            StorageError::DuplicateFileId(id) => {
                VaultError::AlreadyExists(format!("file {id} already exists"))
            }
            StorageError::BlobNotFound(id) => VaultError::NotFound(format!("file {id} not found")),
            StorageError::SizeMismatch { .. } => VaultError::InvalidInput(err.to_string()),
            StorageError::Source(ref e) if e.kind() == std::io::ErrorKind::InvalidData => {
                VaultError::InvalidInput(err.to_string())
            }
            other => VaultError::Internal(other.to_string()),
        }
    }
}
