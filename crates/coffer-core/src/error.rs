use thiserror::Error;

pub type VaultResult<T> = Result<T, VaultError>;

/// Failure taxonomy shared by every vault operation. Each variant maps onto
/// exactly one gRPC status code.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The caller's key material is empty or unusable; a fresh login fixes it.
    #[error("encryption key invalid, re-authentication required: {0}")]
    KeyInvalid(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl VaultError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(format!("I/O error: {err}"))
    }
}

impl From<anyhow::Error> for VaultError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

impl From<VaultError> for tonic::Status {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::Unauthenticated(m) => tonic::Status::unauthenticated(m),
            VaultError::PermissionDenied(m) => tonic::Status::permission_denied(m),
            VaultError::NotFound(m) => tonic::Status::not_found(m),
            VaultError::AlreadyExists(m) => tonic::Status::already_exists(m),
            VaultError::InvalidInput(m) => tonic::Status::invalid_argument(m),
            VaultError::KeyInvalid(m) => tonic::Status::failed_precondition(format!(
                "encryption key invalid, re-authentication required: {m}"
            )),
            VaultError::Internal(m) => tonic::Status::internal(m),
        }
    }
}
