use coffer_core::VaultError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// No key material was supplied; the caller has to log in again.
    #[error("empty key, re-authentication required")]
    EmptyKey,

    #[error("malformed key: {0}")]
    KeyFormat(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("entropy source failure: {0}")]
    Entropy(String),

    #[error("keystream exhausted after {0} bytes")]
    KeystreamExhausted(u64),

    #[error("key file {path}: {source}")]
    KeyFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::EmptyKey | CryptoError::KeyFormat(_) | CryptoError::Decrypt(_) => {
                VaultError::KeyInvalid(err.to_string())
            }
            other => VaultError::Internal(other.to_string()),
        }
    }
}
