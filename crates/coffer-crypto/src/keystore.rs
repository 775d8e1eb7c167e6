//! PEM key files on disk
//!
//! A principal's key pair is created on first use and reused until the private
//! key file is deleted. The private key file is created with mode 0600.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::CryptoError;
use crate::keys::{parse_public_pem, KeyPair};

/// Locations of one principal's key pair.
#[derive(Debug, Clone)]
pub struct KeyStore {
    private_path: PathBuf,
    public_path: PathBuf,
}

impl KeyStore {
    pub fn new(private_path: impl Into<PathBuf>, public_path: impl Into<PathBuf>) -> Self {
        Self {
            private_path: private_path.into(),
            public_path: public_path.into(),
        }
    }

    /// Load the key pair, generating and persisting a fresh one only when
    /// the private key file is missing. A missing public file is rewritten
    /// from the private key.
    pub fn load_or_generate(&self, bits: usize) -> Result<KeyPair, CryptoError> {
        if self.private_path.exists() {
            let pem = read(&self.private_path)?;
            let pair = KeyPair::from_private_pem(&pem)?;
            if !self.public_path.exists() {
                info!(public = %self.public_path.display(), "restoring public key file");
                write(&self.public_path, pair.public_pem()?.as_bytes())?;
            }
            return Ok(pair);
        }

        info!(
            private = %self.private_path.display(),
            public = %self.public_path.display(),
            bits,
            "generating RSA key pair"
        );
        let pair = KeyPair::generate(bits)?;
        write_private(&self.private_path, pair.private_pem()?.as_bytes())?;
        write(&self.public_path, pair.public_pem()?.as_bytes())?;
        Ok(pair)
    }

    pub fn private_path(&self) -> &Path {
        &self.private_path
    }

    pub fn public_path(&self) -> &Path {
        &self.public_path
    }
}

/// Persist a peer's public key PEM (the client's copy of the server key).
pub fn save_public_key(path: &Path, pem: &[u8]) -> Result<(), CryptoError> {
    parse_public_pem(pem)?;
    write(path, pem)
}

/// Read a previously saved public key PEM. Returns the raw PEM bytes.
pub fn load_public_key(path: &Path) -> Result<Vec<u8>, CryptoError> {
    let pem = read(path)?;
    parse_public_pem(&pem)?;
    Ok(pem)
}

fn read(path: &Path) -> Result<Vec<u8>, CryptoError> {
    std::fs::read(path).map_err(|source| CryptoError::KeyFile {
        path: path.to_path_buf(),
        source,
    })
}

fn write(path: &Path, bytes: &[u8]) -> Result<(), CryptoError> {
    let wrap = |source| CryptoError::KeyFile {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(wrap)?;
    }
    std::fs::write(path, bytes).map_err(wrap)
}

fn write_private(path: &Path, bytes: &[u8]) -> Result<(), CryptoError> {
    use std::io::Write;

    let wrap = |source| CryptoError::KeyFile {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(wrap)?;
    }
    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(path).map_err(wrap)?;
    file.write_all(bytes).map_err(wrap)?;

    // mode() only applies when the file is created
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(wrap)?;
    }
    Ok(())
}
