use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration shared by `cofferd` and the `coffer` client
/// (loaded from coffer.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CofferConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub keys: KeysConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP listen address for gRPC (default: 127.0.0.1:8080)
    pub listen: String,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

/// Blob storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    S3,
    Fs,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend: "s3", "fs", or "memory" (default: s3)
    pub backend: BlobBackend,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket holding encrypted blobs
    pub bucket: String,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// Enforce HTTPS for S3 connections (error on HTTP endpoints)
    pub enforce_tls: bool,
}

/// Metadata and identity database selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Backend: "sqlite" or "memory" (default: sqlite)
    pub backend: DatabaseBackend,
    /// SQLite database file
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for session tokens. Overridden by $COFFER_SECRET_KEY.
    #[serde(skip_serializing)]
    pub secret_key: String,
}

impl AuthConfig {
    /// Resolve the token secret: environment first, then the config file.
    pub fn resolve_secret(&self) -> anyhow::Result<String> {
        let secret = std::env::var("COFFER_SECRET_KEY").unwrap_or_else(|_| self.secret_key.clone());
        if secret.is_empty() {
            anyhow::bail!("no token secret configured: set [auth] secret_key or COFFER_SECRET_KEY");
        }
        Ok(secret)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Server RSA private key, PKCS#1 PEM (generated if absent)
    pub server_private: PathBuf,
    /// Server RSA public key, PKCS#1 PEM (generated if absent)
    pub server_public: PathBuf,
    /// Modulus size for newly generated keys (default: 2048)
    pub bits: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// gRPC endpoint of cofferd
    pub server_url: String,
    /// Where the session token is kept between invocations
    pub token_file: PathBuf,
    /// Client RSA private key (generated on first register/login)
    pub private_key: PathBuf,
    /// Client RSA public key
    pub public_key: PathBuf,
    /// Server public key as returned by register/login
    pub server_public_key: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".into(),
            log_level: "info".into(),
            log_format: "json".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BlobBackend::S3,
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "coffer".into(),
            root: PathBuf::from("/var/lib/coffer/blobs"),
            enforce_tls: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::Sqlite,
            path: PathBuf::from("/var/lib/coffer/coffer.db"),
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            server_private: PathBuf::from("/var/lib/coffer/.rsa_server_private"),
            server_public: PathBuf::from("/var/lib/coffer/.rsa_server_public"),
            bits: 2048,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            token_file: PathBuf::from("~/.config/coffer/token"),
            private_key: PathBuf::from("~/.config/coffer/.rsa_private"),
            public_key: PathBuf::from("~/.config/coffer/.rsa_public"),
            server_public_key: PathBuf::from("~/.config/coffer/.rsa_server_public"),
        }
    }
}

/// Expand a leading `~/` against $HOME.
pub fn expand_tilde(path: &std::path::Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
