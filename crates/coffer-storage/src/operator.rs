//! OpenDAL Operator factory for coffer blob backends

use anyhow::{Context, Result};
use coffer_core::config::{BlobBackend, StorageConfig};
use opendal::Operator;

/// S3 access credentials, sourced from the environment
#[derive(Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl S3Credentials {
    /// `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY`, falling back to the
    /// `COFFER_`-prefixed names. `None` if no access key is set.
    pub fn from_env() -> Option<Self> {
        let access_key = std::env::var("AWS_ACCESS_KEY_ID")
            .or_else(|_| std::env::var("COFFER_S3_ACCESS_KEY"))
            .unwrap_or_default();
        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .or_else(|_| std::env::var("COFFER_S3_SECRET_KEY"))
            .unwrap_or_default();

        (!access_key.is_empty()).then_some(Self {
            access_key_id: access_key,
            secret_access_key: secret_key,
        })
    }
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

/// Build an OpenDAL Operator for any S3-compatible endpoint
///
/// Uses path-style addressing (default in opendal 0.55), which MinIO and other
/// self-hosted S3 servers require.
pub fn build_operator(storage: &StorageConfig, creds: &S3Credentials) -> Result<Operator> {
    // opendal 0.55: S3 builder uses consuming pattern (methods take `self`, return `Self`)
    let builder = opendal::services::S3::default()
        .endpoint(&storage.endpoint)
        .region(&storage.region)
        .bucket(&storage.bucket)
        .access_key_id(&creds.access_key_id)
        .secret_access_key(&creds.secret_access_key);

    finish(Operator::new(builder).context("creating OpenDAL S3 operator")?)
}

/// Build the configured blob backend.
///
/// For S3, if `enforce_tls` is true and the endpoint uses HTTP, this returns
/// an error. Otherwise a warning is logged for non-HTTPS endpoints.
pub fn build_from_core_config(
    storage: &StorageConfig,
    creds: Option<&S3Credentials>,
) -> Result<Operator> {
    match storage.backend {
        BlobBackend::S3 => {
            if storage.endpoint.starts_with("http://") {
                if storage.enforce_tls {
                    anyhow::bail!(
                        "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                         Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                        storage.endpoint
                    );
                }
                tracing::warn!(
                    endpoint = %storage.endpoint,
                    "S3 endpoint uses plaintext HTTP; credentials are transmitted unencrypted"
                );
            }
            let creds = creds.context(
                "S3 backend selected but no credentials found (set AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY)",
            )?;
            build_operator(storage, creds)
        }
        BlobBackend::Fs => {
            let builder = opendal::services::Fs::default().root(&storage.root.to_string_lossy());
            finish(Operator::new(builder).context("creating OpenDAL fs operator")?)
        }
        BlobBackend::Memory => {
            tracing::warn!("memory blob backend: stored files do not survive a restart");
            finish(
                Operator::new(opendal::services::Memory::default())
                    .context("creating OpenDAL memory operator")?,
            )
        }
    }
}

fn finish<A: opendal::raw::Access>(builder: opendal::OperatorBuilder<A>) -> Result<Operator> {
    Ok(builder
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> S3Credentials {
        S3Credentials {
            access_key_id: "test-key".into(),
            secret_access_key: "test-secret".into(),
        }
    }

    #[test]
    fn test_build_operator_valid() {
        let storage = StorageConfig {
            endpoint: "http://localhost:9000".into(),
            bucket: "test-bucket".into(),
            ..Default::default()
        };
        assert!(build_operator(&storage, &creds()).is_ok());
    }

    #[test]
    fn test_http_allowed_without_enforce_tls() {
        let storage = StorageConfig {
            endpoint: "http://localhost:9000".into(),
            enforce_tls: false,
            ..Default::default()
        };
        assert!(build_from_core_config(&storage, Some(&creds())).is_ok());
    }

    #[test]
    fn test_http_rejected_with_enforce_tls() {
        let storage = StorageConfig {
            endpoint: "http://insecure:9000".into(),
            enforce_tls: true,
            ..Default::default()
        };
        let result = build_from_core_config(&storage, Some(&creds()));
        assert!(result.is_err(), "HTTP + enforce_tls must fail");
        assert!(result.unwrap_err().to_string().contains("enforce_tls"));
    }

    #[test]
    fn test_https_with_enforce_tls() {
        let storage = StorageConfig {
            endpoint: "https://s3.example.com".into(),
            enforce_tls: true,
            ..Default::default()
        };
        assert!(build_from_core_config(&storage, Some(&creds())).is_ok());
    }

    #[test]
    fn test_s3_requires_credentials() {
        let storage = StorageConfig::default();
        let err = build_from_core_config(&storage, None).unwrap_err();
        assert!(err.to_string().contains("credentials"));
    }

    #[test]
    fn test_fs_and_memory_backends() {
        let dir = tempfile::TempDir::new().unwrap();
        let fs = StorageConfig {
            backend: BlobBackend::Fs,
            root: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert!(build_from_core_config(&fs, None).is_ok());

        let mem = StorageConfig {
            backend: BlobBackend::Memory,
            ..Default::default()
        };
        assert!(build_from_core_config(&mem, None).is_ok());
    }

    #[test]
    fn test_credentials_debug_redacted() {
        let printed = format!("{:?}", creds());
        assert!(printed.contains("test-key"));
        assert!(!printed.contains("test-secret"));
    }
}
