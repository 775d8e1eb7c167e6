//! Daemon lifecycle: secrets, server keys, stores, gRPC server

use std::sync::Arc;

use anyhow::{Context, Result};
use coffer_auth::TokenAuthority;
use coffer_core::config::{CofferConfig, DatabaseBackend, DatabaseConfig};
use coffer_crypto::KeyStore;
use coffer_storage::{
    build_from_core_config, check_health, MemoryStore, MetadataStore, OpendalBlobStore,
    S3Credentials, SqliteStore, UserStore,
};
use coffer_transfer::{Accounts, Vault};
use secrecy::SecretString;
use tracing::{debug, info, warn};

pub async fn run(config: CofferConfig) -> Result<()> {
    info!("daemon starting");

    // ── Token authority ──────────────────────────────────────────────────
    let secret = SecretString::from(config.auth.resolve_secret()?);
    let tokens = Arc::new(TokenAuthority::new(&secret));

    // ── Server key pair ──────────────────────────────────────────────────
    let keystore = KeyStore::new(&config.keys.server_private, &config.keys.server_public);
    let bits = config.keys.bits;
    let server_key = tokio::task::spawn_blocking(move || keystore.load_or_generate(bits))
        .await?
        .context("loading server key pair")?;
    let server_public_pem = server_key.public_pem()?;
    info!(
        public = %config.keys.server_public.display(),
        "server key pair ready"
    );

    // ── Metadata and identity ────────────────────────────────────────────
    let (users, files) = open_database(&config.database)?;

    // ── Blob storage ─────────────────────────────────────────────────────
    let creds = S3Credentials::from_env();
    let operator = build_from_core_config(&config.storage, creds.as_ref())?;
    match check_health(&operator).await {
        Ok(()) => info!(backend = ?config.storage.backend, "blob storage: connected"),
        // Keep going; the retry layer covers backends that come up late.
        Err(e) => warn!(backend = ?config.storage.backend, "blob storage: {e}"),
    }
    let blobs = Arc::new(OpendalBlobStore::new(operator));

    let accounts = Arc::new(Accounts::new(users, tokens.clone(), server_public_pem));
    let vault = Arc::new(Vault::new(blobs, files, Arc::new(server_key)));

    notify_ready();

    crate::grpc::serve(&config.server.listen, accounts, vault, tokens).await?;

    info!("daemon stopped");
    Ok(())
}

/// Open the configured user and file record stores.
fn open_database(db: &DatabaseConfig) -> Result<(Arc<dyn UserStore>, Arc<dyn MetadataStore>)> {
    match db.backend {
        DatabaseBackend::Sqlite => {
            if let Some(parent) = db.path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let store = Arc::new(
                SqliteStore::open(&db.path)
                    .with_context(|| format!("opening database {}", db.path.display()))?,
            );
            info!(path = %db.path.display(), "database opened");
            let users: Arc<dyn UserStore> = store.clone();
            let files: Arc<dyn MetadataStore> = store;
            Ok((users, files))
        }
        DatabaseBackend::Memory => {
            warn!("memory database: users and file records do not survive a restart");
            let store = Arc::new(MemoryStore::new());
            let users: Arc<dyn UserStore> = store.clone();
            let files: Arc<dyn MetadataStore> = store;
            Ok((users, files))
        }
    }
}

/// Tell systemd we are up, when running under `Type=notify`.
fn notify_ready() {
    let Ok(socket) = std::env::var("NOTIFY_SOCKET") else {
        return;
    };
    use std::os::unix::net::UnixDatagram;
    match UnixDatagram::unbound().and_then(|sock| sock.send_to(b"READY=1\n", &socket)) {
        Ok(_) => debug!(notify_socket = %socket, "sent systemd READY=1"),
        Err(e) => warn!(notify_socket = %socket, "systemd notify failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_core::types::User;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sqlite_database_created_under_missing_dir() {
        let dir = TempDir::new().unwrap();
        let db = DatabaseConfig {
            backend: DatabaseBackend::Sqlite,
            path: dir.path().join("nested/coffer.db"),
        };

        let (users, files) = open_database(&db).unwrap();
        users
            .add_user(&User {
                login: "alice".into(),
                password_hash: "$argon2id$x".into(),
            })
            .await
            .unwrap();
        assert!(users.get_user("alice").await.unwrap().is_some());
        assert!(files.get_by_login("alice").await.unwrap().is_empty());
        assert!(db.path.exists());
    }

    #[tokio::test]
    async fn test_memory_database_opens() {
        let db = DatabaseConfig {
            backend: DatabaseBackend::Memory,
            path: "/nonexistent/unused.db".into(),
        };
        let (users, _files) = open_database(&db).unwrap();
        assert!(users.get_user("nobody").await.unwrap().is_none());
    }
}
