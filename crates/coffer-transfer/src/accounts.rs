//! Registration and login
//!
//! Both calls end by issuing a token bound to the caller's public key and
//! handing back the server's public key, which the client needs to wrap the
//! keys of files it uploads.

use std::sync::Arc;

use coffer_auth::{hash_password, verify_password, TokenAuthority};
use coffer_core::types::User;
use coffer_core::{VaultError, VaultResult};
use coffer_storage::UserStore;
use tracing::{info, instrument};

/// Result of a successful register or login.
#[derive(Debug, Clone)]
pub struct Issued {
    pub token: String,
    pub server_public_key: Vec<u8>,
}

pub struct Accounts {
    users: Arc<dyn UserStore>,
    tokens: Arc<TokenAuthority>,
    server_public_pem: String,
}

impl Accounts {
    pub fn new(
        users: Arc<dyn UserStore>,
        tokens: Arc<TokenAuthority>,
        server_public_pem: String,
    ) -> Self {
        Self {
            users,
            tokens,
            server_public_pem,
        }
    }

    #[instrument(skip_all, fields(login = %login))]
    pub async fn register(
        &self,
        login: &str,
        password: &str,
        public_key: Vec<u8>,
    ) -> VaultResult<Issued> {
        validate_credentials(login, password)?;
        let public_key = public_pem_text(public_key)?;

        let password = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(VaultError::internal)??;

        self.users
            .add_user(&User {
                login: login.to_string(),
                password_hash,
            })
            .await?;

        info!("user registered");
        self.issue(login, &public_key)
    }

    #[instrument(skip_all, fields(login = %login))]
    pub async fn login(
        &self,
        login: &str,
        password: &str,
        public_key: Vec<u8>,
    ) -> VaultResult<Issued> {
        validate_credentials(login, password)?;
        let public_key = public_pem_text(public_key)?;

        let user = self
            .users
            .get_user(login)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("user {login} not found")))?;

        let password = password.to_string();
        let matches = tokio::task::spawn_blocking(move || {
            verify_password(&password, &user.password_hash)
        })
        .await
        .map_err(VaultError::internal)??;

        if !matches {
            return Err(VaultError::PermissionDenied("wrong password".into()));
        }

        info!("user logged in");
        self.issue(login, &public_key)
    }

    fn issue(&self, login: &str, public_key: &str) -> VaultResult<Issued> {
        let token = self.tokens.issue(login, public_key)?;
        Ok(Issued {
            token,
            server_public_key: self.server_public_pem.clone().into_bytes(),
        })
    }
}

fn validate_credentials(login: &str, password: &str) -> VaultResult<()> {
    if login.is_empty() {
        return Err(VaultError::InvalidInput("login must not be empty".into()));
    }
    if password.is_empty() {
        return Err(VaultError::InvalidInput("password must not be empty".into()));
    }
    Ok(())
}

/// Public keys travel inside tokens as text. An empty key is accepted here
/// and surfaces later as a key error asking the client to log in again.
fn public_pem_text(public_key: Vec<u8>) -> VaultResult<String> {
    String::from_utf8(public_key)
        .map_err(|_| VaultError::InvalidInput("public key must be PEM text".into()))
}
