//! Database interfaces used by the transfer protocol.

use async_trait::async_trait;
use coffer_core::types::{FileMetadata, User};

use crate::error::Result;

/// Per-file records. Ownership checks happen above this layer.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<FileMetadata>>;

    /// All files owned by `login`, oldest first.
    async fn get_by_login(&self, login: &str) -> Result<Vec<FileMetadata>>;

    /// Insert a new record. An existing id is a `DuplicateFileId` error.
    async fn add(&self, meta: &FileMetadata) -> Result<()>;

    /// Remove a record. Removing a missing id is not an error.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Registered principals.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new user. An existing login is a `LoginTaken` error.
    async fn add_user(&self, user: &User) -> Result<()>;

    async fn get_user(&self, login: &str) -> Result<Option<User>>;
}
