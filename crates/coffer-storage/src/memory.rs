//! In-process metadata and identity store, for tests and `backend = "memory"`.

use std::collections::HashMap;

use async_trait::async_trait;
use coffer_core::types::{FileMetadata, User};
use tokio::sync::RwLock;

use crate::error::{Result, StorageError};
use crate::traits::{MetadataStore, UserStore};

#[derive(Debug, Default)]
pub struct MemoryStore {
    files: RwLock<HashMap<String, FileMetadata>>,
    users: RwLock<HashMap<String, User>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<FileMetadata>> {
        Ok(self.files.read().await.get(id).cloned())
    }

    async fn get_by_login(&self, login: &str) -> Result<Vec<FileMetadata>> {
        let mut owned: Vec<FileMetadata> = self
            .files
            .read()
            .await
            .values()
            .filter(|m| m.login == login)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        Ok(owned)
    }

    async fn add(&self, meta: &FileMetadata) -> Result<()> {
        let mut files = self.files.write().await;
        if files.contains_key(&meta.id) {
            return Err(StorageError::DuplicateFileId(meta.id.clone()));
        }
        files.insert(meta.id.clone(), meta.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.files.write().await.remove(id);
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn add_user(&self, user: &User) -> Result<()> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.login) {
            return Err(StorageError::LoginTaken(user.login.clone()));
        }
        users.insert(user.login.clone(), user.clone());
        Ok(())
    }

    async fn get_user(&self, login: &str) -> Result<Option<User>> {
        Ok(self.users.read().await.get(login).cloned())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn meta(id: &str, login: &str, created: u64) -> FileMetadata {
        FileMetadata {
            id: id.into(),
            login: login.into(),
            filename: format!("{id}.bin"),
            comment: String::new(),
            created,
            size: 42,
            wrapped_key: vec![0xAA; 8],
        }
    }

    #[tokio::test]
    async fn test_file_records() {
        let store = MemoryStore::new();
        store.add(&meta("b", "alice", 2)).await.unwrap();
        store.add(&meta("a", "alice", 1)).await.unwrap();
        store.add(&meta("c", "bob", 1)).await.unwrap();

        let alice: Vec<String> = store
            .get_by_login("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(alice, ["a", "b"]);

        assert_eq!(store.get_by_id("c").await.unwrap().unwrap().login, "bob");
        store.delete("c").await.unwrap();
        assert!(store.get_by_id("c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_file_id() {
        let store = MemoryStore::new();
        store.add(&meta("a", "alice", 1)).await.unwrap();
        assert!(matches!(
            store.add(&meta("a", "bob", 1)).await,
            Err(StorageError::DuplicateFileId(_))
        ));
    }

    #[tokio::test]
    async fn test_users() {
        let store = MemoryStore::new();
        let alice = User {
            login: "alice".into(),
            password_hash: "$argon2id$x".into(),
        };
        store.add_user(&alice).await.unwrap();
        assert_eq!(store.get_user("alice").await.unwrap(), Some(alice.clone()));
        assert!(store.get_user("bob").await.unwrap().is_none());
        assert!(matches!(
            store.add_user(&alice).await,
            Err(StorageError::LoginTaken(_))
        ));
    }
}
