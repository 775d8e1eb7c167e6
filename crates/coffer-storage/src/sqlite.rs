//! SQLite implementation of the metadata and identity stores.
//!
//! rusqlite with bundled SQLite, one connection behind a mutex, every query
//! run on the blocking pool via `spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use coffer_core::types::{FileMetadata, User};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use crate::error::{Result, StorageError};
use crate::migration;
use crate::traits::{MetadataStore, UserStore};

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StorageError::Poisoned)?;
            f(&conn)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn to_i64(field: &str, value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::InvalidData(format!("{field} {value} out of range")))
}

fn row_to_meta(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileMetadata> {
    Ok(FileMetadata {
        id: row.get("id")?,
        login: row.get("login")?,
        filename: row.get("filename")?,
        comment: row.get("comment")?,
        created: row.get::<_, i64>("created")? as u64,
        size: row.get::<_, i64>("size")? as u64,
        wrapped_key: row.get("wrapped_key")?,
    })
}

const SELECT_FILES: &str =
    "SELECT id, login, filename, comment, created, size, wrapped_key FROM files";

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<FileMetadata>> {
        let id = id.to_string();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    &format!("{SELECT_FILES} WHERE id = ?1"),
                    params![id],
                    row_to_meta,
                )
                .optional()?)
        })
        .await
    }

    async fn get_by_login(&self, login: &str) -> Result<Vec<FileMetadata>> {
        let login = login.to_string();
        self.run(move |conn| {
            let mut stmt =
                conn.prepare(&format!("{SELECT_FILES} WHERE login = ?1 ORDER BY created, id"))?;
            let rows = stmt
                .query_map(params![login], row_to_meta)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn add(&self, meta: &FileMetadata) -> Result<()> {
        let meta = meta.clone();
        self.run(move |conn| {
            let created = to_i64("created", meta.created)?;
            let size = to_i64("size", meta.size)?;
            conn.execute(
                "INSERT INTO files (id, login, filename, comment, created, size, wrapped_key)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    meta.id,
                    meta.login,
                    meta.filename,
                    meta.comment,
                    created,
                    size,
                    meta.wrapped_key
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StorageError::DuplicateFileId(meta.id.clone())
                } else {
                    e.into()
                }
            })?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.run(move |conn| {
            conn.execute("DELETE FROM files WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn add_user(&self, user: &User) -> Result<()> {
        let user = user.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO users (login, password_hash) VALUES (?1, ?2)",
                params![user.login, user.password_hash],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StorageError::LoginTaken(user.login.clone())
                } else {
                    e.into()
                }
            })?;
            Ok(())
        })
        .await
    }

    async fn get_user(&self, login: &str) -> Result<Option<User>> {
        let login = login.to_string();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT login, password_hash FROM users WHERE login = ?1",
                    params![login],
                    |row| {
                        Ok(User {
                            login: row.get(0)?,
                            password_hash: row.get(1)?,
                        })
                    },
                )
                .optional()?)
        })
        .await
    }
}
