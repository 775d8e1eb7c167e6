use serde::{Deserialize, Serialize};

use crate::proto;

/// A registered principal. The hash never leaves the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub login: String,
    /// Argon2 PHC string
    pub password_hash: String,
}

/// Server-side record for one stored file.
///
/// `wrapped_key` is the per-file key wrapped for the server's public key;
/// it is never returned as-is to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub id: String,
    pub login: String,
    pub filename: String,
    pub comment: String,
    /// Unix seconds
    pub created: u64,
    pub size: u64,
    #[serde(skip)]
    pub wrapped_key: Vec<u8>,
}

impl FileMetadata {
    /// Copy without the wrapped key, as returned by file listings.
    pub fn without_key(&self) -> Self {
        Self {
            wrapped_key: Vec::new(),
            ..self.clone()
        }
    }
}

impl From<proto::FileInfo> for FileMetadata {
    fn from(info: proto::FileInfo) -> Self {
        Self {
            id: info.id,
            login: info.login,
            filename: info.filename,
            comment: info.comment,
            created: info.created,
            size: info.size,
            wrapped_key: info.encryption_key,
        }
    }
}

impl From<FileMetadata> for proto::FileInfo {
    fn from(meta: FileMetadata) -> Self {
        Self {
            id: meta.id,
            login: meta.login,
            filename: meta.filename,
            comment: meta.comment,
            created: meta.created,
            size: meta.size,
            encryption_key: meta.wrapped_key,
        }
    }
}

impl proto::FileStream {
    pub fn info(info: proto::FileInfo) -> Self {
        Self {
            data: Some(proto::file_stream::Data::Info(info)),
        }
    }

    pub fn chunk(bytes: Vec<u8>) -> Self {
        Self {
            data: Some(proto::file_stream::Data::ChunkData(bytes)),
        }
    }
}
