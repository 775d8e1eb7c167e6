//! Upload, download, list, and delete orchestration
//!
//! Every operation takes the caller's [`Session`] explicitly; ownership is
//! checked here against `FileMetadata::login`. The server only ever holds a
//! plaintext file key inside [`Vault::download`], long enough to re-wrap it
//! for the caller.

use std::pin::Pin;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use coffer_auth::Session;
use coffer_core::proto::{file_stream::Data, FileInfo, FileStream};
use coffer_core::types::FileMetadata;
use coffer_core::{VaultError, VaultResult, CHUNK_SIZE};
use coffer_crypto::{unwrap_key, wrap_key, KeyPair};
use coffer_storage::{BlobStore, MetadataStore};
use futures::{Stream, StreamExt, TryStreamExt};
use tonic::Status;
use tracing::{error, info, instrument, warn};

use crate::bridge::{chunk_stream, ChunkReader};

/// Server-streaming response body for downloads.
pub type FileStreamResponse = Pin<Box<dyn Stream<Item = Result<FileStream, Status>> + Send>>;

pub struct Vault {
    blobs: Arc<dyn BlobStore>,
    files: Arc<dyn MetadataStore>,
    server_key: Arc<KeyPair>,
}

impl Vault {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        files: Arc<dyn MetadataStore>,
        server_key: Arc<KeyPair>,
    ) -> Self {
        Self {
            blobs,
            files,
            server_key,
        }
    }

    /// The caller's files, without wrapped keys.
    #[instrument(skip_all, fields(login = %session.login))]
    pub async fn list(&self, session: &Session) -> VaultResult<Vec<FileMetadata>> {
        let files = self.files.get_by_login(&session.login).await?;
        Ok(files.iter().map(FileMetadata::without_key).collect())
    }

    /// Receive one file: metadata first, then ciphertext chunks.
    ///
    /// Returns the new file id once both the blob and its metadata are stored.
    #[instrument(skip_all, fields(login = %session.login))]
    pub async fn upload<S>(&self, session: &Session, mut stream: S) -> VaultResult<String>
    where
        S: Stream<Item = Result<FileStream, Status>> + Unpin + Send,
    {
        let info = match stream.next().await {
            Some(Ok(FileStream {
                data: Some(Data::Info(info)),
            })) => info,
            Some(Ok(_)) => {
                return Err(VaultError::InvalidInput(
                    "first upload message must carry file metadata".into(),
                ))
            }
            Some(Err(status)) => {
                return Err(VaultError::InvalidInput(format!(
                    "upload stream failed: {}",
                    status.message()
                )))
            }
            None => return Err(VaultError::InvalidInput("empty upload stream".into())),
        };

        // The key must be addressed to us; the plaintext is dropped right away.
        drop(unwrap_key(&info.encryption_key, &self.server_key)?);

        let mut meta = FileMetadata::from(info);
        meta.login = session.login.clone();
        meta.id = uuid::Uuid::new_v4().to_string();
        if meta.created == 0 {
            meta.created = unix_now();
        }

        let mut reader = ChunkReader::new(stream);
        let written = self.blobs.upload(&meta.id, meta.size, &mut reader).await?;

        if let Err(e) = self.files.add(&meta).await {
            error!(
                id = %meta.id,
                error = %e,
                "blob stored but metadata write failed; blob is orphaned"
            );
            return Err(VaultError::Internal(format!(
                "file {} stored but its metadata could not be saved: {e}",
                meta.id
            )));
        }

        info!(id = %meta.id, bytes = written, "file uploaded");
        Ok(meta.id)
    }

    /// Open a download: metadata with the key re-wrapped for the caller,
    /// followed by the ciphertext in [`CHUNK_SIZE`] chunks.
    #[instrument(skip_all, fields(login = %session.login, id = %id))]
    pub async fn download(&self, session: &Session, id: &str) -> VaultResult<FileStreamResponse> {
        let meta = self.owned(session, id).await?;

        let file_key = unwrap_key(&meta.wrapped_key, &self.server_key)?;
        let rewrapped = wrap_key(&file_key, &session.public_key)?;
        drop(file_key);

        let blob = self.blobs.download(id).await?;

        let mut info = FileInfo::from(meta);
        info.encryption_key = rewrapped;

        let head = futures::stream::once(async move { Ok::<_, Status>(FileStream::info(info)) });
        let body = chunk_stream(blob, CHUNK_SIZE)
            .map_ok(FileStream::chunk)
            .map_err(|e| {
                warn!(error = %e, "blob read failed mid-download");
                Status::internal(format!("reading stored file: {e}"))
            });

        Ok(Box::pin(head.chain(body)))
    }

    /// Remove a file's blob, then its metadata.
    #[instrument(skip_all, fields(login = %session.login, id = %id))]
    pub async fn delete(&self, session: &Session, id: &str) -> VaultResult<()> {
        self.owned(session, id).await?;
        self.blobs.delete(id).await?;
        self.files.delete(id).await?;
        info!("file deleted");
        Ok(())
    }

    async fn owned(&self, session: &Session, id: &str) -> VaultResult<FileMetadata> {
        let meta = self
            .files
            .get_by_id(id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("file {id} not found")))?;
        if meta.login != session.login {
            return Err(VaultError::PermissionDenied(format!(
                "file {id} belongs to another user"
            )));
        }
        Ok(meta)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
