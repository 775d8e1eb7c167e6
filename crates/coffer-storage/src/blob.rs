//! Encrypted file bodies
//!
//! Blobs are opaque ciphertext keyed by file id. The store never sees keys or
//! plaintext, and never buffers a whole blob: uploads are copied through a
//! fixed buffer into a streaming writer, downloads are handed back as a
//! reader.

use std::pin::Pin;

use async_trait::async_trait;
use opendal::{ErrorKind, Operator, Writer};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{debug, warn};

use crate::error::{Result, StorageError};

/// Read side of a stored blob.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// Multipart chunk size handed to the backend writer
const WRITE_CHUNK: usize = 8 * 1024 * 1024;

/// Copy buffer for upload streams
const COPY_BUF: usize = 64 * 1024;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store exactly `declared_size` bytes read from `source` under `id`.
    ///
    /// A source that ends early or runs long fails with
    /// [`StorageError::SizeMismatch`] and leaves nothing behind.
    async fn upload(
        &self,
        id: &str,
        declared_size: u64,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64>;

    async fn download(&self, id: &str) -> Result<BlobReader>;

    /// Remove a blob. Removing a missing blob is not an error.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// [`BlobStore`] over any OpenDAL operator.
#[derive(Clone)]
pub struct OpendalBlobStore {
    op: Operator,
}

impl OpendalBlobStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }
}

#[async_trait]
impl BlobStore for OpendalBlobStore {
    async fn upload(
        &self,
        id: &str,
        declared_size: u64,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        let mut writer = self.op.writer_with(id).chunk(WRITE_CHUNK).await?;

        match copy_exact(source, &mut writer, declared_size).await {
            Ok(written) => {
                writer.close().await?;
                debug!(id, bytes = written, "blob stored");
                Ok(written)
            }
            Err(e) => {
                if let Err(abort_err) = writer.abort().await {
                    warn!(id, error = %abort_err, "aborting partial blob write failed");
                }
                Err(e)
            }
        }
    }

    async fn download(&self, id: &str) -> Result<BlobReader> {
        match self.op.stat(id).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::BlobNotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        let reader = self.op.reader(id).await?;
        let stream = reader.into_futures_async_read(..).await?;
        Ok(Box::pin(stream.compat()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.op.delete(id).await?;
        Ok(())
    }
}

async fn copy_exact(
    source: &mut (dyn AsyncRead + Send + Unpin),
    writer: &mut Writer,
    declared: u64,
) -> Result<u64> {
    let mut buf = vec![0u8; COPY_BUF];
    let mut total = 0u64;

    loop {
        let n = source.read(&mut buf).await.map_err(StorageError::Source)?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if total > declared {
            return Err(StorageError::SizeMismatch {
                expected: declared,
                actual: total,
            });
        }
        writer.write(buf[..n].to_vec()).await?;
    }

    if total != declared {
        return Err(StorageError::SizeMismatch {
            expected: declared,
            actual: total,
        });
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_store() -> (OpendalBlobStore, Operator) {
        let op = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        (OpendalBlobStore::new(op.clone()), op)
    }

    async fn read_all(mut reader: BlobReader) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_upload_download_delete() {
        let (store, _) = memory_store();
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 253) as u8).collect();

        let written = store
            .upload("f1", data.len() as u64, &mut data.as_slice())
            .await
            .unwrap();
        assert_eq!(written, data.len() as u64);

        let back = read_all(store.download("f1").await.unwrap()).await;
        assert_eq!(back, data);

        store.delete("f1").await.unwrap();
        assert!(matches!(
            store.download("f1").await,
            Err(StorageError::BlobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_blob() {
        let (store, _) = memory_store();
        store.upload("empty", 0, &mut &b""[..]).await.unwrap();
        assert!(read_all(store.download("empty").await.unwrap()).await.is_empty());
    }

    #[tokio::test]
    async fn test_short_stream_leaves_nothing() {
        let (store, op) = memory_store();
        let err = store.upload("short", 10, &mut &b"abc"[..]).await.unwrap_err();

        assert!(matches!(
            err,
            StorageError::SizeMismatch {
                expected: 10,
                actual: 3
            }
        ));
        assert!(!op.exists("short").await.unwrap());
    }

    #[tokio::test]
    async fn test_long_stream_rejected() {
        let (store, op) = memory_store();
        let err = store.upload("long", 2, &mut &b"abcdef"[..]).await.unwrap_err();

        assert!(matches!(err, StorageError::SizeMismatch { expected: 2, .. }));
        assert!(!op.exists("long").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let (store, _) = memory_store();
        assert!(store.delete("never-existed").await.is_ok());
    }
}
