//! Client side of the protocol
//!
//! Encryption and decryption happen here and only here: uploads leave the
//! machine as ChaCha20 ciphertext under a fresh [`FileKey`](coffer_crypto::FileKey)
//! wrapped for the server, and downloads are decrypted chunk by chunk into a
//! `.part` file that is renamed into place once complete.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use coffer_auth::{read_token, BearerToken};
use coffer_core::proto::{
    accounts_client::AccountsClient, file_stream::Data, vault_client::VaultClient, Credentials,
    Empty, FileId, FileInfo, FileStream,
};
use coffer_core::types::FileMetadata;
use coffer_core::CHUNK_SIZE;
use coffer_crypto::{generate_file_key, unwrap_key, wrap_key, FileCipher, KeyPair};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_stream::wrappers::ReceiverStream;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, warn};

use crate::accounts::Issued;
use crate::bridge::chunk_stream;

/// Called with `(bytes_done, bytes_total)` as a transfer advances.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Upload messages in flight between the file reader and the transport.
const UPLOAD_QUEUE: usize = 4;

pub struct CofferClient {
    channel: Channel,
    accounts: AccountsClient<Channel>,
    vault: VaultClient<InterceptedService<Channel, BearerToken>>,
}

impl CofferClient {
    /// Connect to `url`, presenting `token` on vault calls if one is given.
    pub async fn connect(url: &str, token: Option<&str>) -> Result<Self> {
        let channel = Endpoint::from_shared(url.to_string())
            .with_context(|| format!("invalid server url: {url}"))?
            .connect()
            .await
            .with_context(|| format!("connecting to {url}"))?;
        debug!(url, "connected");

        let bearer = match token {
            Some(t) => BearerToken::new(t).context("stored token is unusable")?,
            None => BearerToken::none(),
        };
        Ok(Self {
            accounts: AccountsClient::new(channel.clone()),
            vault: VaultClient::with_interceptor(channel.clone(), bearer),
            channel,
        })
    }

    /// Use `token` for all subsequent vault calls.
    pub fn set_token(&mut self, token: &str) -> Result<()> {
        let bearer = BearerToken::new(token).context("issued token is unusable")?;
        self.vault = VaultClient::with_interceptor(self.channel.clone(), bearer);
        Ok(())
    }

    pub async fn register(&mut self, login: &str, password: &str, public_pem: &str) -> Result<Issued> {
        let resp = self
            .accounts
            .register(credentials(login, password, public_pem))
            .await?;
        self.adopt(resp)
    }

    pub async fn login(&mut self, login: &str, password: &str, public_pem: &str) -> Result<Issued> {
        let resp = self
            .accounts
            .login(credentials(login, password, public_pem))
            .await?;
        self.adopt(resp)
    }

    fn adopt(&mut self, resp: tonic::Response<coffer_core::proto::ServerKey>) -> Result<Issued> {
        let token = read_token(&resp).context("server issued no token")?;
        self.set_token(&token)?;
        Ok(Issued {
            token,
            server_public_key: resp.into_inner().public_key,
        })
    }

    pub async fn list(&mut self) -> Result<Vec<FileMetadata>> {
        let files = self.vault.get_user_files(Empty {}).await?.into_inner().files;
        Ok(files.into_iter().map(FileMetadata::from).collect())
    }

    /// Encrypt and upload the file at `path`, returning its new id.
    pub async fn upload(
        &mut self,
        path: &Path,
        name: Option<&str>,
        comment: &str,
        server_pem: &[u8],
        progress: Option<&ProgressFn>,
    ) -> Result<String> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        let size = file
            .metadata()
            .await
            .with_context(|| format!("reading metadata of {}", path.display()))?
            .len();

        let filename = match name {
            Some(n) => n.to_string(),
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .with_context(|| format!("{} has no file name", path.display()))?,
        };

        let key = generate_file_key()?;
        let info = FileInfo {
            filename,
            comment: comment.to_string(),
            created: unix_now(),
            size,
            encryption_key: wrap_key(&key, server_pem).context("wrapping file key for server")?,
            ..Default::default()
        };
        let mut cipher = FileCipher::new(&key);
        drop(key);

        let (tx, rx) = tokio::sync::mpsc::channel::<FileStream>(UPLOAD_QUEUE);

        let pump = async move {
            if tx.send(FileStream::info(info)).await.is_err() {
                return Ok(());
            }
            let mut chunks = std::pin::pin!(chunk_stream(file, CHUNK_SIZE));
            let mut sent = 0u64;
            while let Some(chunk) = chunks.next().await {
                let plain = chunk.with_context(|| format!("reading {}", path.display()))?;
                let sealed = cipher.encrypt_chunk(&plain)?;
                sent += sealed.len() as u64;
                // The call has already ended; its own result carries the reason.
                if tx.send(FileStream::chunk(sealed)).await.is_err() {
                    break;
                }
                if let Some(report) = progress {
                    report(sent, size);
                }
            }
            Ok::<_, anyhow::Error>(())
        };

        let call = async {
            let resp = self
                .vault
                .upload_file(ReceiverStream::new(rx))
                .await
                .context("upload rejected")?;
            Ok::<_, anyhow::Error>(resp.into_inner())
        };

        let ((), resp) = tokio::try_join!(pump, call)?;
        let id = resp.id.map(|f| f.id).context("server returned no file id")?;
        Ok(id)
    }

    /// Download file `id` into `dest`, decrypting with `own`.
    pub async fn download(
        &mut self,
        id: &str,
        dest: &Path,
        own: &KeyPair,
        progress: Option<&ProgressFn>,
    ) -> Result<FileMetadata> {
        let mut stream = self
            .vault
            .download_file(FileId { id: id.to_string() })
            .await?
            .into_inner();

        let info = match stream.message().await? {
            Some(FileStream {
                data: Some(Data::Info(info)),
            }) => info,
            _ => bail!("server did not send file metadata first"),
        };
        let key = unwrap_key(&info.encryption_key, own)
            .context("file key is not addressed to this client; log in again")?;
        let mut cipher = FileCipher::new(&key);
        drop(key);

        let part = part_path(dest);
        let result = async {
            let mut out = tokio::fs::File::create(&part)
                .await
                .with_context(|| format!("creating {}", part.display()))?;
            let mut received = 0u64;
            while let Some(msg) = stream.message().await? {
                let chunk = match msg.data {
                    Some(Data::ChunkData(c)) => c,
                    _ => bail!("unexpected metadata in the middle of the download"),
                };
                let plain = cipher.decrypt_chunk(&chunk)?;
                out.write_all(&plain)
                    .await
                    .with_context(|| format!("writing {}", part.display()))?;
                received += plain.len() as u64;
                if let Some(report) = progress {
                    report(received, info.size);
                }
            }
            if received != info.size {
                bail!("download truncated: got {received} of {} bytes", info.size);
            }
            out.flush().await?;
            out.sync_all().await?;
            tokio::fs::rename(&part, dest)
                .await
                .with_context(|| format!("moving download into {}", dest.display()))?;
            Ok::<(), anyhow::Error>(())
        }
        .await;

        if let Err(e) = result {
            if let Err(rm) = tokio::fs::remove_file(&part).await {
                warn!(path = %part.display(), error = %rm, "could not remove partial download");
            }
            return Err(e);
        }

        Ok(FileMetadata::from(info).without_key())
    }

    pub async fn delete(&mut self, id: &str) -> Result<()> {
        self.vault.delete_file(FileId { id: id.to_string() }).await?;
        Ok(())
    }
}

fn credentials(login: &str, password: &str, public_pem: &str) -> Credentials {
    Credentials {
        login: login.to_string(),
        password: password.to_string(),
        public_key: public_pem.as_bytes().to_vec(),
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
