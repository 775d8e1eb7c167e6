//! tonic service implementations
//!
//! `Accounts` is served as-is; `Vault` is always wrapped in a
//! [`SessionGuard`], so no file operation runs without a verified session.

use std::sync::Arc;
use std::time::Instant;

use coffer_auth::{attach_token, Session, SessionGuard, TokenAuthority};
use coffer_core::proto::{
    accounts_server::{Accounts as AccountsRpc, AccountsServer},
    vault_server::{Vault as VaultRpc, VaultServer},
    Credentials, Empty, FileId, FileList, FileStream, ServerKey, UploadResponse,
};
use coffer_core::VaultResult;
use tonic::service::interceptor::InterceptedService;
use tonic::{Request, Response, Status, Streaming};
use tracing::{info, warn};

use crate::accounts::{Accounts, Issued};
use crate::protocol::{FileStreamResponse, Vault};

/// Log one handled call and convert its outcome to a gRPC result.
fn finish<T>(method: &str, started: Instant, result: VaultResult<T>) -> Result<T, Status> {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(v) => {
            info!(method, elapsed_ms, "call ok");
            Ok(v)
        }
        Err(e) => {
            warn!(method, elapsed_ms, error = %e, "call failed");
            Err(e.into())
        }
    }
}

pub struct AccountsService {
    accounts: Arc<Accounts>,
}

impl AccountsService {
    pub fn new(accounts: Arc<Accounts>) -> Self {
        Self { accounts }
    }

    fn respond(issued: Issued) -> Result<Response<ServerKey>, Status> {
        let mut resp = Response::new(ServerKey {
            public_key: issued.server_public_key,
        });
        attach_token(&mut resp, &issued.token)?;
        Ok(resp)
    }
}

#[tonic::async_trait]
impl AccountsRpc for AccountsService {
    async fn register(&self, req: Request<Credentials>) -> Result<Response<ServerKey>, Status> {
        let started = Instant::now();
        let creds = req.into_inner();
        let result = self
            .accounts
            .register(&creds.login, &creds.password, creds.public_key)
            .await;
        Self::respond(finish("Register", started, result)?)
    }

    async fn login(&self, req: Request<Credentials>) -> Result<Response<ServerKey>, Status> {
        let started = Instant::now();
        let creds = req.into_inner();
        let result = self
            .accounts
            .login(&creds.login, &creds.password, creds.public_key)
            .await;
        Self::respond(finish("Login", started, result)?)
    }
}

pub struct VaultService {
    vault: Arc<Vault>,
}

impl VaultService {
    pub fn new(vault: Arc<Vault>) -> Self {
        Self { vault }
    }
}

#[tonic::async_trait]
impl VaultRpc for VaultService {
    async fn get_user_files(&self, req: Request<Empty>) -> Result<Response<FileList>, Status> {
        let started = Instant::now();
        let session = Session::from_request(&req)?;
        let files = finish("GetUserFiles", started, self.vault.list(&session).await)?;
        Ok(Response::new(FileList {
            files: files.into_iter().map(Into::into).collect(),
        }))
    }

    async fn upload_file(
        &self,
        req: Request<Streaming<FileStream>>,
    ) -> Result<Response<UploadResponse>, Status> {
        let started = Instant::now();
        let session = Session::from_request(&req)?;
        let result = self.vault.upload(&session, req.into_inner()).await;
        let id = finish("UploadFile", started, result)?;
        Ok(Response::new(UploadResponse {
            id: Some(FileId { id }),
        }))
    }

    type DownloadFileStream = FileStreamResponse;

    async fn download_file(
        &self,
        req: Request<FileId>,
    ) -> Result<Response<Self::DownloadFileStream>, Status> {
        let started = Instant::now();
        let session = Session::from_request(&req)?;
        let id = req.into_inner().id;
        let stream = finish("DownloadFile", started, self.vault.download(&session, &id).await)?;
        Ok(Response::new(stream))
    }

    async fn delete_file(&self, req: Request<FileId>) -> Result<Response<Empty>, Status> {
        let started = Instant::now();
        let session = Session::from_request(&req)?;
        let id = req.into_inner().id;
        finish("DeleteFile", started, self.vault.delete(&session, &id).await)?;
        Ok(Response::new(Empty {}))
    }
}

/// Both services, ready for `Server::builder().add_service(..)`.
pub fn routes(
    accounts: Arc<Accounts>,
    vault: Arc<Vault>,
    tokens: Arc<TokenAuthority>,
) -> (
    AccountsServer<AccountsService>,
    InterceptedService<VaultServer<VaultService>, SessionGuard>,
) {
    (
        AccountsServer::new(AccountsService::new(accounts)),
        VaultServer::with_interceptor(VaultService::new(vault), SessionGuard::new(tokens)),
    )
}
