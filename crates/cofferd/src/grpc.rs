//! tonic gRPC server over TCP

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use coffer_auth::TokenAuthority;
use coffer_transfer::{routes, Accounts, Vault};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::{info, warn};

/// Serve the account and vault services on `listen` until Ctrl-C or SIGTERM.
pub async fn serve(
    listen: &str,
    accounts: Arc<Accounts>,
    vault: Arc<Vault>,
    tokens: Arc<TokenAuthority>,
) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid listen address: {listen}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    let bound = listener.local_addr()?;

    let (accounts, vault) = routes(accounts, vault, tokens);

    info!(addr = %bound, "gRPC server ready");

    Server::builder()
        .add_service(accounts)
        .add_service(vault)
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("gRPC server error: {e}"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}
