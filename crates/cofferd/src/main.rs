//! cofferd: coffer vault server
//!
//! Usage:
//!   cofferd [--config /etc/coffer/config.toml] [--log info] [--log-format json|text]
//!
//! The token signing secret comes from `auth.secret_key` or, preferably, the
//! `COFFER_SECRET_KEY` environment variable.

mod daemon;
mod grpc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use coffer_core::config::CofferConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "cofferd", version, about = "coffer end-to-end encrypted file vault server")]
struct Cli {
    /// Path to the coffer configuration file
    #[arg(
        long,
        short = 'c',
        env = "COFFER_CONFIG",
        default_value = "/etc/coffer/config.toml"
    )]
    config: PathBuf,

    /// Log level or filter directive (overrides server.log_level)
    #[arg(long, env = "COFFER_LOG")]
    log: Option<String>,

    /// Log format (overrides server.log_format)
    #[arg(long, env = "COFFER_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config comes first so its log settings apply; a missing file is
    // reported once logging is up.
    let loaded = load_config(&cli.config).await?;
    let found = loaded.is_some();
    let config = loaded.unwrap_or_default();

    let level = cli.log.as_deref().unwrap_or(&config.server.log_level);
    let format = cli
        .log_format
        .or_else(|| LogFormat::from_str(&config.server.log_format, true).ok())
        .unwrap_or(LogFormat::Text);
    init_logging(level, format);

    if !found {
        warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "cofferd starting"
    );

    daemon::run(config).await
}

/// Read and parse the config file; `None` if it does not exist.
async fn load_config(path: &Path) -> Result<Option<CofferConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = toml::from_str(&content)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(Some(config))
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
