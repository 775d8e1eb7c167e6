//! coffer: end-to-end encrypted file vault client
//!
//! Account commands:
//!   register <login>          - create an account and store the session token
//!   login <login>             - start a new session
//!
//! File commands (need a session):
//!   list [--json]             - show your stored files
//!   upload --path <file>      - encrypt and upload a file
//!   download --id <id> --path <dest>
//!   delete --id <id>
//!
//!   config show               - display the active configuration
//!
//! Files are encrypted locally before they leave the machine; the RSA key
//! pair under `client.private_key` is generated on first use.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coffer_core::config::{expand_tilde, CofferConfig};
use coffer_core::types::FileMetadata;
use coffer_crypto::{load_public_key, save_public_key, KeyPair, KeyStore};
use coffer_transfer::{CofferClient, Issued, ProgressFn};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tonic::Code;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "coffer",
    version,
    about = "coffer encrypted file vault client",
    long_about = "coffer: store files on a coffer server, encrypted end to end"
)]
struct Cli {
    /// Path to the coffer configuration file
    #[arg(long, short = 'c', env = "COFFER_CONFIG", default_value = "/etc/coffer/config.toml")]
    config: PathBuf,

    /// Server URL (overrides client.server_url)
    #[arg(long, env = "COFFER_SERVER")]
    server: Option<String>,

    /// Log level for diagnostics on stderr
    #[arg(long, env = "COFFER_LOG", default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an account and start a session
    Register {
        login: String,
        /// Password (prompted for when omitted)
        #[arg(long, env = "COFFER_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Start a new session for an existing account
    ///
    /// Also needed after the client key pair changes: files are re-wrapped
    /// for the key bound into the current session.
    Login {
        login: String,
        /// Password (prompted for when omitted)
        #[arg(long, env = "COFFER_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// List your files
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Encrypt and upload a file
    Upload {
        /// Local file to upload
        #[arg(long)]
        path: PathBuf,
        /// Name to store the file under (default: the local file name)
        #[arg(long)]
        name: Option<String>,
        /// Free-form note kept with the file
        #[arg(long, default_value = "")]
        comment: String,
    },

    /// Download and decrypt a file
    Download {
        /// File id, as shown by `coffer list`
        #[arg(long)]
        id: String,
        /// Local destination path
        #[arg(long)]
        path: PathBuf,
    },

    /// Delete a file from the vault
    Delete {
        #[arg(long)]
        id: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log);
    let config = load_config(&cli.config).await?;
    let server = cli
        .server
        .clone()
        .unwrap_or_else(|| config.client.server_url.clone());

    let result = match cli.command {
        Commands::Register { login, password } => {
            cmd_account(&config, &server, &login, password, AccountAction::Register).await
        }
        Commands::Login { login, password } => {
            cmd_account(&config, &server, &login, password, AccountAction::Login).await
        }
        Commands::List { json } => cmd_list(&config, &server, json).await,
        Commands::Upload {
            path,
            name,
            comment,
        } => cmd_upload(&config, &server, &path, name.as_deref(), &comment).await,
        Commands::Download { id, path } => cmd_download(&config, &server, &id, &path).await,
        Commands::Delete { id } => cmd_delete(&config, &server, &id).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    };

    result.map_err(with_session_hint)
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Point the user at `coffer login` when the server says the session is
/// unusable.
fn with_session_hint(err: anyhow::Error) -> anyhow::Error {
    let code = err
        .chain()
        .find_map(|e| e.downcast_ref::<tonic::Status>())
        .map(tonic::Status::code);
    match code {
        Some(Code::Unauthenticated) => err.context("session missing or expired; run `coffer login`"),
        Some(Code::FailedPrecondition) => {
            err.context("session key no longer matches; run `coffer login` again")
        }
        _ => err,
    }
}

// ── Config and local state ────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<CofferConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(CofferConfig::default())
    }
}

/// Load this client's key pair, creating it on first use.
async fn client_keys(config: &CofferConfig) -> Result<KeyPair> {
    let store = KeyStore::new(
        expand_tilde(&config.client.private_key),
        expand_tilde(&config.client.public_key),
    );
    let bits = config.keys.bits;
    tokio::task::spawn_blocking(move || {
        let fresh = !store.private_path().exists();
        if fresh {
            eprintln!("Generating a {bits}-bit client key pair (one-time)...");
        }
        store
            .load_or_generate(bits)
            .with_context(|| format!("loading client key {}", store.private_path().display()))
    })
    .await?
}

fn save_token(path: &Path, token: &str) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts
        .open(path)
        .with_context(|| format!("writing token file {}", path.display()))?;
    file.write_all(token.as_bytes())?;

    // mode() only applies when the file is created
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

fn load_token(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Ok(_) => anyhow::bail!("token file {} is empty; run `coffer login`", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            anyhow::bail!("not logged in; run `coffer login <name>` first")
        }
        Err(e) => Err(e).with_context(|| format!("reading token file {}", path.display())),
    }
}

/// Connect with the stored session token.
async fn session_client(config: &CofferConfig, server: &str) -> Result<CofferClient> {
    let token = load_token(&expand_tilde(&config.client.token_file))?;
    CofferClient::connect(server, Some(&token)).await
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
        )
        .context("progress bar template")?
        .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

fn progress_for(pb: &ProgressBar) -> ProgressFn {
    let pb = pb.clone();
    Box::new(move |done, total| {
        pb.set_length(total);
        pb.set_position(done);
    })
}

// ── `coffer register` / `coffer login` ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum AccountAction {
    Register,
    Login,
}

async fn cmd_account(
    config: &CofferConfig,
    server: &str,
    login: &str,
    password: Option<String>,
    action: AccountAction,
) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => prompt_password(action == AccountAction::Register)?,
    };
    let keys = client_keys(config).await?;
    let public_pem = keys.public_pem()?;

    let mut client = CofferClient::connect(server, None).await?;
    let Issued {
        token,
        server_public_key,
    } = match action {
        AccountAction::Register => client
            .register(login, &password, &public_pem)
            .await
            .with_context(|| format!("registering {login}"))?,
        AccountAction::Login => client
            .login(login, &password, &public_pem)
            .await
            .with_context(|| format!("logging in as {login}"))?,
    };

    let server_key_path = expand_tilde(&config.client.server_public_key);
    save_public_key(&server_key_path, &server_public_key)
        .context("server sent an unusable public key")?;
    save_token(&expand_tilde(&config.client.token_file), &token)?;

    match action {
        AccountAction::Register => println!("Registered and logged in as {login}"),
        AccountAction::Login => println!("Logged in as {login}"),
    }
    Ok(())
}

fn prompt_password(confirm: bool) -> Result<String> {
    let password = rpassword::prompt_password("Password: ").context("reading password")?;
    if confirm {
        let again = rpassword::prompt_password("Repeat password: ").context("reading password")?;
        if again != password {
            anyhow::bail!("passwords do not match");
        }
    }
    Ok(password)
}

// ── `coffer list` ─────────────────────────────────────────────────────────────

async fn cmd_list(config: &CofferConfig, server: &str, json: bool) -> Result<()> {
    let mut client = session_client(config, server).await?;
    let files = client.list().await.context("listing files")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&files)?);
        return Ok(());
    }

    if files.is_empty() {
        println!("No files stored.");
        return Ok(());
    }
    print!("{}", render_table(&files));
    Ok(())
}

fn render_table(files: &[FileMetadata]) -> String {
    let name_width = files
        .iter()
        .map(|f| f.filename.chars().count())
        .max()
        .unwrap_or(0)
        .max(4);

    let mut out = format!(
        "{:<36}  {:<name_width$}  {:>10}  {:<16}  COMMENT\n",
        "ID", "NAME", "SIZE", "CREATED"
    );
    for f in files {
        out.push_str(&format!(
            "{:<36}  {:<name_width$}  {:>10}  {:<16}  {}\n",
            f.id,
            f.filename,
            fmt_bytes(f.size),
            fmt_created(f.created),
            f.comment
        ));
    }
    out
}

fn fmt_created(unix_secs: u64) -> String {
    i64::try_from(unix_secs)
        .ok()
        .and_then(|s| chrono::DateTime::from_timestamp(s, 0))
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| "-".to_string())
}

// ── `coffer upload` ───────────────────────────────────────────────────────────

async fn cmd_upload(
    config: &CofferConfig,
    server: &str,
    path: &Path,
    name: Option<&str>,
    comment: &str,
) -> Result<()> {
    if !path.is_file() {
        anyhow::bail!("not a file: {}", path.display());
    }
    let server_key_path = expand_tilde(&config.client.server_public_key);
    let server_pem = load_public_key(&server_key_path)
        .context("no server key on record; run `coffer login` first")?;

    let mut client = session_client(config, server).await?;

    let pb = make_progress_bar(0, "upload")?;
    pb.set_message(path.display().to_string());
    let progress = progress_for(&pb);

    let result = client
        .upload(path, name, comment, &server_pem, Some(&progress))
        .await
        .with_context(|| format!("uploading {}", path.display()));

    let id = match result {
        Ok(id) => id,
        Err(e) => {
            pb.abandon_with_message("failed");
            return Err(e);
        }
    };
    pb.finish_with_message("done");
    println!("{id}");
    Ok(())
}

// ── `coffer download` ─────────────────────────────────────────────────────────

async fn cmd_download(config: &CofferConfig, server: &str, id: &str, dest: &Path) -> Result<()> {
    let keys = client_keys(config).await?;
    let mut client = session_client(config, server).await?;

    let pb = make_progress_bar(0, "download")?;
    pb.set_message(dest.display().to_string());
    let progress = progress_for(&pb);

    let result = client
        .download(id, dest, &keys, Some(&progress))
        .await
        .with_context(|| format!("downloading {id}"));

    let meta = match result {
        Ok(meta) => meta,
        Err(e) => {
            pb.abandon_with_message("failed");
            return Err(e);
        }
    };
    pb.finish_with_message("done");
    println!(
        "Downloaded {} ({}) to {}",
        meta.filename,
        fmt_bytes(meta.size),
        dest.display()
    );
    Ok(())
}

// ── `coffer delete` ───────────────────────────────────────────────────────────

async fn cmd_delete(config: &CofferConfig, server: &str, id: &str) -> Result<()> {
    let mut client = session_client(config, server).await?;
    client
        .delete(id)
        .await
        .with_context(|| format!("deleting {id}"))?;
    println!("Deleted {id}");
    Ok(())
}

// ── `coffer config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &CofferConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fmt_bytes() {
        assert_eq!(fmt_bytes(0), "0 B");
        assert_eq!(fmt_bytes(1023), "1023 B");
        assert_eq!(fmt_bytes(250 * 1024), "250.0 KB");
        assert_eq!(fmt_bytes(3 * 1024 * 1024 / 2), "1.5 MB");
    }

    #[test]
    fn test_fmt_created_out_of_range() {
        assert_eq!(fmt_created(u64::MAX), "-");
        assert_eq!(fmt_created(1_700_000_000).len(), "2023-11-14 22:13".len());
    }

    #[test]
    fn test_token_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub/token");

        save_token(&path, "abc.def.ghi").unwrap();
        assert_eq!(load_token(&path).unwrap(), "abc.def.ghi");

        save_token(&path, "new").unwrap();
        assert_eq!(load_token(&path).unwrap(), "new");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_missing_token_asks_for_login() {
        let dir = TempDir::new().unwrap();
        let err = load_token(&dir.path().join("token")).unwrap_err();
        assert!(err.to_string().contains("coffer login"));
    }

    #[test]
    fn test_render_table() {
        let files = vec![FileMetadata {
            id: "0b7c".into(),
            login: "alice".into(),
            filename: "taxes-2025.pdf".into(),
            comment: "scan".into(),
            created: 0,
            size: 2048,
            wrapped_key: Vec::new(),
        }];
        let table = render_table(&files);
        let mut lines = table.lines();
        assert!(lines.next().unwrap().starts_with("ID"));
        let row = lines.next().unwrap();
        assert!(row.contains("taxes-2025.pdf"));
        assert!(row.contains("2.0 KB"));
        assert!(row.ends_with("scan"));
    }

    #[test]
    fn test_session_hint_added_for_expired_session() {
        let err = anyhow::Error::new(tonic::Status::unauthenticated("Unauthorized"))
            .context("listing files");
        let hinted = with_session_hint(err);
        assert!(hinted.to_string().contains("coffer login"));

        let other = with_session_hint(anyhow::anyhow!("disk full"));
        assert_eq!(other.to_string(), "disk full");
    }

    #[test]
    fn test_parse_upload_args() {
        let cli = Cli::try_parse_from([
            "coffer", "upload", "--path", "a.txt", "--comment", "note",
        ])
        .unwrap();
        match cli.command {
            Commands::Upload {
                path,
                name,
                comment,
            } => {
                assert_eq!(path, PathBuf::from("a.txt"));
                assert!(name.is_none());
                assert_eq!(comment, "note");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
