//! SFTP Server Binary
//!
//! NIST 800-53: AU-2 (Audit Events), AU-12 (Audit Generation)
//! Implementation: Loads configuration, sets up logging and runs the server
//!
//! Run with: cargo run --bin burrow-sftp-server

use anyhow::{Context, Result};
use burrow_sftp::{Config, LogFormat, Server};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory exposed to clients as `/`
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Host key path
    #[arg(long)]
    host_key: Option<PathBuf>,

    /// Verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,

    /// Log format (json or text)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Log file path
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    /// Command line flags take precedence over file and environment
    fn apply(self, config: &mut Config) {
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(root) = self.root {
            config.root_dir = root;
        }
        if let Some(host_key) = self.host_key {
            config.host_key_path = host_key;
        }
        if let Some(log_format) = self.log_format {
            config.logging.format = log_format;
        }
        if let Some(log_file) = self.log_file {
            config.logging.file = Some(log_file);
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    config
        .apply_env()
        .context("Invalid SFTP_* environment variable")?;
    args.apply(&mut config);

    let _log_guard = init_logging(&config)?;

    info!(
        event = "server_starting",
        version = env!("CARGO_PKG_VERSION"),
        "Starting Burrow SFTP Server"
    );

    info!(
        event = "server_configuration",
        bind_address = %config.bind_address,
        port = config.port,
        root_dir = ?config.root_dir,
        users = config.users.len(),
        timeout_secs = config.timeout,
        max_packet_size = config.max_packet_size,
        max_open_handles = config.max_open_handles,
        log_format = ?config.logging.format,
        log_file = ?config.logging.file,
        "SFTP Server Configuration"
    );

    let server = Server::new(config)
        .await
        .context("Failed to create server")?;

    info!(event = "server_running", "SFTP server is now accepting connections");
    server.run().await.context("Server encountered an error")?;

    info!(event = "server_shutdown", "SFTP server shutdown complete");
    Ok(())
}

/// Install the global subscriber; the returned guard flushes file logs on drop
///
/// NIST 800-53: AU-12 (Audit Generation)
fn init_logging(config: &Config) -> Result<Option<WorkerGuard>> {
    let filter = || EnvFilter::new(config.logging.level.clone());

    let Some(log_file) = &config.logging.file else {
        match config.logging.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter())
                .with_current_span(true)
                .with_span_list(true)
                .init(),
            LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter()).init(),
        }
        return Ok(None);
    };

    let directory = log_file
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let file_name = log_file
        .file_name()
        .with_context(|| format!("Log file {:?} has no file name", log_file))?;

    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory {:?}", directory))?;

    let file_appender = tracing_appender::rolling::daily(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    match config.logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter())
            .with_writer(non_blocking)
            .with_current_span(true)
            .with_span_list(true)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(non_blocking)
            .with_ansi(false)
            .init(),
    }

    Ok(Some(guard))
}
