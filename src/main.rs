// src/main.rs

//! The main entry point for the partyline master server.

use anyhow::Result;
use clap::Parser;
use partyline::config::Config;
use partyline::server;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::filter::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "partyline")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Spawns and routes to ephemeral echo session servers")]
struct Cli {
    /// Address to bind the master to (defaults to localhost)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind the master to (defaults to 8765)
    #[arg(long)]
    port: Option<u16>,

    /// PEM certificate for TLS on the master port
    #[arg(long)]
    cert: Option<PathBuf>,

    /// PEM private key for TLS on the master port
    #[arg(long)]
    key: Option<PathBuf>,

    /// Optional TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Session `n` listens on `base_port + n`; 0 lets the OS choose
    #[arg(long)]
    base_port: Option<u16>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(base_port) = self.base_port {
            config.session.base_port = base_port;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }
        // Flags replace the configured pair as a whole.
        if self.cert.is_some() || self.key.is_some() {
            config.tls.cert_path = self.cert;
            config.tls.key_path = self.key;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match Config::from_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load configuration from \"{}\": {e:#}", path.display());
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    cli.apply(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e:#}");
        std::process::exit(1);
    }

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .with_ansi(true)
        .init();

    if let Err(e) = server::run(config).await {
        error!("Server runtime error: {:#}", e);
        return Err(e);
    }
    Ok(())
}
