// src/server/initialization.rs

//! Prepares everything the master needs before it starts accepting control
//! connections: TLS material, the listening socket and the orchestrator.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::orchestrator::Orchestrator;
use anyhow::{Context, Result, anyhow};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::{TlsAcceptor, rustls};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Initializes all master components before starting the main loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);

    let acceptor = setup_tls(&config);

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind main server to {}:{}", config.host, config.port))?;

    let orchestrator = Arc::new(Orchestrator::new(config.host.clone(), config.session.clone()));
    info!("Orchestrator initialized.");

    Ok(ServerContext {
        orchestrator,
        listener,
        acceptor,
        shutdown: CancellationToken::new(),
    })
}

/// Builds a TLS acceptor if a certificate/key pair is configured.
///
/// Failing to load the pair is not fatal: the master logs the reason and
/// serves plain TCP instead.
pub fn setup_tls(config: &Config) -> Option<TlsAcceptor> {
    let (cert_path, key_path) = config.tls.paths()?;
    match load_acceptor(cert_path, key_path) {
        Ok(acceptor) => {
            info!("TLS context loaded successfully.");
            Some(acceptor)
        }
        Err(e) => {
            error!("Failed to load TLS context: {:#}", e);
            warn!("The main server will run without TLS.");
            None
        }
    }
}

fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;
    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Loads TLS certificates from a PEM file.
fn load_certs(path: &Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let cert_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open certificate file '{}': {}", path.display(), e))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(anyhow!("No certificates found in '{}'", path.display()));
    }
    Ok(certs)
}

/// Loads a private key from a PEM file.
fn load_key(path: &Path) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let key_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open private key file '{}': {}", path.display(), e))?;
    let mut key_reader = BufReader::new(key_file);
    rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| anyhow!("No private key found in key file '{}'", path.display()))
}

fn log_startup_info(config: &Config) {
    if config.session.base_port == 0 {
        info!("Sessions will listen on OS-assigned ports.");
    } else {
        info!(
            "Sessions will listen on ports starting at {}.",
            config.session.base_port
        );
    }
    info!(
        "Session tick interval {:?}, stop timeout {:?}.",
        config.session.tick_interval, config.session.stop_timeout
    );
}
