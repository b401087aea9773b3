// src/config.rs

//! Manages configuration: loading from TOML, defaults and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Top-level configuration of the master process.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

/// How the master spawns and tears down session servers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Session `n` listens on `base_port + n`. `0` lets the OS assign ports.
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// Period of each session's tick task.
    #[serde(with = "humantime_serde", default = "default_tick_interval")]
    pub tick_interval: Duration,
    /// How long `nuke`/`stop` wait for a session to confirm it has stopped.
    #[serde(with = "humantime_serde", default = "default_stop_timeout")]
    pub stop_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_port: default_base_port(),
            tick_interval: default_tick_interval(),
            stop_timeout: default_stop_timeout(),
        }
    }
}

/// Optional certificate/key pair for the master's control endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TlsConfig {
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

impl TlsConfig {
    /// Both paths, if both are set.
    pub fn paths(&self) -> Option<(&Path, &Path)> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }
}

/// Defaults for [`crate::client::ClientConnection`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Fixed wait between closing a failed connection and reconnecting.
    #[serde(with = "humantime_serde", default = "default_reconnect_delay")]
    pub reconnect_delay: Duration,
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    /// Give up after this many failed reconnect attempts. Unbounded if unset.
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: default_reconnect_delay(),
            connect_timeout: default_connect_timeout(),
            max_reconnect_attempts: None,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    8765
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_base_port() -> u16 {
    9000
}
fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}
fn default_stop_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_reconnect_delay() -> Duration {
    Duration::from_secs(5)
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            session: SessionConfig::default(),
            tls: TlsConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{}'", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to load config from '{}'", path.display()))
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.session.tick_interval.is_zero() {
            return Err(anyhow!("session.tick_interval cannot be 0"));
        }
        if self.session.stop_timeout.is_zero() {
            return Err(anyhow!("session.stop_timeout cannot be 0"));
        }
        if self.client.max_reconnect_attempts == Some(0) {
            return Err(anyhow!(
                "client.max_reconnect_attempts must be at least 1 when set"
            ));
        }
        if self.session.base_port != 0 && self.session.base_port == self.port {
            warn!(
                "session.base_port equals the master port; the first session will fail to bind."
            );
        }
        if self.tls.cert_path.is_some() != self.tls.key_path.is_some() {
            warn!("Only one of tls.cert_path and tls.key_path is set; TLS will stay disabled.");
        }
        Ok(())
    }
}
