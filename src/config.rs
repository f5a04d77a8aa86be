//! Server and client settings, loadable from TOML.
//!
//! Command-line flags override whatever the file says; a missing file means
//! defaults.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::{timeouts, DEFAULT_PORT};

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(appdata) = std::env::var("APPDATA") { return PathBuf::from(appdata).join("Foldershare"); }
    }
    // Unix-like default
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config").join("foldershare");
    }
    PathBuf::from(".foldershare")
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind (the port is separate)
    pub bind: String,
    pub port: u16,
    /// Root directory exposed to clients; created if missing
    pub shared_folder: PathBuf,
    /// Socket read/write timeout per session; None or 0 blocks forever
    pub io_timeout_ms: Option<u64>,
    /// Append server events to this file
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            shared_folder: PathBuf::from("shared"),
            io_timeout_ms: None,
            log_file: None,
        }
    }
}

impl ServerConfig {
    pub fn io_timeout(&self) -> Option<Duration> {
        timeouts::io_timeout(self.io_timeout_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: Option<u64>,
    /// Where `get` writes files when no destination is given
    pub download_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: timeouts::CONNECT_MS,
            io_timeout_ms: None,
            download_dir: PathBuf::from("."),
        }
    }
}

impl ClientConfig {
    pub fn io_timeout(&self) -> Option<Duration> {
        timeouts::io_timeout(self.io_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        timeouts::io_timeout(Some(self.connect_timeout_ms))
    }
}

pub fn load<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match std::fs::read_to_string(path) {
        Ok(data) => toml::from_str(&data).with_context(|| format!("parse {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
    }
}

pub fn save<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&dir).ok();
    let data = toml::to_string(value)?;
    // atomic write
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(data.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}
