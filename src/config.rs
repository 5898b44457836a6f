//! Configuration file and command line.
//!
//! The configuration is TOML with two sections; keys are frozen:
//!
//! ```toml
//! [Server]
//! port = 5468
//! ip = "0.0.0.0"
//!
//! [file_backend]
//! file-directory = "/var/tmp/cdpfgl/server"
//! dir-level = 2
//! ```
//!
//! A missing file yields the built-in defaults; a present-but-invalid file
//! aborts startup.  `--port` on the command line overrides the file.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 5468;
pub const DEFAULT_IP: &str = "0.0.0.0";
pub const DEFAULT_PREFIX: &str = "/var/tmp/cdpfgl/server";
pub const DEFAULT_DIR_LEVEL: usize = 2;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid listen address {0}")]
    BadAddress(String),
}

// ── Command line ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "stashd", version, about = "Content-addressed backup server")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short = 'c', long = "configuration", value_name = "PATH")]
    pub configuration: Option<PathBuf>,

    /// Listen port (overrides the configuration file)
    #[arg(short = 'p', long, value_name = "N")]
    pub port: Option<u16>,

    /// Debug logging: 0 = off, 1 = on
    #[arg(short = 'd', long, value_name = "0|1", default_value_t = 0,
          value_parser = clap::value_parser!(u8).range(0..=1))]
    pub debug: u8,
}

// ── Configuration file ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "Server", default)]
    pub server: ServerSection,
    #[serde(rename = "file_backend", default)]
    pub file_backend: FileBackendSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            file_backend: FileBackendSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_ip")]
    pub ip: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            ip: DEFAULT_IP.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileBackendSection {
    #[serde(rename = "file-directory", default = "default_prefix")]
    pub file_directory: PathBuf,
    #[serde(rename = "dir-level", default = "default_dir_level")]
    pub dir_level: usize,
}

impl Default for FileBackendSection {
    fn default() -> Self {
        Self {
            file_directory: default_prefix(),
            dir_level: DEFAULT_DIR_LEVEL,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_ip() -> String {
    DEFAULT_IP.to_owned()
}
fn default_prefix() -> PathBuf {
    PathBuf::from(DEFAULT_PREFIX)
}
fn default_dir_level() -> usize {
    DEFAULT_DIR_LEVEL
}

impl Config {
    /// Load from `path`, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Resolve the bind address, with an optional CLI port override.
    pub fn listen_addr(&self, port_override: Option<u16>) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .server
            .ip
            .parse()
            .map_err(|_| ConfigError::BadAddress(self.server.ip.clone()))?;
        Ok(SocketAddr::new(ip, port_override.unwrap_or(self.server.port)))
    }
}
