//! Runtime configuration
//!
//! Capacities are protocol constants (see `types`); only deployment knobs
//! live here. The server reads its bind address from the first CLI argument
//! and the rest from the environment.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;
use crate::types::VERSION_CODE;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:7777";

/// Default directory for user records
pub const DEFAULT_DATA_DIR: &str = "./users";

/// Default coalescing flush period in milliseconds
pub const DEFAULT_FLUSH_MS: u64 = 50;

/// Per-user outbound queue depth between the server actor and the writer task
pub const DEFAULT_OUTBOUND_QUEUE: usize = 512;

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "DROCSID_DATA_DIR";

/// Environment variable overriding the flush period
pub const FLUSH_MS_ENV: &str = "DROCSID_FLUSH_MS";

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    /// Version string clients must present in their handshake
    pub version: String,
    pub flush_interval: Duration,
    pub outbound_queue: usize,
}

/// The per-connection subset of `ServerConfig`
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub flush_interval: Duration,
    pub outbound_queue: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_MS),
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

impl ServerConfig {
    /// Build from the process arguments and environment
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_parts(
            env::args().nth(1),
            env::var(DATA_DIR_ENV).ok(),
            env::var(FLUSH_MS_ENV).ok(),
        )
    }

    /// Build from raw optional values, falling back to defaults
    pub fn from_parts(
        bind_addr: Option<String>,
        data_dir: Option<String>,
        flush_ms: Option<String>,
    ) -> Result<Self, AppError> {
        let bind_addr = bind_addr.unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let bind_addr = bind_addr
            .parse::<SocketAddr>()
            .map_err(|e| AppError::Config(format!("bind address '{}': {}", bind_addr, e)))?;

        let flush_ms = match flush_ms {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => ms,
                _ => return Err(AppError::Config(format!("{} '{}'", FLUSH_MS_ENV, raw))),
            },
            None => DEFAULT_FLUSH_MS,
        };

        Ok(Self {
            bind_addr,
            data_dir: PathBuf::from(data_dir.unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())),
            version: VERSION_CODE.to_string(),
            flush_interval: Duration::from_millis(flush_ms),
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        })
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            flush_interval: self.flush_interval,
            outbound_queue: self.outbound_queue,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7777)),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            version: VERSION_CODE.to_string(),
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_MS),
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    pub version: String,
}

impl ClientConfig {
    /// Server address from the first CLI argument
    pub fn from_env() -> Self {
        Self::new(env::args().nth(1))
    }

    pub fn new(server_addr: Option<String>) -> Self {
        Self {
            server_addr: server_addr.unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            version: VERSION_CODE.to_string(),
        }
    }
}
