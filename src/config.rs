//! Configuration for the SmartTV daemon
//!
//! Loads configuration from a TOML file. Every key is optional; missing keys
//! fall back to the defaults below, so an empty file is a valid configuration.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! tcp_port = 65432
//! udp_port = 65432
//!
//! [device]
//! total_channels = 120
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Top-level daemon configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listening addresses and enabled transports
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Interface to bind both transports on
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port for session clients
    #[serde(default = "default_port")]
    pub tcp_port: u16,

    /// UDP port for datagram clients (may equal the TCP port)
    #[serde(default = "default_port")]
    pub udp_port: u16,

    #[serde(default = "default_true")]
    pub enable_tcp: bool,

    #[serde(default = "default_true")]
    pub enable_udp: bool,
}

/// Simulated appliance parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// Number of channels, fixed for the lifetime of the daemon
    #[serde(default = "default_total_channels")]
    pub total_channels: u32,
}

/// Per-session tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Maximum bytes requested per receive call
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,

    /// How long the writer waits on an empty mailbox before re-checking
    /// the alive flag (milliseconds)
    #[serde(default = "default_writer_poll_ms")]
    pub writer_poll_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter (trace, debug, info, warn, error); RUST_LOG overrides it
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    65432
}
fn default_true() -> bool {
    true
}
fn default_total_channels() -> u32 {
    120
}
fn default_recv_buffer_size() -> usize {
    128
}
fn default_writer_poll_ms() -> u64 {
    200
}
fn default_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            tcp_port: default_port(),
            udp_port: default_port(),
            enable_tcp: true,
            enable_udp: true,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            total_channels: default_total_channels(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: default_recv_buffer_size(),
            writer_poll_ms: default_writer_poll_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl ServerConfig {
    fn ip(&self) -> Result<IpAddr> {
        self.host
            .parse()
            .map_err(|e| Error::Config(format!("Invalid host '{}': {}", self.host, e)))
    }

    /// Address the stream transport binds to
    pub fn tcp_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.ip()?, self.tcp_port))
    }

    /// Address the datagram transport binds to
    pub fn udp_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.ip()?, self.udp_port))
    }
}

impl SessionConfig {
    pub fn writer_poll(&self) -> Duration {
        Duration::from_millis(self.writer_poll_ms)
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the daemon cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.device.total_channels == 0 {
            return Err(Error::Config(
                "device.total_channels must be at least 1".to_string(),
            ));
        }
        if self.session.recv_buffer_size == 0 {
            return Err(Error::Config(
                "session.recv_buffer_size must be at least 1".to_string(),
            ));
        }
        if self.session.writer_poll_ms == 0 {
            return Err(Error::Config(
                "session.writer_poll_ms must be at least 1".to_string(),
            ));
        }
        if !self.server.enable_tcp && !self.server.enable_udp {
            return Err(Error::Config(
                "at least one of server.enable_tcp / server.enable_udp must be true".to_string(),
            ));
        }
        self.server.ip()?;
        Ok(())
    }
}
