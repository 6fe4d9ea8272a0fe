//! SmartTV-IO daemon
//!
//! ## Protocol Architecture
//!
//! - **TCP (port 65432)**: Sessions; one command per line, replies and
//!   notifications written in order per client
//! - **UDP (port 65432)**: One command per datagram; senders are remembered and
//!   receive notifications best-effort

use smarttv_io::error::{Error, Result};
use smarttv_io::transport::{DatagramTransport, StreamTransport};
use smarttv_io::{Config, Server};
use std::env;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

/// Config file picked up from the working directory when no path is given
const DEFAULT_CONFIG_PATH: &str = "smarttv.toml";

/// Parse config path from command line arguments.
///
/// Supports:
/// - `smarttv-io <path>` (positional)
/// - `smarttv-io --config <path>` (flag-based)
/// - `smarttv-io -c <path>` (short flag)
fn parse_config_path() -> Option<String> {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return Some(args[1].clone());
    }

    None
}

fn load_config() -> Result<(Config, Option<String>)> {
    match parse_config_path() {
        Some(path) => Ok((Config::load(&path)?, Some(path))),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Ok((
            Config::load(DEFAULT_CONFIG_PATH)?,
            Some(DEFAULT_CONFIG_PATH.to_string()),
        )),
        None => Ok((Config::default(), None)),
    }
}

fn main() -> Result<()> {
    let (config, config_path) = load_config()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("SmartTV-IO v{} starting...", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => log::info!("Using config: {}", path),
        None => log::info!("Using default configuration"),
    }
    log::info!("Device: {} channels", config.device.total_channels);

    let server = Server::new(&config)?;

    let running = server.running_flag();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    // Bind everything first so a bind failure exits before any thread starts
    let tcp = if config.server.enable_tcp {
        Some(StreamTransport::bind(config.server.tcp_addr()?)?)
    } else {
        None
    };
    let udp = if config.server.enable_udp {
        Some(DatagramTransport::bind(config.server.udp_addr()?)?)
    } else {
        None
    };

    let mut handles = Vec::new();
    if let Some(tcp) = tcp {
        handles.push(server.serve(tcp)?);
    }
    if let Some(udp) = udp {
        handles.push(server.serve(udp)?);
    }

    log::info!("SmartTV-IO running. Press Ctrl-C to stop.");
    while server.is_running() {
        thread::sleep(Duration::from_millis(100));
    }

    log::info!("Shutting down...");
    server.shutdown();
    for handle in handles {
        if handle.join().is_err() {
            log::error!("Transport thread panicked");
        }
    }

    log::info!("SmartTV-IO stopped");
    Ok(())
}
