//! SmartTV-IO - Remote-control daemon for a simulated smart TV
//!
//! Clients control one shared TV with short text commands ("turn on",
//! "channel set 5") over two transports:
//!
//! - **TCP**: long-lived sessions, one command per line, replies in order
//! - **UDP**: one command per datagram, one reply datagram, no session
//!
//! Channel changes are pushed to every other known client as a notification.

pub mod config;
pub mod device;
pub mod error;
pub mod protocol;
pub mod router;
pub mod server;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use device::SmartTv;
pub use error::{Error, Result};
pub use server::Server;
