//! Public API for the `loraserver` library.
//!
//! This crate provides the uplink core of a LoRaWAN network server: it
//! authenticates and decrypts frames received by gateways against per-device
//! session state, activates devices, forwards application payloads and MAC
//! commands, and queues outbound traffic for the downlink path.

pub mod backend;
pub mod collect;
pub mod config;
pub mod context;
pub mod device_lock;
pub mod error;
pub mod lorawan;
pub mod metrics;
pub mod models;
pub mod processor;
pub mod server;
pub mod storage;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::ServerConfig;
pub use context::{Backends, Context, Stores};
pub use error::ProcessingError;
pub use server::{NetworkServer, RunningServer, ShutdownError};
