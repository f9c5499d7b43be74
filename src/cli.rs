//! Command line interface for the `loraserver` binary.
//!
//! Kept free of crate-internal types so the build script can render a man
//! page from it.

use clap::Parser;

/// Command line arguments for the `loraserver` binary.
#[derive(Debug, Parser)]
#[command(
    name = "loraserver",
    version,
    about = "LoRaWAN network server uplink core"
)]
pub struct Cli {
    /// Network identifier as six hex digits; its low seven bits prefix every
    /// assigned device address.
    #[arg(long, default_value = "000013")]
    pub net_id: String,

    /// Seconds a session survives without uplinks.
    #[arg(long, default_value_t = 86_400)]
    pub session_ttl_secs: u64,

    /// Milliseconds to wait for copies of a frame from other gateways.
    #[arg(long, default_value_t = 200)]
    pub dedup_window_ms: u64,

    /// Maximum concurrently running workers per pipeline.
    #[arg(long, default_value_t = 256)]
    pub max_in_flight: usize,

    /// Address for the Prometheus scrape endpoint.
    #[arg(long)]
    pub metrics_addr: Option<std::net::SocketAddr>,
}
