//! Network server binary wired to in-memory stores and channel backends.
//!
//! Runs until Ctrl+C. The registry starts empty and nothing feeds the
//! channel handles, so this server never processes a frame. It is a smoke
//! test for configuration and the metrics endpoint; deployments embed the
//! library with their own stores and backends.

mod cli;

use std::{error::Error, sync::Arc, time::Duration};

use clap::Parser;
use loraserver::{
    Backends,
    Context,
    NetworkServer,
    ServerConfig,
    Stores,
    backend::{ChannelApplication, ChannelController, ChannelGateway},
    lorawan::NetId,
    storage::{MemoryNodeRegistry, MemoryQueueStore, MemorySessionStore},
};

const CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    let net_id: NetId = cli.net_id.parse()?;

    #[cfg(feature = "metrics")]
    if let Some(addr) = cli.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        tracing::info!(%addr, "metrics endpoint listening");
    }
    #[cfg(not(feature = "metrics"))]
    if cli.metrics_addr.is_some() {
        tracing::warn!("metrics support not compiled in; ignoring --metrics-addr");
    }

    let config = ServerConfig::new(net_id)
        .with_dedup_window(Duration::from_millis(cli.dedup_window_ms))
        .with_max_in_flight(cli.max_in_flight);
    let stores = Stores {
        registry: Arc::new(MemoryNodeRegistry::new()),
        sessions: Arc::new(MemorySessionStore::new(
            net_id,
            Duration::from_secs(cli.session_ttl_secs),
        )),
        queues: Arc::new(MemoryQueueStore::new()),
    };
    // Unused handles; held only so the inbound channels stay open.
    let (gateway, _gateway_handle) = ChannelGateway::new(CHANNEL_CAPACITY);
    let (application, _application_handle) = ChannelApplication::new(CHANNEL_CAPACITY);
    let (controller, _controller_handle) = ChannelController::new(CHANNEL_CAPACITY);
    let backends = Backends {
        gateway: Arc::new(gateway),
        application: Arc::new(application),
        controller: Arc::new(controller),
    };

    NetworkServer::new(Context::new(config, stores, backends))
        .run()
        .await?;
    Ok(())
}
