//! Service object handed to every processor and pipeline.

use std::sync::Arc;

use crate::{
    backend::{ApplicationBackend, ControllerBackend, GatewayBackend},
    collect::RxCollector,
    config::ServerConfig,
    device_lock::DeviceLocks,
    lorawan::Eui64,
    storage::{NodeRegistry, QueueStore, SessionStore},
};

/// State stores the pipeline reads and writes.
#[derive(Clone)]
pub struct Stores {
    pub registry: Arc<dyn NodeRegistry>,
    pub sessions: Arc<dyn SessionStore>,
    pub queues: Arc<dyn QueueStore>,
}

/// Transports the pipeline consumes from and forwards to.
#[derive(Clone)]
pub struct Backends {
    pub gateway: Arc<dyn GatewayBackend>,
    pub application: Arc<dyn ApplicationBackend>,
    pub controller: Arc<dyn ControllerBackend>,
}

/// Dependencies of the pipeline, built once and shared by reference.
pub struct Context {
    pub config: ServerConfig,
    pub stores: Stores,
    pub backends: Backends,
    pub(crate) collector: RxCollector,
    pub(crate) device_locks: DeviceLocks<Eui64>,
}

impl Context {
    #[must_use]
    pub fn new(config: ServerConfig, stores: Stores, backends: Backends) -> Self {
        Self {
            collector: RxCollector::new(config.dedup_window()),
            config,
            stores,
            backends,
            device_locks: DeviceLocks::new(),
        }
    }
}
