//! Backend wrappers injecting failures.

use std::sync::Arc;

use async_trait::async_trait;
use loraserver::{
    backend::{ApplicationBackend, BackendError, ControllerBackend, GatewayBackend},
    models::{MacPayload, RxPacket, RxPayload, TxPacket, TxPayload},
};

/// Delegates to `inner` but refuses to close, leaving its `receive`
/// sequence open.
pub struct FailingClose<B: ?Sized> {
    inner: Arc<B>,
}

impl<B: ?Sized> FailingClose<B> {
    #[must_use]
    pub fn wrap(inner: Arc<B>) -> Arc<Self> { Arc::new(Self { inner }) }
}

fn close_error(backend: &'static str) -> BackendError {
    BackendError::Close {
        backend,
        reason: "injected close failure".to_owned(),
    }
}

#[async_trait]
impl GatewayBackend for FailingClose<dyn GatewayBackend> {
    async fn receive(&self) -> Option<RxPacket> { self.inner.receive().await }

    async fn send_tx_packet(&self, packet: TxPacket) -> Result<(), BackendError> {
        self.inner.send_tx_packet(packet).await
    }

    async fn close(&self) -> Result<(), BackendError> { Err(close_error("gateway")) }
}

#[async_trait]
impl ApplicationBackend for FailingClose<dyn ApplicationBackend> {
    async fn receive(&self) -> Option<TxPayload> { self.inner.receive().await }

    async fn send_rx_payload(&self, payload: RxPayload) -> Result<(), BackendError> {
        self.inner.send_rx_payload(payload).await
    }

    async fn close(&self) -> Result<(), BackendError> { Err(close_error("application")) }
}

#[async_trait]
impl ControllerBackend for FailingClose<dyn ControllerBackend> {
    async fn receive(&self) -> Option<MacPayload> { self.inner.receive().await }

    async fn send_rx_mac_payload(&self, payload: MacPayload) -> Result<(), BackendError> {
        self.inner.send_rx_mac_payload(payload).await
    }

    async fn close(&self) -> Result<(), BackendError> { Err(close_error("controller")) }
}
