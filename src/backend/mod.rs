//! Capability contracts for the transports feeding and draining the pipeline.
//!
//! Each backend produces a lazy sequence of inbound items through
//! `receive`, which yields `None` once the backend has been closed and its
//! buffered items are drained. Outbound calls stay usable after `close` so
//! in-flight workers can finish during shutdown.

mod channel;

use async_trait::async_trait;
use thiserror::Error;

pub use channel::{
    ApplicationHandle,
    ChannelApplication,
    ChannelController,
    ChannelGateway,
    ControllerHandle,
    GatewayHandle,
};

use crate::models::{MacPayload, RxPacket, RxPayload, TxPacket, TxPayload};

/// Errors raised by backend transports.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BackendError {
    /// The peer of the transport has gone away.
    #[error("{backend} backend disconnected")]
    Disconnected {
        /// Backend name used in logs.
        backend: &'static str,
    },
    /// Delivery failed for a transport-specific reason.
    #[error("{backend} backend transport error: {reason}")]
    Transport {
        /// Backend name used in logs.
        backend: &'static str,
        /// Transport-provided description.
        reason: String,
    },
    /// The backend could not be shut down cleanly.
    #[error("failed to close {backend} backend: {reason}")]
    Close {
        /// Backend name used in logs.
        backend: &'static str,
        /// Transport-provided description.
        reason: String,
    },
}

/// Radio side: frames received by gateways and downlinks to transmit.
#[async_trait]
pub trait GatewayBackend: Send + Sync {
    /// Next received frame, or `None` once the backend is closed.
    async fn receive(&self) -> Option<RxPacket>;

    /// Hand a downlink to the gateway named in its transmission parameters.
    async fn send_tx_packet(&self, packet: TxPacket) -> Result<(), BackendError>;

    /// End the `receive` sequence.
    async fn close(&self) -> Result<(), BackendError>;
}

/// Application side: payloads to queue for devices and decrypted uplinks.
#[async_trait]
pub trait ApplicationBackend: Send + Sync {
    /// Next payload to queue, or `None` once the backend is closed.
    async fn receive(&self) -> Option<TxPayload>;

    /// Deliver a decrypted uplink payload.
    async fn send_rx_payload(&self, payload: RxPayload) -> Result<(), BackendError>;

    /// End the `receive` sequence.
    async fn close(&self) -> Result<(), BackendError>;
}

/// Network-controller side: MAC commands to queue and MAC commands received.
#[async_trait]
pub trait ControllerBackend: Send + Sync {
    /// Next MAC command to queue, or `None` once the backend is closed.
    async fn receive(&self) -> Option<MacPayload>;

    /// Deliver a MAC command sent by a device.
    async fn send_rx_mac_payload(&self, payload: MacPayload) -> Result<(), BackendError>;

    /// End the `receive` sequence.
    async fn close(&self) -> Result<(), BackendError>;
}
