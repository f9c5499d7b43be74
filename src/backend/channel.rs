//! In-process backends built on `tokio::sync::mpsc`.
//!
//! Every constructor returns the backend together with a handle owning the
//! other ends of its channels: the handle injects inbound items and observes
//! what the pipeline sends out.

use async_trait::async_trait;
use tokio::{
    select,
    sync::{Mutex, mpsc},
};
use tokio_util::sync::CancellationToken;

use super::{ApplicationBackend, BackendError, ControllerBackend, GatewayBackend};
use crate::models::{MacPayload, RxPacket, RxPayload, TxPacket, TxPayload};

struct Inbound<T> {
    rx: Mutex<mpsc::Receiver<T>>,
    closed: CancellationToken,
}

impl<T> Inbound<T> {
    fn new(rx: mpsc::Receiver<T>) -> Self {
        Self {
            rx: Mutex::new(rx),
            closed: CancellationToken::new(),
        }
    }

    /// Buffered items are still delivered after `close`; the sequence ends
    /// once the buffer is empty.
    async fn next(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        if self.closed.is_cancelled() {
            return rx.try_recv().ok();
        }
        select! {
            biased;
            item = rx.recv() => item,
            () = self.closed.cancelled() => rx.try_recv().ok(),
        }
    }

    fn close(&self) { self.closed.cancel(); }
}

fn deliver<T>(
    tx: &mpsc::UnboundedSender<T>,
    item: T,
    backend: &'static str,
) -> Result<(), BackendError> {
    tx.send(item)
        .map_err(|_| BackendError::Disconnected { backend })
}

/// Gateway backend fed through a [`GatewayHandle`].
pub struct ChannelGateway {
    inbound: Inbound<RxPacket>,
    downlinks: mpsc::UnboundedSender<TxPacket>,
}

/// Peer side of a [`ChannelGateway`].
pub struct GatewayHandle {
    /// Frames to feed into the pipeline.
    pub uplinks: mpsc::Sender<RxPacket>,
    /// Downlinks emitted by the pipeline.
    pub downlinks: mpsc::UnboundedReceiver<TxPacket>,
}

impl ChannelGateway {
    /// Create a gateway buffering up to `capacity` received frames.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, GatewayHandle) {
        let (uplinks, rx) = mpsc::channel(capacity.max(1));
        let (downlinks, downlinks_rx) = mpsc::unbounded_channel();
        (
            Self {
                inbound: Inbound::new(rx),
                downlinks,
            },
            GatewayHandle {
                uplinks,
                downlinks: downlinks_rx,
            },
        )
    }
}

#[async_trait]
impl GatewayBackend for ChannelGateway {
    async fn receive(&self) -> Option<RxPacket> { self.inbound.next().await }

    async fn send_tx_packet(&self, packet: TxPacket) -> Result<(), BackendError> {
        deliver(&self.downlinks, packet, "gateway")
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.inbound.close();
        Ok(())
    }
}

/// Application backend fed through an [`ApplicationHandle`].
pub struct ChannelApplication {
    inbound: Inbound<TxPayload>,
    uplinks: mpsc::UnboundedSender<RxPayload>,
}

/// Peer side of a [`ChannelApplication`].
pub struct ApplicationHandle {
    /// Payloads the application wants queued for its devices.
    pub downlinks: mpsc::Sender<TxPayload>,
    /// Decrypted uplink payloads.
    pub uplinks: mpsc::UnboundedReceiver<RxPayload>,
}

impl ChannelApplication {
    /// Create an application backend buffering up to `capacity` payloads.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, ApplicationHandle) {
        let (downlinks, rx) = mpsc::channel(capacity.max(1));
        let (uplinks, uplinks_rx) = mpsc::unbounded_channel();
        (
            Self {
                inbound: Inbound::new(rx),
                uplinks,
            },
            ApplicationHandle {
                downlinks,
                uplinks: uplinks_rx,
            },
        )
    }
}

#[async_trait]
impl ApplicationBackend for ChannelApplication {
    async fn receive(&self) -> Option<TxPayload> { self.inbound.next().await }

    async fn send_rx_payload(&self, payload: RxPayload) -> Result<(), BackendError> {
        deliver(&self.uplinks, payload, "application")
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.inbound.close();
        Ok(())
    }
}

/// Network-controller backend fed through a [`ControllerHandle`].
pub struct ChannelController {
    inbound: Inbound<MacPayload>,
    uplinks: mpsc::UnboundedSender<MacPayload>,
}

/// Peer side of a [`ChannelController`].
pub struct ControllerHandle {
    /// MAC commands the controller wants queued for devices.
    pub downlinks: mpsc::Sender<MacPayload>,
    /// MAC commands sent by devices.
    pub uplinks: mpsc::UnboundedReceiver<MacPayload>,
}

impl ChannelController {
    /// Create a controller backend buffering up to `capacity` commands.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, ControllerHandle) {
        let (downlinks, rx) = mpsc::channel(capacity.max(1));
        let (uplinks, uplinks_rx) = mpsc::unbounded_channel();
        (
            Self {
                inbound: Inbound::new(rx),
                uplinks,
            },
            ControllerHandle {
                downlinks,
                uplinks: uplinks_rx,
            },
        )
    }
}

#[async_trait]
impl ControllerBackend for ChannelController {
    async fn receive(&self) -> Option<MacPayload> { self.inbound.next().await }

    async fn send_rx_mac_payload(&self, payload: MacPayload) -> Result<(), BackendError> {
        deliver(&self.uplinks, payload, "controller")
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.inbound.close();
        Ok(())
    }
}
