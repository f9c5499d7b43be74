#![cfg(any(test, feature = "test-helpers"))]
//! Test-only helpers: a simulated end-device and an in-memory harness.
//!
//! [`DeviceSim`] builds frames the way a real device would, signing and
//! encrypting them with its root and session keys, so tests drive the same
//! crypto path as production traffic.

use std::{sync::Arc, time::Duration};

use thiserror::Error;

use crate::{
    backend::{
        ApplicationHandle,
        ChannelApplication,
        ChannelController,
        ChannelGateway,
        ControllerHandle,
        GatewayHandle,
    },
    config::ServerConfig,
    context::{Backends, Context, Stores},
    lorawan::{
        AesKey,
        DataPayload,
        DevAddr,
        Direction,
        Eui64,
        FCtrl,
        Fhdr,
        FrameError,
        FramePayload,
        JoinAcceptPayload,
        JoinRequestPayload,
        MType,
        Mhdr,
        NetId,
        PhyPayload,
        SessionKeys,
        derive_session_keys,
    },
    models::{Application, DataRate, MacPayload, Node, RxInfo, RxPacket, TxPacket, TxPayload},
    storage::{MemoryNodeRegistry, MemoryQueueStore, MemorySessionStore, StorageError},
};

/// Network identifier used by the harness.
pub const TEST_NET_ID: NetId = NetId::new([0x00, 0x00, 0x13]);
/// Session time-to-live used by the harness.
pub const TEST_SESSION_TTL: Duration = Duration::from_secs(3600);

/// Errors raised by [`DeviceSim`].
#[derive(Debug, Error)]
pub enum SimError {
    /// A data frame was requested before a join-accept was processed.
    #[error("device has not joined")]
    NotJoined,
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Options for a simulated data uplink.
#[derive(Clone, Debug, Default)]
pub struct Uplink {
    pub fcnt: u32,
    pub confirmed: bool,
    pub fctrl: FCtrl,
    pub fopts: Vec<u8>,
    pub fport: Option<u8>,
    /// Plain text; encrypted by [`DeviceSim::data_up`].
    pub payload: Vec<u8>,
}

impl Uplink {
    /// Unconfirmed uplink carrying `payload` on `fport`.
    #[must_use]
    pub fn new(fcnt: u32, fport: u8, payload: &[u8]) -> Self {
        Self {
            fcnt,
            fport: Some(fport),
            payload: payload.to_vec(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn confirmed(mut self) -> Self {
        self.confirmed = true;
        self
    }

    #[must_use]
    pub fn with_fopts(mut self, fopts: &[u8]) -> Self {
        self.fopts = fopts.to_vec();
        self
    }

    #[must_use]
    pub fn with_fctrl(mut self, fctrl: FCtrl) -> Self {
        self.fctrl = fctrl;
        self
    }
}

/// Simulated end-device.
#[derive(Clone, Debug)]
pub struct DeviceSim {
    pub dev_eui: Eui64,
    pub app_eui: Eui64,
    pub app_key: AesKey,
    next_dev_nonce: u16,
    last_dev_nonce: Option<u16>,
    session: Option<(DevAddr, SessionKeys)>,
}

impl DeviceSim {
    #[must_use]
    pub fn new(dev_eui: Eui64, app_eui: Eui64, app_key: AesKey) -> Self {
        Self {
            dev_eui,
            app_eui,
            app_key,
            next_dev_nonce: 1,
            last_dev_nonce: None,
            session: None,
        }
    }

    /// Registry record provisioning this device.
    #[must_use]
    pub fn node(&self) -> Node {
        Node {
            dev_eui: self.dev_eui,
            app_eui: self.app_eui,
            app_key: self.app_key,
            rx_delay: 1,
            rx1_dr_offset: 0,
            channel_list_id: None,
        }
    }

    /// Signed join-request using a fresh dev-nonce.
    ///
    /// # Errors
    ///
    /// Propagates MIC computation failures.
    pub fn join_request(&mut self) -> Result<PhyPayload, SimError> {
        let dev_nonce = self.next_dev_nonce;
        self.next_dev_nonce = self.next_dev_nonce.wrapping_add(1);
        self.join_request_with_nonce(dev_nonce)
    }

    /// Signed join-request using `dev_nonce`.
    ///
    /// # Errors
    ///
    /// Propagates MIC computation failures.
    pub fn join_request_with_nonce(&mut self, dev_nonce: u16) -> Result<PhyPayload, SimError> {
        let mut frame = PhyPayload {
            mhdr: Mhdr::new(MType::JoinRequest),
            payload: FramePayload::JoinRequest(JoinRequestPayload {
                app_eui: self.app_eui,
                dev_eui: self.dev_eui,
                dev_nonce,
            }),
            mic: [0; 4],
        };
        frame.set_join_mic(&self.app_key)?;
        self.last_dev_nonce = Some(dev_nonce);
        Ok(frame)
    }

    /// Open a join-accept and derive the session keys from it.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::NotJoined`] when no join-request was built and a
    /// frame error when the join-accept does not open with the root key.
    pub fn accept_join(&mut self, packet: &TxPacket) -> Result<JoinAcceptPayload, SimError> {
        let dev_nonce = self.last_dev_nonce.ok_or(SimError::NotJoined)?;
        let accept = JoinAcceptPayload::open(&packet.phy_payload, &self.app_key)?;
        let keys = derive_session_keys(&self.app_key, accept.app_nonce, accept.net_id, dev_nonce);
        self.session = Some((accept.dev_addr, keys));
        Ok(accept)
    }

    /// Address and keys of the current activation.
    #[must_use]
    pub fn session(&self) -> Option<(DevAddr, SessionKeys)> { self.session }

    /// Adopt an activation without a join exchange.
    pub fn activate(&mut self, dev_addr: DevAddr, keys: SessionKeys) {
        self.session = Some((dev_addr, keys));
    }

    /// Encrypted and signed data uplink.
    ///
    /// Port 0 payloads are encrypted with the network session key, every
    /// other port with the application session key.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::NotJoined`] before activation.
    pub fn data_up(&self, uplink: &Uplink) -> Result<PhyPayload, SimError> {
        let (dev_addr, keys) = self.session.ok_or(SimError::NotJoined)?;
        let mtype = if uplink.confirmed {
            MType::ConfirmedDataUp
        } else {
            MType::UnconfirmedDataUp
        };
        #[expect(
            clippy::cast_possible_truncation,
            reason = "only the low 16 counter bits go on air"
        )]
        let fcnt = uplink.fcnt as u16;
        let mut data = DataPayload {
            fhdr: Fhdr {
                dev_addr,
                fctrl: uplink.fctrl,
                fcnt,
                fopts: uplink.fopts.clone(),
            },
            fport: uplink.fport,
            frm_payload: uplink.payload.clone(),
        };
        let key = if uplink.fport == Some(0) {
            keys.nwk_s_key
        } else {
            keys.app_s_key
        };
        data.frm_payload = data.crypt_frm_payload(&key, Direction::Uplink, uplink.fcnt);
        let mut frame = PhyPayload {
            mhdr: Mhdr::new(mtype),
            payload: FramePayload::Data(data),
            mic: [0; 4],
        };
        frame.set_data_mic(Direction::Uplink, &keys.nwk_s_key, uplink.fcnt)?;
        Ok(frame)
    }
}

/// Reception metadata of gateway `[gateway; 8]`.
#[must_use]
pub fn rx_info(gateway: u8) -> RxInfo {
    RxInfo {
        gateway: Eui64::new([gateway; 8]),
        timestamp: 1_000_000,
        frequency: 868_100_000,
        data_rate: DataRate {
            spreading_factor: 7,
            bandwidth: 125,
        },
        code_rate: "4/5".to_owned(),
        rssi: -60,
        lora_snr: 7.0,
    }
}

/// `frame` as received by gateway `[gateway; 8]`.
#[must_use]
pub fn rx_packet(frame: PhyPayload, gateway: u8) -> RxPacket {
    RxPacket {
        phy_payload: frame,
        rx_info: rx_info(gateway),
    }
}

#[must_use]
pub fn tx_payload(dev_eui: Eui64, reference: &str) -> TxPayload {
    TxPayload {
        dev_eui,
        reference: reference.to_owned(),
        confirmed: false,
        fport: 10,
        data: reference.as_bytes().to_vec(),
    }
}

#[must_use]
pub fn mac_payload(dev_eui: Eui64, reference: &str) -> MacPayload {
    MacPayload {
        dev_eui,
        reference: reference.to_owned(),
        frm_payload: false,
        mac_command: vec![0x02],
    }
}

/// In-memory stores and channel backends wired into a [`Context`].
pub struct TestContext {
    pub ctx: Arc<Context>,
    pub registry: Arc<MemoryNodeRegistry>,
    pub sessions: Arc<MemorySessionStore>,
    pub queues: Arc<MemoryQueueStore>,
    pub gateway: GatewayHandle,
    pub application: ApplicationHandle,
    pub controller: ControllerHandle,
}

impl TestContext {
    /// Harness with defaults: no collection window and 256 workers.
    #[must_use]
    pub fn new() -> Self { Self::builder().build() }

    #[must_use]
    pub fn builder() -> TestContextBuilder { TestContextBuilder::default() }

    /// Register the device's application (if new) and node.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::AlreadyExists`] if the node is already provisioned.
    pub fn provision(&self, device: &DeviceSim) -> Result<(), StorageError> {
        match self.registry.create_application(Application {
            app_eui: device.app_eui,
            name: format!("app-{}", device.app_eui),
        }) {
            Ok(()) | Err(StorageError::AlreadyExists { .. }) => {}
            Err(e) => return Err(e),
        }
        self.registry.create_node(device.node())
    }
}

impl Default for TestContext {
    fn default() -> Self { Self::new() }
}

/// Builder for [`TestContext`].
pub struct TestContextBuilder {
    config: ServerConfig,
    session_ttl: Duration,
    capacity: usize,
    map_stores: Option<Box<dyn FnOnce(Stores) -> Stores>>,
    map_backends: Option<Box<dyn FnOnce(Backends) -> Backends>>,
}

impl Default for TestContextBuilder {
    fn default() -> Self {
        Self {
            config: ServerConfig::new(TEST_NET_ID).with_dedup_window(Duration::ZERO),
            session_ttl: TEST_SESSION_TTL,
            capacity: 64,
            map_stores: None,
            map_backends: None,
        }
    }
}

impl TestContextBuilder {
    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn dedup_window(mut self, window: Duration) -> Self {
        self.config = self.config.with_dedup_window(window);
        self
    }

    #[must_use]
    pub fn max_in_flight(mut self, limit: usize) -> Self {
        self.config = self.config.with_max_in_flight(limit);
        self
    }

    #[must_use]
    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Buffer size of the inbound backend channels.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Wrap or replace the in-memory stores before the context is built.
    ///
    /// The harness fields keep pointing at the in-memory stores.
    #[must_use]
    pub fn map_stores(mut self, f: impl FnOnce(Stores) -> Stores + 'static) -> Self {
        self.map_stores = Some(Box::new(f));
        self
    }

    /// Wrap or replace the channel backends before the context is built.
    #[must_use]
    pub fn map_backends(mut self, f: impl FnOnce(Backends) -> Backends + 'static) -> Self {
        self.map_backends = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn build(self) -> TestContext {
        let registry = Arc::new(MemoryNodeRegistry::new());
        let sessions = Arc::new(MemorySessionStore::new(
            self.config.net_id(),
            self.session_ttl,
        ));
        let queues = Arc::new(MemoryQueueStore::new());
        let (gateway, gateway_handle) = ChannelGateway::new(self.capacity);
        let (application, application_handle) = ChannelApplication::new(self.capacity);
        let (controller, controller_handle) = ChannelController::new(self.capacity);

        let mut stores = Stores {
            registry: registry.clone(),
            sessions: sessions.clone(),
            queues: queues.clone(),
        };
        if let Some(map) = self.map_stores {
            stores = map(stores);
        }
        let mut backends = Backends {
            gateway: Arc::new(gateway),
            application: Arc::new(application),
            controller: Arc::new(controller),
        };
        if let Some(map) = self.map_backends {
            backends = map(backends);
        }
        TestContext {
            ctx: Arc::new(Context::new(self.config, stores, backends)),
            registry,
            sessions,
            queues,
            gateway: gateway_handle,
            application: application_handle,
            controller: controller_handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceSim {
        DeviceSim::new(
            Eui64::new([0xe1; 8]),
            Eui64::new([0xa1; 8]),
            AesKey::new([0x2b; 16]),
        )
    }

    #[test]
    fn join_requests_verify_with_the_root_key() {
        let mut sim = device();
        let frame = sim.join_request().expect("join request");
        assert!(frame.validate_join_mic(&sim.app_key));
        assert!(!frame.validate_join_mic(&AesKey::new([0; 16])));
    }

    #[test]
    fn data_up_requires_activation() {
        let sim = device();
        assert!(matches!(
            sim.data_up(&Uplink::new(1, 1, b"x")),
            Err(SimError::NotJoined)
        ));
    }

    #[test]
    fn data_up_is_signed_with_the_network_key() {
        let mut sim = device();
        let keys = SessionKeys {
            nwk_s_key: AesKey::new([1; 16]),
            app_s_key: AesKey::new([2; 16]),
        };
        sim.activate(DevAddr::with_nwk_id([0, 0, 0, 1], TEST_NET_ID.nwk_id()), keys);
        let frame = sim.data_up(&Uplink::new(3, 1, b"hello")).expect("frame");

        assert!(frame.validate_data_mic(Direction::Uplink, &keys.nwk_s_key, 3));
        let FramePayload::Data(data) = &frame.payload else {
            panic!("expected data payload");
        };
        assert_eq!(
            data.crypt_frm_payload(&keys.app_s_key, Direction::Uplink, 3),
            b"hello"
        );
    }
}
