//! Records exchanged between the pipeline, its stores and its backends.

use serde::{Deserialize, Serialize};

use crate::lorawan::{AesKey, DevAddr, Eui64, NetId, PhyPayload};

/// Provisioned end-device. Owned by the management side; read-only here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub dev_eui: Eui64,
    pub app_eui: Eui64,
    /// Root key used to authenticate join-requests and derive session keys.
    pub app_key: AesKey,
    /// Delay in seconds between uplink and the first receive window.
    pub rx_delay: u8,
    pub rx1_dr_offset: u8,
    pub channel_list_id: Option<i64>,
}

/// Application a node reports to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub app_eui: Eui64,
    pub name: String,
}

/// Extra channels announced to devices through the join-accept CFList.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelList {
    pub id: i64,
    pub name: String,
    /// Frequencies in Hz; only the first five are announced.
    pub channels: Vec<u32>,
}

/// LoRa modulation parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRate {
    pub spreading_factor: u8,
    /// Bandwidth in kHz.
    pub bandwidth: u32,
}

/// Reception metadata reported by one gateway.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RxInfo {
    pub gateway: Eui64,
    /// Concentrator counter (µs) at reception.
    pub timestamp: u32,
    pub frequency: u32,
    pub data_rate: DataRate,
    pub code_rate: String,
    pub rssi: i32,
    pub lora_snr: f64,
}

/// Radio frame received by a gateway.
#[derive(Clone, Debug, PartialEq)]
pub struct RxPacket {
    pub phy_payload: PhyPayload,
    pub rx_info: RxInfo,
}

/// One frame with the reception metadata of every gateway that heard it.
#[derive(Clone, Debug, PartialEq)]
pub struct RxPacketSet {
    pub phy_payload: PhyPayload,
    pub rx_info: Vec<RxInfo>,
}

impl RxPacketSet {
    /// Reception with the best signal, used to address downlinks.
    #[must_use]
    pub fn best_rx_info(&self) -> Option<&RxInfo> {
        self.rx_info.iter().max_by(|a, b| {
            a.lora_snr
                .total_cmp(&b.lora_snr)
                .then_with(|| a.rssi.cmp(&b.rssi))
        })
    }

    /// Highest SNR across all receptions.
    #[must_use]
    pub fn max_snr(&self) -> Option<f64> { self.best_rx_info().map(|rx| rx.lora_snr) }
}

impl From<RxPacket> for RxPacketSet {
    fn from(packet: RxPacket) -> Self {
        Self {
            phy_payload: packet.phy_payload,
            rx_info: vec![packet.rx_info],
        }
    }
}

/// Transmission parameters for a downlink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TxInfo {
    pub gateway: Eui64,
    pub immediately: bool,
    /// Concentrator counter (µs) at which to transmit.
    pub timestamp: u32,
    pub frequency: u32,
    /// Transmit power in dBm.
    pub power: i32,
    pub data_rate: DataRate,
    pub code_rate: String,
}

/// Downlink frame handed to the gateway backend.
#[derive(Clone, Debug, PartialEq)]
pub struct TxPacket {
    pub tx_info: TxInfo,
    /// Encoded PHYPayload, already sealed where the message type requires it.
    pub phy_payload: Vec<u8>,
}

/// Application payload waiting for the next downlink opportunity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxPayload {
    pub dev_eui: Eui64,
    /// Opaque reference chosen by the application.
    pub reference: String,
    pub confirmed: bool,
    pub fport: u8,
    pub data: Vec<u8>,
}

/// MAC command to or from a device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacPayload {
    pub dev_eui: Eui64,
    pub reference: String,
    /// True when the command travelled (or must travel) in a port-0 FRMPayload
    /// rather than in FOpts.
    pub frm_payload: bool,
    pub mac_command: Vec<u8>,
}

/// Decrypted uplink application payload forwarded to the application backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RxPayload {
    pub dev_eui: Eui64,
    pub app_eui: Eui64,
    pub fport: u8,
    pub fcnt: u32,
    pub confirmed: bool,
    pub adr: bool,
    pub gateway_count: usize,
    pub rssi: Option<i32>,
    pub data: Vec<u8>,
}

/// Number of uplinks kept in [`AdrState::history`].
pub const UPLINK_HISTORY_LEN: usize = 20;

/// Per-uplink measurement kept for adaptive data rate decisions.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct UplinkMeasurement {
    pub fcnt: u32,
    pub max_snr: f64,
    pub gateway_count: usize,
}

/// Adaptive data rate state carried by a session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AdrState {
    pub enabled: bool,
    pub ack_requested: bool,
    pub history: Vec<UplinkMeasurement>,
}

impl AdrState {
    /// Record an uplink, keeping the most recent [`UPLINK_HISTORY_LEN`] entries.
    pub fn record(&mut self, measurement: UplinkMeasurement) {
        self.history.push(measurement);
        if self.history.len() > UPLINK_HISTORY_LEN {
            let excess = self.history.len() - UPLINK_HISTORY_LEN;
            self.history.drain(..excess);
        }
    }
}

/// Number of join nonces remembered to reject re-used join-requests.
pub const DEV_NONCE_HISTORY_LEN: usize = 10;

/// State of an activated device, keyed by its dynamic address.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSession {
    pub dev_addr: DevAddr,
    pub dev_eui: Eui64,
    pub app_eui: Eui64,
    pub nwk_s_key: AesKey,
    pub app_s_key: AesKey,
    /// Counter of the last accepted uplink.
    pub fcnt_up: u32,
    pub fcnt_down: u32,
    pub rx_delay: u8,
    pub rx1_dr_offset: u8,
    pub adr: AdrState,
    /// An acknowledgement is owed on the next downlink.
    pub ack_pending: bool,
    /// Most recent join nonces used by this device, oldest first.
    pub used_dev_nonces: Vec<u16>,
}

impl NodeSession {
    /// Whether the address was assigned under the given network identifier.
    #[must_use]
    pub fn belongs_to(&self, net_id: NetId) -> bool { self.dev_addr.nwk_id() == net_id.nwk_id() }

    /// Remember a join nonce, forgetting the oldest beyond the history limit.
    pub fn remember_dev_nonce(&mut self, dev_nonce: u16) {
        self.used_dev_nonces.push(dev_nonce);
        if self.used_dev_nonces.len() > DEV_NONCE_HISTORY_LEN {
            self.used_dev_nonces.remove(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rx(gateway: u8, rssi: i32, lora_snr: f64) -> RxInfo {
        RxInfo {
            gateway: Eui64::new([gateway; 8]),
            timestamp: 0,
            frequency: 868_100_000,
            data_rate: DataRate {
                spreading_factor: 7,
                bandwidth: 125,
            },
            code_rate: "4/5".to_owned(),
            rssi,
            lora_snr,
        }
    }

    #[test]
    fn best_rx_info_prefers_snr_then_rssi() {
        let set = RxPacketSet {
            phy_payload: crate::lorawan::PhyPayload {
                mhdr: crate::lorawan::Mhdr::new(crate::lorawan::MType::Proprietary),
                payload: crate::lorawan::FramePayload::Opaque(Vec::new()),
                mic: [0; 4],
            },
            rx_info: vec![rx(1, -120, 5.0), rx(2, -100, 7.5), rx(3, -90, 7.5)],
        };
        let best = set.best_rx_info().expect("non-empty set");
        assert_eq!(best.gateway, Eui64::new([3; 8]));
        assert_eq!(set.max_snr(), Some(7.5));
    }

    #[test]
    fn adr_history_is_bounded() {
        let mut adr = AdrState::default();
        for fcnt in 0..30 {
            adr.record(UplinkMeasurement {
                fcnt,
                max_snr: 1.0,
                gateway_count: 1,
            });
        }
        assert_eq!(adr.history.len(), UPLINK_HISTORY_LEN);
        assert_eq!(adr.history.first().map(|m| m.fcnt), Some(10));
    }

    #[test]
    fn dev_nonce_history_is_bounded() {
        let mut session = NodeSession {
            dev_addr: DevAddr::new([2, 0, 0, 1]),
            dev_eui: Eui64::default(),
            app_eui: Eui64::default(),
            nwk_s_key: AesKey::default(),
            app_s_key: AesKey::default(),
            fcnt_up: 0,
            fcnt_down: 0,
            rx_delay: 1,
            rx1_dr_offset: 0,
            adr: AdrState::default(),
            ack_pending: false,
            used_dev_nonces: Vec::new(),
        };
        for nonce in 0..15 {
            session.remember_dev_nonce(nonce);
        }
        assert_eq!(session.used_dev_nonces, (5..15).collect::<Vec<u16>>());
        assert!(session.belongs_to(NetId::new([0, 0, 1])));
    }
}
