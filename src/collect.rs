//! Collection of one frame's receptions across gateways.
//!
//! Gateways in range of a device all forward the same frame. The first
//! worker to see a frame opens a collection window keyed by the frame bytes;
//! workers carrying later copies add their reception metadata and stop.
//! When the window closes the first worker continues with the whole set.

use std::time::Duration;

use dashmap::{DashMap, mapref::entry::Entry};
use tracing::trace;

use crate::models::{RxInfo, RxPacket, RxPacketSet};

/// De-duplicates receptions of identical frames.
pub struct RxCollector {
    window: Duration,
    pending: DashMap<Vec<u8>, Vec<RxInfo>>,
}

impl RxCollector {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: DashMap::new(),
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration { self.window }

    /// Add `packet` to the collection of its frame.
    ///
    /// Returns the complete set to the worker that opened the collection once
    /// the window has elapsed, and `None` to every other contributor.
    pub async fn collect(&self, packet: RxPacket) -> Option<RxPacketSet> {
        if self.window.is_zero() {
            return Some(packet.into());
        }
        let key = packet.phy_payload.to_bytes();
        match self.pending.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().push(packet.rx_info);
                trace!(gateway_count = entry.get().len(), "reception added to collection");
                return None;
            }
            Entry::Vacant(entry) => {
                entry.insert(vec![packet.rx_info]);
            }
        }
        tokio::time::sleep(self.window).await;
        let (_, rx_info) = self.pending.remove(&key)?;
        Some(RxPacketSet {
            phy_payload: packet.phy_payload,
            rx_info,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        lorawan::{Eui64, FramePayload, MType, Mhdr, PhyPayload},
        models::DataRate,
    };

    fn packet(body: u8, gateway: u8) -> RxPacket {
        RxPacket {
            phy_payload: PhyPayload {
                mhdr: Mhdr::new(MType::Proprietary),
                payload: FramePayload::Opaque(vec![body]),
                mic: [0; 4],
            },
            rx_info: RxInfo {
                gateway: Eui64::new([gateway; 8]),
                timestamp: 0,
                frequency: 868_100_000,
                data_rate: DataRate {
                    spreading_factor: 7,
                    bandwidth: 125,
                },
                code_rate: "4/5".to_owned(),
                rssi: -80,
                lora_snr: 5.0,
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn duplicates_join_the_first_collection() {
        let collector = Arc::new(RxCollector::new(Duration::from_millis(200)));
        let first = tokio::spawn({
            let collector = Arc::clone(&collector);
            async move { collector.collect(packet(1, 1)).await }
        });
        tokio::task::yield_now().await;

        assert!(collector.collect(packet(1, 2)).await.is_none());
        assert!(collector.collect(packet(1, 3)).await.is_none());

        let set = first.await.expect("join").expect("owner receives the set");
        let gateways: Vec<_> = set.rx_info.iter().map(|rx| rx.gateway).collect();
        assert_eq!(
            gateways,
            [Eui64::new([1; 8]), Eui64::new([2; 8]), Eui64::new([3; 8])]
        );
        assert!(collector.pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_frames_are_collected_separately() {
        let collector = Arc::new(RxCollector::new(Duration::from_millis(200)));
        let (a, b) = tokio::join!(collector.collect(packet(1, 1)), collector.collect(packet(2, 1)));
        assert_eq!(a.map(|set| set.rx_info.len()), Some(1));
        assert_eq!(b.map(|set| set.rx_info.len()), Some(1));
    }

    #[tokio::test]
    async fn zero_window_passes_frames_through() {
        let collector = RxCollector::new(Duration::ZERO);
        assert!(collector.collect(packet(1, 1)).await.is_some());
        assert!(collector.collect(packet(1, 2)).await.is_some());
    }
}
