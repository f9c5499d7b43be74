//! In-memory [`QueueStore`].

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{QueueStore, StorageError};
use crate::{
    lorawan::Eui64,
    models::{MacPayload, TxPayload},
};

/// FIFO queues keyed by device EUI.
struct DeviceQueues<T>(DashMap<Eui64, VecDeque<T>>);

impl<T: Clone> DeviceQueues<T> {
    fn new() -> Self { Self(DashMap::new()) }

    fn push(&self, dev_eui: Eui64, item: T) { self.0.entry(dev_eui).or_default().push_back(item); }

    fn snapshot(&self, dev_eui: Eui64) -> Vec<T> {
        self.0
            .get(&dev_eui)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn pop(&self, dev_eui: Eui64) -> Option<T> {
        let item = self.0.get_mut(&dev_eui).and_then(|mut queue| queue.pop_front());
        self.0.remove_if(&dev_eui, |_, queue| queue.is_empty());
        item
    }

    fn flush(&self, dev_eui: Eui64) { self.0.remove(&dev_eui); }
}

/// Queue store kept in process memory; application payloads and MAC
/// commands live in independent queues.
pub struct MemoryQueueStore {
    tx_payloads: DeviceQueues<TxPayload>,
    mac_payloads: DeviceQueues<MacPayload>,
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self {
            tx_payloads: DeviceQueues::new(),
            mac_payloads: DeviceQueues::new(),
        }
    }
}

impl MemoryQueueStore {
    #[must_use]
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue_tx_payload(&self, payload: TxPayload) -> Result<(), StorageError> {
        self.tx_payloads.push(payload.dev_eui, payload);
        Ok(())
    }

    async fn enqueue_mac_payload(&self, payload: MacPayload) -> Result<(), StorageError> {
        self.mac_payloads.push(payload.dev_eui, payload);
        Ok(())
    }

    async fn tx_payloads(&self, dev_eui: Eui64) -> Result<Vec<TxPayload>, StorageError> {
        Ok(self.tx_payloads.snapshot(dev_eui))
    }

    async fn mac_payloads(&self, dev_eui: Eui64) -> Result<Vec<MacPayload>, StorageError> {
        Ok(self.mac_payloads.snapshot(dev_eui))
    }

    async fn dequeue_tx_payload(&self, dev_eui: Eui64) -> Result<Option<TxPayload>, StorageError> {
        Ok(self.tx_payloads.pop(dev_eui))
    }

    async fn dequeue_mac_payload(
        &self,
        dev_eui: Eui64,
    ) -> Result<Option<MacPayload>, StorageError> {
        Ok(self.mac_payloads.pop(dev_eui))
    }

    async fn flush_tx_payloads(&self, dev_eui: Eui64) -> Result<(), StorageError> {
        self.tx_payloads.flush(dev_eui);
        Ok(())
    }

    async fn flush_mac_payloads(&self, dev_eui: Eui64) -> Result<(), StorageError> {
        self.mac_payloads.flush(dev_eui);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    const DEVICE: Eui64 = Eui64::new([0xe1; 8]);
    const OTHER: Eui64 = Eui64::new([0xe2; 8]);

    #[allow(unused_braces)]
    #[fixture]
    fn queues() -> MemoryQueueStore { MemoryQueueStore::new() }

    fn tx(dev_eui: Eui64, reference: &str) -> TxPayload {
        TxPayload {
            dev_eui,
            reference: reference.to_owned(),
            confirmed: false,
            fport: 1,
            data: reference.as_bytes().to_vec(),
        }
    }

    fn mac(dev_eui: Eui64, reference: &str) -> MacPayload {
        MacPayload {
            dev_eui,
            reference: reference.to_owned(),
            frm_payload: false,
            mac_command: vec![0x02],
        }
    }

    #[rstest]
    #[tokio::test]
    async fn payloads_keep_insertion_order(queues: MemoryQueueStore) {
        for reference in ["a", "b", "c"] {
            queues.enqueue_tx_payload(tx(DEVICE, reference)).await.expect("enqueue");
        }
        let refs: Vec<_> = queues
            .tx_payloads(DEVICE)
            .await
            .expect("peek")
            .into_iter()
            .map(|p| p.reference)
            .collect();
        assert_eq!(refs, ["a", "b", "c"]);

        let first = queues.dequeue_tx_payload(DEVICE).await.expect("dequeue");
        assert_eq!(first.map(|p| p.reference).as_deref(), Some("a"));
        assert_eq!(queues.tx_payloads(DEVICE).await.expect("peek").len(), 2);
    }

    #[rstest]
    #[tokio::test]
    async fn flush_empties_only_the_target_queue(queues: MemoryQueueStore) {
        queues.enqueue_tx_payload(tx(DEVICE, "a")).await.expect("enqueue");
        queues.enqueue_tx_payload(tx(OTHER, "b")).await.expect("enqueue");
        queues.enqueue_mac_payload(mac(DEVICE, "m")).await.expect("enqueue");

        queues.flush_tx_payloads(DEVICE).await.expect("flush");

        assert!(queues.tx_payloads(DEVICE).await.expect("peek").is_empty());
        assert_eq!(queues.tx_payloads(OTHER).await.expect("peek").len(), 1);
        assert_eq!(queues.mac_payloads(DEVICE).await.expect("peek").len(), 1);

        queues.flush_mac_payloads(DEVICE).await.expect("flush");
        assert!(queues.mac_payloads(DEVICE).await.expect("peek").is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn dequeue_from_empty_queue_yields_none(queues: MemoryQueueStore) {
        assert!(queues.dequeue_mac_payload(DEVICE).await.expect("dequeue").is_none());
        queues.enqueue_mac_payload(mac(DEVICE, "m")).await.expect("enqueue");
        assert!(queues.dequeue_mac_payload(DEVICE).await.expect("dequeue").is_some());
        assert!(queues.dequeue_mac_payload(DEVICE).await.expect("dequeue").is_none());
    }
}
