//! Per-device single-writer locks.
//!
//! A session update is a read-modify-write against the store. Holding the
//! device's lock across that sequence keeps two frames for the same device
//! from interleaving, so the stored uplink counter only ever advances.
//! Entries are created on demand and removed when the last holder or
//! waiter lets go.

use std::{hash::Hash, sync::Arc};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of async mutexes keyed by device.
pub struct DeviceLocks<K: Eq + Hash>(DashMap<K, Arc<Mutex<()>>>);

impl<K: Eq + Hash> Default for DeviceLocks<K> {
    fn default() -> Self { Self(DashMap::new()) }
}

impl<K: Eq + Hash + Clone> DeviceLocks<K> {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Wait for exclusive access to `key`.
    ///
    /// Dropping the future while it waits releases the entry like dropping
    /// the guard does.
    pub async fn lock(&self, key: K) -> DeviceGuard<'_, K> {
        // Declared before the wait so it drops after the pending lock.
        let mut held = DeviceGuard {
            locks: self,
            key: key.clone(),
            guard: None,
        };
        let mutex = self.0.entry(key).or_default().clone();
        held.guard = Some(mutex.lock_owned().await);
        held
    }

    /// Number of keys currently locked or awaited.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

/// Exclusive access to one device; released on drop.
pub struct DeviceGuard<'a, K: Eq + Hash> {
    locks: &'a DeviceLocks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash> Drop for DeviceGuard<'_, K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .0
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
