//! In-memory [`SessionStore`] with TTL expiry, and the address allocator.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use tokio::time::Instant;
use tracing::debug;

use super::{SessionStore, StorageError};
use crate::{
    lorawan::{DevAddr, Eui64, NetId},
    models::NodeSession,
};

/// Attempts made by [`allocate_dev_addr`] before giving up.
pub const MAX_ADDRESS_ATTEMPTS: usize = 32;

/// Draw random addresses carrying the `NwkID` of `net_id` until one is free.
///
/// # Errors
///
/// Returns [`StorageError::AddressSpaceExhausted`] after
/// [`MAX_ADDRESS_ATTEMPTS`] collisions, or the store's error if a lookup fails.
pub async fn allocate_dev_addr(
    store: &dyn SessionStore,
    net_id: NetId,
) -> Result<DevAddr, StorageError> {
    for _ in 0..MAX_ADDRESS_ATTEMPTS {
        let candidate = DevAddr::with_nwk_id(rand::random(), net_id.nwk_id());
        if !store.exists(candidate).await? {
            return Ok(candidate);
        }
        debug!(dev_addr = %candidate, "device address collision, retrying");
    }
    Err(StorageError::AddressSpaceExhausted(MAX_ADDRESS_ATTEMPTS))
}

/// Store `session` under a freshly allocated address and return that address.
///
/// An address can be taken between the allocator's lookup and the `create`;
/// such collisions are retried like lookup collisions.
///
/// # Errors
///
/// Returns [`StorageError::AddressSpaceExhausted`] after
/// [`MAX_ADDRESS_ATTEMPTS`] lost races, or any other error from the store.
pub async fn create_with_new_address(
    store: &dyn SessionStore,
    net_id: NetId,
    session: &mut NodeSession,
) -> Result<DevAddr, StorageError> {
    for _ in 0..MAX_ADDRESS_ATTEMPTS {
        session.dev_addr = allocate_dev_addr(store, net_id).await?;
        match store.create(session.clone()).await {
            Err(StorageError::AddressInUse(dev_addr)) => {
                debug!(%dev_addr, "device address taken before create, retrying");
            }
            result => return result.map(|()| session.dev_addr),
        }
    }
    Err(StorageError::AddressSpaceExhausted(MAX_ADDRESS_ATTEMPTS))
}

struct StoredSession {
    session: NodeSession,
    expires_at: Instant,
}

impl StoredSession {
    fn is_live(&self, now: Instant) -> bool { self.expires_at > now }
}

/// Session store kept in process memory.
///
/// Entries expire `ttl` after their last `create` or `save`; an expired entry
/// behaves exactly like a deleted one and is pruned lazily on access or by
/// [`MemorySessionStore::purge_expired`].
pub struct MemorySessionStore {
    net_id: NetId,
    ttl: Duration,
    sessions: DashMap<DevAddr, StoredSession>,
    by_dev_eui: DashMap<Eui64, DevAddr>,
}

impl MemorySessionStore {
    /// Create a store accepting addresses of `net_id` and expiring entries after `ttl`.
    #[must_use]
    pub fn new(net_id: NetId, ttl: Duration) -> Self {
        Self {
            net_id,
            ttl,
            sessions: DashMap::new(),
            by_dev_eui: DashMap::new(),
        }
    }

    /// Time-to-live applied on every write.
    #[must_use]
    pub fn ttl(&self) -> Duration { self.ttl }

    /// Drop every expired session and its index entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.sessions.retain(|addr, stored| {
            let live = stored.is_live(now);
            if !live {
                expired.push((*addr, stored.session.dev_eui));
            }
            live
        });
        for (addr, dev_eui) in expired {
            self.by_dev_eui.remove_if(&dev_eui, |_, indexed| *indexed == addr);
        }
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.sessions.iter().filter(|e| e.is_live(now)).count()
    }

    /// Whether no live session is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn check_net_id(&self, session: &NodeSession) -> Result<(), StorageError> {
        if session.belongs_to(self.net_id) {
            Ok(())
        } else {
            Err(StorageError::InvalidNetId {
                dev_addr: session.dev_addr,
                net_id: self.net_id,
            })
        }
    }

    fn live(&self, dev_addr: DevAddr) -> Option<NodeSession> {
        let now = Instant::now();
        let guard = self.sessions.get(&dev_addr);
        let session = guard
            .as_ref()
            .filter(|stored| stored.is_live(now))
            .map(|stored| stored.session.clone());
        let present = guard.is_some();
        drop(guard);
        if present && session.is_none() {
            self.sessions.remove_if(&dev_addr, |_, stored| !stored.is_live(now));
        }
        session
    }

    /// Point the device index at `dev_addr` and drop the device's previous session.
    fn reindex(&self, dev_eui: Eui64, dev_addr: DevAddr) {
        if let Some(previous) = self.by_dev_eui.insert(dev_eui, dev_addr)
            && previous != dev_addr
        {
            self.sessions
                .remove_if(&previous, |_, stored| stored.session.dev_eui == dev_eui);
            debug!(%dev_eui, old_dev_addr = %previous, new_dev_addr = %dev_addr, "session replaced");
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, dev_addr: DevAddr) -> Result<NodeSession, StorageError> {
        self.live(dev_addr)
            .ok_or_else(|| StorageError::not_found("session", dev_addr))
    }

    async fn get_by_dev_eui(&self, dev_eui: Eui64) -> Result<NodeSession, StorageError> {
        let dev_addr = self
            .by_dev_eui
            .get(&dev_eui)
            .map(|addr| *addr)
            .ok_or_else(|| StorageError::not_found("session for device", dev_eui))?;
        self.live(dev_addr)
            .filter(|session| session.dev_eui == dev_eui)
            .ok_or_else(|| StorageError::not_found("session for device", dev_eui))
    }

    async fn exists(&self, dev_addr: DevAddr) -> Result<bool, StorageError> {
        Ok(self.live(dev_addr).is_some())
    }

    async fn create(&self, session: NodeSession) -> Result<(), StorageError> {
        self.check_net_id(&session)?;
        let now = Instant::now();
        let (dev_eui, dev_addr) = (session.dev_eui, session.dev_addr);
        let stored = StoredSession {
            session,
            expires_at: now + self.ttl,
        };
        match self.sessions.entry(dev_addr) {
            Entry::Occupied(entry)
                if entry.get().is_live(now) && entry.get().session.dev_eui != dev_eui =>
            {
                return Err(StorageError::AddressInUse(dev_addr));
            }
            Entry::Occupied(mut entry) => {
                entry.insert(stored);
            }
            Entry::Vacant(entry) => {
                entry.insert(stored);
            }
        }
        self.reindex(dev_eui, dev_addr);
        Ok(())
    }

    async fn save(&self, session: NodeSession) -> Result<(), StorageError> {
        self.check_net_id(&session)?;
        let (dev_eui, dev_addr) = (session.dev_eui, session.dev_addr);
        let index = self.by_dev_eui.entry(dev_eui);
        if let Entry::Occupied(current) = &index
            && *current.get() != dev_addr
        {
            return Err(StorageError::Superseded { dev_eui, dev_addr });
        }
        self.sessions.insert(
            dev_addr,
            StoredSession {
                session,
                expires_at: Instant::now() + self.ttl,
            },
        );
        index.or_insert(dev_addr);
        Ok(())
    }

    async fn delete(&self, dev_addr: DevAddr) -> Result<(), StorageError> {
        if let Some((_, stored)) = self.sessions.remove(&dev_addr) {
            self.by_dev_eui
                .remove_if(&stored.session.dev_eui, |_, indexed| *indexed == dev_addr);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rstest::{fixture, rstest};

    use super::*;
    use crate::{lorawan::AesKey, models::AdrState};

    const NET_ID: NetId = NetId::new([0x00, 0x00, 0x13]);
    const TTL: Duration = Duration::from_secs(60);

    #[fixture]
    fn store() -> MemorySessionStore { MemorySessionStore::new(NET_ID, TTL) }

    fn session(dev_eui: u8, dev_addr: DevAddr) -> NodeSession {
        NodeSession {
            dev_addr,
            dev_eui: Eui64::new([dev_eui; 8]),
            app_eui: Eui64::new([0xa1; 8]),
            nwk_s_key: AesKey::new([1; 16]),
            app_s_key: AesKey::new([2; 16]),
            fcnt_up: 0,
            fcnt_down: 0,
            rx_delay: 1,
            rx1_dr_offset: 0,
            adr: AdrState::default(),
            ack_pending: false,
            used_dev_nonces: Vec::new(),
        }
    }

    fn addr(last: u8) -> DevAddr { DevAddr::with_nwk_id([0, 0, 0, last], NET_ID.nwk_id()) }

    #[rstest]
    #[tokio::test]
    async fn create_then_lookup_by_address_and_device(store: MemorySessionStore) {
        let s = session(1, addr(1));
        store.create(s.clone()).await.expect("create");
        assert_eq!(store.get(addr(1)).await.expect("get"), s);
        assert_eq!(
            store.get_by_dev_eui(s.dev_eui).await.expect("get by eui"),
            s
        );
    }

    #[rstest]
    #[tokio::test]
    async fn create_rejects_foreign_network_address(store: MemorySessionStore) {
        let foreign = DevAddr::with_nwk_id([0, 0, 0, 1], 0x12);
        let err = store
            .create(session(1, foreign))
            .await
            .expect_err("foreign address must be rejected");
        assert!(matches!(err, StorageError::InvalidNetId { .. }));
        assert!(store.is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn create_replaces_previous_session_of_device(store: MemorySessionStore) {
        store.create(session(1, addr(1))).await.expect("first");
        store.create(session(1, addr(2))).await.expect("second");

        assert!(store.get(addr(1)).await.expect_err("replaced").is_not_found());
        assert_eq!(
            store
                .get_by_dev_eui(Eui64::new([1; 8]))
                .await
                .expect("current")
                .dev_addr,
            addr(2)
        );
        assert_eq!(store.len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn create_refuses_address_held_by_other_device(store: MemorySessionStore) {
        store.create(session(1, addr(1))).await.expect("first");
        let err = store
            .create(session(2, addr(1)))
            .await
            .expect_err("address is taken");
        assert!(matches!(err, StorageError::AddressInUse(a) if a == addr(1)));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn sessions_expire_after_ttl(store: MemorySessionStore) {
        store.create(session(1, addr(1))).await.expect("create");
        tokio::time::advance(TTL - Duration::from_secs(1)).await;
        assert!(store.exists(addr(1)).await.expect("exists"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.exists(addr(1)).await.expect("exists"));
        assert!(
            store
                .get_by_dev_eui(Eui64::new([1; 8]))
                .await
                .expect_err("expired")
                .is_not_found()
        );
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn save_refreshes_ttl(store: MemorySessionStore) {
        let mut s = session(1, addr(1));
        store.create(s.clone()).await.expect("create");
        tokio::time::advance(TTL / 2).await;
        s.fcnt_up = 9;
        store.save(s).await.expect("save");
        tokio::time::advance(TTL / 2 + Duration::from_secs(1)).await;

        assert_eq!(store.get(addr(1)).await.expect("still live").fcnt_up, 9);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn purge_drops_expired_entries(store: MemorySessionStore) {
        store.create(session(1, addr(1))).await.expect("create");
        tokio::time::advance(TTL * 2).await;
        store.purge_expired();
        assert!(store.sessions.is_empty());
        assert!(store.by_dev_eui.is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn delete_removes_index(store: MemorySessionStore) {
        store.create(session(1, addr(1))).await.expect("create");
        store.delete(addr(1)).await.expect("delete");
        store.delete(addr(1)).await.expect("second delete is a no-op");
        assert!(
            store
                .get_by_dev_eui(Eui64::new([1; 8]))
                .await
                .expect_err("deleted")
                .is_not_found()
        );
    }

    #[rstest]
    #[tokio::test]
    async fn allocated_addresses_carry_nwk_id(store: MemorySessionStore) {
        for _ in 0..64 {
            let dev_addr = allocate_dev_addr(&store, NET_ID).await.expect("allocate");
            assert_eq!(dev_addr.nwk_id(), NET_ID.nwk_id());
        }
    }

    #[rstest]
    #[tokio::test]
    async fn save_of_replaced_session_keeps_current_one(store: MemorySessionStore) {
        let mut stale = session(1, addr(1));
        store.create(stale.clone()).await.expect("first");
        store.create(session(1, addr(2))).await.expect("rejoin");

        stale.fcnt_up = 4;
        let err = store.save(stale).await.expect_err("stale session");

        assert!(matches!(err, StorageError::Superseded { dev_addr, .. } if dev_addr == addr(1)));
        assert!(!store.exists(addr(1)).await.expect("exists"));
        assert_eq!(
            store
                .get_by_dev_eui(Eui64::new([1; 8]))
                .await
                .expect("current")
                .dev_addr,
            addr(2)
        );
    }

    /// Session store whose first `create` calls lose the address to a
    /// concurrent activation.
    struct Contended {
        inner: MemorySessionStore,
        collisions: AtomicUsize,
    }

    #[async_trait]
    impl SessionStore for Contended {
        async fn get(&self, dev_addr: DevAddr) -> Result<NodeSession, StorageError> {
            self.inner.get(dev_addr).await
        }

        async fn get_by_dev_eui(&self, dev_eui: Eui64) -> Result<NodeSession, StorageError> {
            self.inner.get_by_dev_eui(dev_eui).await
        }

        async fn exists(&self, dev_addr: DevAddr) -> Result<bool, StorageError> {
            self.inner.exists(dev_addr).await
        }

        async fn create(&self, session: NodeSession) -> Result<(), StorageError> {
            let lost = self
                .collisions
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lost {
                return Err(StorageError::AddressInUse(session.dev_addr));
            }
            self.inner.create(session).await
        }

        async fn save(&self, session: NodeSession) -> Result<(), StorageError> {
            self.inner.save(session).await
        }

        async fn delete(&self, dev_addr: DevAddr) -> Result<(), StorageError> {
            self.inner.delete(dev_addr).await
        }
    }

    fn contended(collisions: usize) -> Contended {
        Contended {
            inner: MemorySessionStore::new(NET_ID, TTL),
            collisions: AtomicUsize::new(collisions),
        }
    }

    #[tokio::test]
    async fn create_retries_addresses_taken_concurrently() {
        let store = contended(3);
        let mut s = session(1, DevAddr::default());

        let dev_addr = create_with_new_address(&store, NET_ID, &mut s)
            .await
            .expect("fourth address is free");

        assert_eq!(s.dev_addr, dev_addr);
        assert_eq!(store.inner.get(dev_addr).await.expect("stored"), s);
        assert_eq!(store.collisions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn create_gives_up_after_repeated_races() {
        let store = contended(MAX_ADDRESS_ATTEMPTS);
        let mut s = session(1, DevAddr::default());

        let err = create_with_new_address(&store, NET_ID, &mut s)
            .await
            .expect_err("every attempt collides");

        assert!(matches!(err, StorageError::AddressSpaceExhausted(MAX_ADDRESS_ATTEMPTS)));
        assert!(store.inner.is_empty());
    }
}
