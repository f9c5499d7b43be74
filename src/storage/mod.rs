//! Contracts for the state the pipeline reads and writes.
//!
//! The pipeline never caches session or queue state between requests: every
//! access goes through one of these traits so the store stays the single
//! source of truth. In-memory implementations back tests and the demo binary;
//! networked stores plug in by implementing the same traits.

mod queue;
mod registry;
mod session;

use async_trait::async_trait;
use thiserror::Error;

pub use queue::MemoryQueueStore;
pub use registry::MemoryNodeRegistry;
pub use session::{
    MAX_ADDRESS_ATTEMPTS,
    MemorySessionStore,
    allocate_dev_addr,
    create_with_new_address,
};

use crate::{
    lorawan::{DevAddr, Eui64, NetId},
    models::{Application, ChannelList, MacPayload, Node, NodeSession, TxPayload},
};

/// Errors raised by the stores and the device registry.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested record does not exist (or its TTL elapsed).
    #[error("{kind} {key} not found")]
    NotFound {
        /// Record kind, such as `"node"` or `"session"`.
        kind: &'static str,
        /// Rendered key of the record.
        key: String,
    },
    /// The record already exists.
    #[error("{kind} {key} already exists")]
    AlreadyExists {
        /// Record kind.
        kind: &'static str,
        /// Rendered key of the record.
        key: String,
    },
    /// A session address does not carry the server's network identifier.
    #[error("device address {dev_addr} does not belong to network {net_id}")]
    InvalidNetId {
        /// Offending address.
        dev_addr: DevAddr,
        /// Configured network identifier.
        net_id: NetId,
    },
    /// Another device currently holds the address.
    #[error("device address {0} is held by another device")]
    AddressInUse(DevAddr),
    /// The device has been given a newer session since this one was read.
    #[error("session {dev_addr} of {dev_eui} has been superseded")]
    Superseded {
        /// Device owning both sessions.
        dev_eui: Eui64,
        /// Address of the stale session.
        dev_addr: DevAddr,
    },
    /// Address allocation gave up after repeated collisions.
    #[error("no free device address after {0} attempts")]
    AddressSpaceExhausted(usize),
    /// I/O failure in an external store.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub(crate) fn not_found(kind: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    pub(crate) fn already_exists(kind: &'static str, key: impl ToString) -> Self {
        Self::AlreadyExists {
            kind,
            key: key.to_string(),
        }
    }

    /// Returns true when the error means the record is absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound { .. }) }
}

/// Active device sessions keyed by dynamic address, with a secondary index by
/// device EUI and store-enforced TTL expiry.
///
/// Each call is atomic for its key, but a `get` followed by a `save` is not:
/// callers that read-modify-write a session must serialise themselves (see
/// [`crate::device_lock::DeviceLocks`]).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the session holding `dev_addr`.
    async fn get(&self, dev_addr: DevAddr) -> Result<NodeSession, StorageError>;

    /// Fetch the current session of a device.
    async fn get_by_dev_eui(&self, dev_eui: Eui64) -> Result<NodeSession, StorageError>;

    /// Whether any device currently holds `dev_addr`.
    async fn exists(&self, dev_addr: DevAddr) -> Result<bool, StorageError>;

    /// Store a new session, replacing the device's previous one.
    ///
    /// Fails with [`StorageError::InvalidNetId`] when the address does not
    /// carry the configured network identifier and with
    /// [`StorageError::AddressInUse`] when another device holds the address.
    async fn create(&self, session: NodeSession) -> Result<(), StorageError>;

    /// Upsert a session and refresh its TTL.
    ///
    /// Fails with [`StorageError::Superseded`] when the device's current
    /// session lives at another address; the current session is left intact.
    async fn save(&self, session: NodeSession) -> Result<(), StorageError>;

    /// Remove the session holding `dev_addr`; absent sessions are ignored.
    async fn delete(&self, dev_addr: DevAddr) -> Result<(), StorageError>;
}

/// Per-device FIFO queues of pending downlink application payloads and MAC
/// commands.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn enqueue_tx_payload(&self, payload: TxPayload) -> Result<(), StorageError>;

    async fn enqueue_mac_payload(&self, payload: MacPayload) -> Result<(), StorageError>;

    /// Pending application payloads, oldest first.
    async fn tx_payloads(&self, dev_eui: Eui64) -> Result<Vec<TxPayload>, StorageError>;

    /// Pending MAC commands, oldest first.
    async fn mac_payloads(&self, dev_eui: Eui64) -> Result<Vec<MacPayload>, StorageError>;

    /// Remove and return the oldest pending application payload.
    async fn dequeue_tx_payload(&self, dev_eui: Eui64) -> Result<Option<TxPayload>, StorageError>;

    /// Remove and return the oldest pending MAC command.
    async fn dequeue_mac_payload(&self, dev_eui: Eui64)
    -> Result<Option<MacPayload>, StorageError>;

    /// Drop every pending application payload of the device.
    async fn flush_tx_payloads(&self, dev_eui: Eui64) -> Result<(), StorageError>;

    /// Drop every pending MAC command of the device.
    async fn flush_mac_payloads(&self, dev_eui: Eui64) -> Result<(), StorageError>;
}

/// Read access to provisioned devices, applications and channel lists.
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    async fn node(&self, dev_eui: Eui64) -> Result<Node, StorageError>;

    async fn application(&self, app_eui: Eui64) -> Result<Application, StorageError>;

    async fn channel_list(&self, id: i64) -> Result<ChannelList, StorageError>;
}
