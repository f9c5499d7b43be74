//! In-memory [`NodeRegistry`] used for tests and local runs.
//!
//! Provisioning methods stand in for the management API; the pipeline only
//! sees the read-only trait.

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};

use super::{NodeRegistry, StorageError};
use crate::{
    lorawan::Eui64,
    models::{Application, ChannelList, Node},
};

/// Device registry kept in process memory.
#[derive(Default)]
pub struct MemoryNodeRegistry {
    nodes: DashMap<Eui64, Node>,
    applications: DashMap<Eui64, Application>,
    channel_lists: DashMap<i64, ChannelList>,
}

fn insert_new<K, V>(
    map: &DashMap<K, V>,
    key: K,
    value: V,
    kind: &'static str,
) -> Result<(), StorageError>
where
    K: Eq + std::hash::Hash + std::fmt::Display + Clone,
{
    match map.entry(key.clone()) {
        Entry::Occupied(_) => Err(StorageError::already_exists(kind, key)),
        Entry::Vacant(entry) => {
            entry.insert(value);
            Ok(())
        }
    }
}

impl MemoryNodeRegistry {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register an application.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::AlreadyExists`] if the AppEUI is taken.
    pub fn create_application(&self, application: Application) -> Result<(), StorageError> {
        insert_new(
            &self.applications,
            application.app_eui,
            application,
            "application",
        )
    }

    /// Register a node.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::AlreadyExists`] if the DevEUI is taken.
    pub fn create_node(&self, node: Node) -> Result<(), StorageError> {
        insert_new(&self.nodes, node.dev_eui, node, "node")
    }

    /// Register a channel list.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::AlreadyExists`] if the id is taken.
    pub fn create_channel_list(&self, list: ChannelList) -> Result<(), StorageError> {
        insert_new(&self.channel_lists, list.id, list, "channel list")
    }

    /// Remove a node; returns whether it existed.
    pub fn delete_node(&self, dev_eui: Eui64) -> bool { self.nodes.remove(&dev_eui).is_some() }

    /// Remove an application; returns whether it existed.
    pub fn delete_application(&self, app_eui: Eui64) -> bool {
        self.applications.remove(&app_eui).is_some()
    }
}

#[async_trait]
impl NodeRegistry for MemoryNodeRegistry {
    async fn node(&self, dev_eui: Eui64) -> Result<Node, StorageError> {
        self.nodes
            .get(&dev_eui)
            .map(|node| node.clone())
            .ok_or_else(|| StorageError::not_found("node", dev_eui))
    }

    async fn application(&self, app_eui: Eui64) -> Result<Application, StorageError> {
        self.applications
            .get(&app_eui)
            .map(|app| app.clone())
            .ok_or_else(|| StorageError::not_found("application", app_eui))
    }

    async fn channel_list(&self, id: i64) -> Result<ChannelList, StorageError> {
        self.channel_lists
            .get(&id)
            .map(|list| list.clone())
            .ok_or_else(|| StorageError::not_found("channel list", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lorawan::AesKey;

    fn node() -> Node {
        Node {
            dev_eui: Eui64::new([0xe1; 8]),
            app_eui: Eui64::new([0xa1; 8]),
            app_key: AesKey::new([0x11; 16]),
            rx_delay: 1,
            rx1_dr_offset: 0,
            channel_list_id: None,
        }
    }

    #[tokio::test]
    async fn nodes_are_readable_after_creation() {
        let registry = MemoryNodeRegistry::new();
        registry.create_node(node()).expect("create");
        assert_eq!(registry.node(node().dev_eui).await.expect("read"), node());
    }

    #[tokio::test]
    async fn duplicate_nodes_are_rejected() {
        let registry = MemoryNodeRegistry::new();
        registry.create_node(node()).expect("create");
        let err = registry.create_node(node()).expect_err("duplicate");
        assert!(matches!(err, StorageError::AlreadyExists { kind: "node", .. }));
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let registry = MemoryNodeRegistry::new();
        assert!(registry.node(node().dev_eui).await.expect_err("missing").is_not_found());
        assert!(
            registry
                .application(node().app_eui)
                .await
                .expect_err("missing")
                .is_not_found()
        );
        assert!(registry.channel_list(1).await.expect_err("missing").is_not_found());
    }

    #[tokio::test]
    async fn deleted_nodes_disappear() {
        let registry = MemoryNodeRegistry::new();
        registry.create_node(node()).expect("create");
        assert!(registry.delete_node(node().dev_eui));
        assert!(!registry.delete_node(node().dev_eui));
        assert!(registry.node(node().dev_eui).await.is_err());
    }
}
