//! Storage substrate abstraction
//!
//! The engine only ever asks a store for namespace enumeration, get, put,
//! delete and key listing; every policy decision (freshness, supersession,
//! capacity) lives above this seam. `MemoryStore` is the in-process
//! implementation; anything that can answer these five calls can back the
//! engine.

use crate::error::Result;
use crate::types::StoredAsset;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One open namespace. Safe under concurrent invocation from in-flight
/// request handlers; no call holds a lock beyond its own duration.
#[async_trait]
pub trait NamespaceHandle: Send + Sync {
    /// Look up an entry by physical key. Returns an owned copy, so a
    /// concurrent delete cannot invalidate a payload already handed out.
    async fn get(&self, key: &str) -> Result<Option<StoredAsset>>;

    /// Insert an entry. Writes always create; superseding an old version is
    /// a separate delete.
    async fn put(&self, key: &str, entry: StoredAsset) -> Result<()>;

    /// Remove an entry. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// All physical keys, in deterministic (sorted) order.
    async fn list_keys(&self) -> Result<Vec<String>>;
}

/// A storage substrate multiplexing named namespaces.
#[async_trait]
pub trait AssetStore: Send + Sync {
    type Handle: NamespaceHandle;

    /// Open a namespace, creating it lazily on first use.
    async fn open(&self, namespace: &str) -> Result<Self::Handle>;

    /// Names of all namespaces currently known to the substrate.
    async fn list_namespaces(&self) -> Result<Vec<String>>;

    /// Destroy a namespace and everything in it. Returns whether it existed.
    async fn delete_namespace(&self, name: &str) -> Result<bool>;
}

type EntryMap = Arc<RwLock<BTreeMap<String, StoredAsset>>>;

/// In-memory storage substrate.
///
/// Cloning is cheap and every clone shares the same underlying namespaces.
#[derive(Clone, Default)]
pub struct MemoryStore {
    namespaces: Arc<RwLock<HashMap<String, EntryMap>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Handle onto one in-memory namespace. Holds the entry map directly, so an
/// open handle keeps working even if the namespace is deleted underneath it
/// (in-flight reads complete; the map is simply unreachable afterwards).
pub struct MemoryNamespace {
    entries: EntryMap,
}

#[async_trait]
impl AssetStore for MemoryStore {
    type Handle = MemoryNamespace;

    async fn open(&self, namespace: &str) -> Result<Self::Handle> {
        let mut namespaces = self.namespaces.write().await;
        let entries = namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(BTreeMap::new())))
            .clone();
        Ok(MemoryNamespace { entries })
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let namespaces = self.namespaces.read().await;
        let mut names: Vec<String> = namespaces.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool> {
        let mut namespaces = self.namespaces.write().await;
        Ok(namespaces.remove(name).is_some())
    }
}

#[async_trait]
impl NamespaceHandle for MemoryNamespace {
    async fn get(&self, key: &str) -> Result<Option<StoredAsset>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, entry: StoredAsset) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        Ok(entries.remove(key).is_some())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries.keys().cloned().collect())
    }
}
