//! Per-integration session storage
//!
//! Integrations that log in (Pi-hole, qBittorrent, Proxmox tickets) cache the
//! resulting session token between calls. The store is injected so callers can
//! back it with anything; keys are namespaced by integration id.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Key/value storage for session tokens.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the value stored under `key`.
    async fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: String);

    /// Removes the value stored under `key`.
    async fn clear(&self, key: &str);
}

/// In-process session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries across all integrations.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: String) {
        self.entries.write().await.insert(key.to_string(), value);
    }

    async fn clear(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}

/// Session capability handed to one integration.
#[derive(Clone)]
pub struct SessionHandle {
    store: Arc<dyn SessionStore>,
    namespace: String,
}

impl SessionHandle {
    /// Creates a handle storing keys below `namespace`.
    pub fn new(store: Arc<dyn SessionStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.store.get(&self.key(key)).await
    }

    pub async fn set(&self, key: &str, value: impl Into<String>) {
        self.store.set(&self.key(key), value.into()).await
    }

    pub async fn clear(&self, key: &str) {
        self.store.clear(&self.key(key)).await
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
