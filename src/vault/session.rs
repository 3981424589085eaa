use crate::core::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Ephemeral per-session store
///
/// Contents must not outlive the running session; nothing here is ever
/// written to disk.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Process-memory session store, cleared when the process exits
#[derive(Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_session_store_set_get_remove() {
        let store = MemorySessionStore::new();
        assert!(store.get("vault_session_key").await.unwrap().is_none());

        store.set("vault_session_key", json!([9, 9])).await.unwrap();
        assert_eq!(store.get("vault_session_key").await.unwrap(), Some(json!([9, 9])));

        store.remove("vault_session_key").await.unwrap();
        assert!(store.get("vault_session_key").await.unwrap().is_none());
    }
}
