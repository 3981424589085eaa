use crate::core::error::VaultError;
use crate::models::server::{duplicate_name, unique_by_name, ServerConfig};
use crate::stores::kv_store::KeyValueStore;
use crate::vault::crypto::{self, DerivedKey, EncryptedRecord, DEFAULT_ITERATIONS};
use crate::vault::session::SessionStore;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Persistent key holding the salt (array of bytes)
pub const SALT_KEY: &str = "vault_salt";
/// Persistent key holding the PBKDF2 iteration count the vault was created with
pub const KDF_ITERATIONS_KEY: &str = "vault_kdf_iterations";
/// Persistent key holding `{iv, ciphertext}`
pub const DATA_KEY: &str = "vault_data";
/// Pre-encryption plaintext server list
pub const LEGACY_SERVERS_KEY: &str = "servers";
/// Session key holding the exported derived key
pub const SESSION_KEY: &str = "vault_session_key";

/// Encrypted store of server configurations
///
/// Lifecycle: uninitialized -> `initialize` -> unlocked -> `lock` -> locked
/// -> `unlock` -> unlocked. The derived key lives only in the session store;
/// its absence is what "locked" means.
pub struct Vault {
    store: Arc<dyn KeyValueStore>,
    session: Arc<dyn SessionStore>,
    /// Used for new vaults; an existing vault keeps its persisted count
    iterations: u32,
    /// Serializes every operation that writes the record
    write_lock: Mutex<()>,
}

impl Vault {
    pub fn new(store: Arc<dyn KeyValueStore>, session: Arc<dyn SessionStore>) -> Self {
        Self::with_iterations(store, session, DEFAULT_ITERATIONS)
    }

    pub fn with_iterations(store: Arc<dyn KeyValueStore>, session: Arc<dyn SessionStore>, iterations: u32) -> Self {
        Self {
            store,
            session,
            iterations: iterations.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn is_initialized(&self) -> Result<bool, VaultError> {
        Ok(self.store.get(SALT_KEY).await?.is_some())
    }

    pub async fn is_locked(&self) -> Result<bool, VaultError> {
        Ok(self.session_key().await?.is_none())
    }

    /// Create the vault: fresh salt, derived key, encrypted initial list
    ///
    /// Leaves the vault unlocked.
    pub async fn initialize(&self, passphrase: &str, initial: &[ServerConfig]) -> Result<(), VaultError> {
        let _guard = self.write_lock.lock().await;

        if self.is_initialized().await? {
            return Err(VaultError::AlreadyInitialized);
        }
        reject_duplicates(initial)?;

        let salt = crypto::generate_salt();
        let key = crypto::derive_key(passphrase, &salt, self.iterations);
        let record = encrypt_servers(&key, initial)?;

        self.store.set(DATA_KEY, record_to_value(&record)?).await?;
        self.store.set(KDF_ITERATIONS_KEY, Value::from(self.iterations)).await?;
        self.store.set(SALT_KEY, bytes_to_value(&salt)).await?;
        self.store_session_key(&key).await?;

        info!(servers = initial.len(), "Vault initialized");
        Ok(())
    }

    /// Re-derive the key and prove it by decrypting the stored record
    pub async fn unlock(&self, passphrase: &str) -> Result<(), VaultError> {
        let salt = self.load_salt().await?;
        let iterations = self.load_iterations().await?;
        let key = crypto::derive_key(passphrase, &salt, iterations);
        let record = self.load_record().await?;

        if let Err(e) = crypto::decrypt(&key, &record) {
            warn!("Vault unlock rejected");
            return Err(e);
        }

        self.store_session_key(&key).await?;
        info!("Vault unlocked");
        Ok(())
    }

    /// Forget the session key; persisted salt and record stay untouched
    pub async fn lock(&self) -> Result<(), VaultError> {
        self.session.remove(SESSION_KEY).await?;
        info!("Vault locked");
        Ok(())
    }

    pub async fn get_servers(&self) -> Result<Vec<ServerConfig>, VaultError> {
        let key = self.require_key().await?;
        let record = self.load_record().await?;
        let plaintext = crypto::decrypt(&key, &record)?;

        serde_json::from_slice(&plaintext).map_err(|_| VaultError::InvalidPassword)
    }

    /// Re-encrypt `servers` under a fresh IV and replace the stored record
    ///
    /// Concurrent saves are serialized; the last one wins.
    pub async fn save_servers(&self, servers: &[ServerConfig]) -> Result<(), VaultError> {
        let _guard = self.write_lock.lock().await;

        reject_duplicates(servers)?;
        let key = self.require_key().await?;
        let record = encrypt_servers(&key, servers)?;
        self.store.set(DATA_KEY, record_to_value(&record)?).await?;

        debug!(servers = servers.len(), "Vault contents saved");
        Ok(())
    }

    /// Re-key the vault; the salt is kept and everything is re-encrypted at once
    pub async fn change_passphrase(&self, current: &str, new: &str) -> Result<(), VaultError> {
        let _guard = self.write_lock.lock().await;

        let salt = self.load_salt().await?;
        let iterations = self.load_iterations().await?;
        let old_key = crypto::derive_key(current, &salt, iterations);
        let record = self.load_record().await?;
        let plaintext = crypto::decrypt(&old_key, &record)?;

        let new_key = crypto::derive_key(new, &salt, iterations);
        let reencrypted = crypto::encrypt(&new_key, &plaintext)?;
        self.store.set(DATA_KEY, record_to_value(&reencrypted)?).await?;
        self.store_session_key(&new_key).await?;

        info!("Vault passphrase changed");
        Ok(())
    }

    /// Move a legacy plaintext server list into a new vault
    ///
    /// Returns `true` when a migration happened. Only the legacy server key is
    /// removed; other legacy settings stay where they are.
    pub async fn migrate_legacy(&self, passphrase: &str) -> Result<bool, VaultError> {
        if self.is_initialized().await? {
            return Ok(false);
        }

        let Some(legacy) = self.store.get(LEGACY_SERVERS_KEY).await? else {
            return Ok(false);
        };

        let servers: Vec<ServerConfig> = serde_json::from_value(legacy)
            .map_err(|e| VaultError::Serialization(format!("Legacy server list is unreadable: {}", e)))?;
        let (servers, dropped) = unique_by_name(servers);
        for name in &dropped {
            warn!(server = %name, "Dropping legacy server with a duplicate name");
        }

        self.initialize(passphrase, &servers).await?;
        self.store.remove(LEGACY_SERVERS_KEY).await?;

        info!(servers = servers.len(), "Legacy server list migrated into vault");
        Ok(true)
    }

    async fn session_key(&self) -> Result<Option<DerivedKey>, VaultError> {
        let Some(value) = self.session.get(SESSION_KEY).await? else {
            return Ok(None);
        };
        let bytes = value_to_bytes(&value).ok_or(VaultError::Locked)?;
        Ok(crypto::key_from_bytes(&bytes))
    }

    async fn require_key(&self) -> Result<DerivedKey, VaultError> {
        self.session_key().await?.ok_or(VaultError::Locked)
    }

    async fn store_session_key(&self, key: &DerivedKey) -> Result<(), VaultError> {
        self.session.set(SESSION_KEY, bytes_to_value(&key[..])).await?;
        Ok(())
    }

    async fn load_salt(&self) -> Result<Vec<u8>, VaultError> {
        let value = self.store.get(SALT_KEY).await?.ok_or(VaultError::NotInitialized)?;
        value_to_bytes(&value).ok_or(VaultError::InvalidPassword)
    }

    /// Vaults written before the count was persisted fall back to the configured one
    async fn load_iterations(&self) -> Result<u32, VaultError> {
        match self.store.get(KDF_ITERATIONS_KEY).await? {
            None => Ok(self.iterations),
            Some(value) => value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .ok_or(VaultError::InvalidPassword),
        }
    }

    async fn load_record(&self) -> Result<EncryptedRecord, VaultError> {
        let value = self.store.get(DATA_KEY).await?.ok_or(VaultError::NotInitialized)?;
        serde_json::from_value(value).map_err(|_| VaultError::InvalidPassword)
    }
}

/// Snapshots are keyed by server name, so names must be unique
fn reject_duplicates(servers: &[ServerConfig]) -> Result<(), VaultError> {
    match duplicate_name(servers) {
        Some(name) => Err(VaultError::DuplicateServer(name.to_string())),
        None => Ok(()),
    }
}

fn encrypt_servers(key: &DerivedKey, servers: &[ServerConfig]) -> Result<EncryptedRecord, VaultError> {
    let plaintext = zeroize::Zeroizing::new(
        serde_json::to_vec(servers).map_err(|e| VaultError::Serialization(e.to_string()))?,
    );
    crypto::encrypt(key, &plaintext)
}

fn record_to_value(record: &EncryptedRecord) -> Result<Value, VaultError> {
    serde_json::to_value(record).map_err(|e| VaultError::Serialization(e.to_string()))
}

fn bytes_to_value(bytes: &[u8]) -> Value {
    Value::Array(bytes.iter().map(|b| Value::from(*b)).collect())
}

fn value_to_bytes(value: &Value) -> Option<Vec<u8>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::kv_store::MemoryStore;
    use crate::vault::session::MemorySessionStore;
    use serde_json::json;

    const TEST_ITERATIONS: u32 = 1_000;

    fn vault() -> (Vault, Arc<MemoryStore>, Arc<MemorySessionStore>) {
        let store = Arc::new(MemoryStore::new());
        let session = Arc::new(MemorySessionStore::new());
        let vault = Vault::with_iterations(store.clone(), session.clone(), TEST_ITERATIONS);
        (vault, store, session)
    }

    fn servers() -> Vec<ServerConfig> {
        vec![
            ServerConfig::new("home", "qbittorrent", "http://nas:8080").with_credentials("admin", "hunter2"),
            ServerConfig::new("seedbox", "rtorrent", "https://seed.example/RPC2"),
        ]
    }

    #[tokio::test]
    async fn test_state_machine() {
        let (vault, _, _) = vault();
        assert!(!vault.is_initialized().await.unwrap());
        assert!(vault.is_locked().await.unwrap());

        vault.initialize("pw", &servers()).await.unwrap();
        assert!(vault.is_initialized().await.unwrap());
        assert!(!vault.is_locked().await.unwrap());

        vault.lock().await.unwrap();
        assert!(vault.is_locked().await.unwrap());
        assert!(vault.is_initialized().await.unwrap());

        vault.unlock("pw").await.unwrap();
        assert!(!vault.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_initialize_then_unlock_returns_same_servers() {
        let (vault, _, _) = vault();
        vault.initialize("correct horse", &servers()).await.unwrap();
        vault.lock().await.unwrap();

        vault.unlock("correct horse").await.unwrap();
        assert_eq!(vault.get_servers().await.unwrap(), servers());
    }

    #[tokio::test]
    async fn test_wrong_passphrase_stays_locked() {
        let (vault, _, _) = vault();
        vault.initialize("right", &servers()).await.unwrap();
        vault.lock().await.unwrap();

        let err = vault.unlock("wrong").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid password or corrupted data");
        assert!(vault.is_locked().await.unwrap());
        assert!(matches!(vault.get_servers().await, Err(VaultError::Locked)));
    }

    #[tokio::test]
    async fn test_corrupted_record_reports_same_error() {
        let (vault, store, _) = vault();
        vault.initialize("pw", &servers()).await.unwrap();
        vault.lock().await.unwrap();

        let mut record: EncryptedRecord =
            serde_json::from_value(store.get(DATA_KEY).await.unwrap().unwrap()).unwrap();
        record.ciphertext[3] ^= 0x01;
        store.set(DATA_KEY, serde_json::to_value(&record).unwrap()).await.unwrap();

        let err = vault.unlock("pw").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid password or corrupted data");
        assert!(vault.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn test_locked_operations_fail() {
        let (vault, _, _) = vault();
        vault.initialize("pw", &[]).await.unwrap();
        vault.lock().await.unwrap();

        assert!(matches!(vault.get_servers().await, Err(VaultError::Locked)));
        assert!(matches!(vault.save_servers(&servers()).await, Err(VaultError::Locked)));
    }

    #[tokio::test]
    async fn test_unlock_uninitialized() {
        let (vault, _, _) = vault();
        assert!(matches!(vault.unlock("pw").await, Err(VaultError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_double_initialize_refused_and_salt_kept() {
        let (vault, store, _) = vault();
        vault.initialize("pw", &[]).await.unwrap();
        let salt = store.get(SALT_KEY).await.unwrap();

        assert!(matches!(
            vault.initialize("other", &servers()).await,
            Err(VaultError::AlreadyInitialized)
        ));
        assert_eq!(store.get(SALT_KEY).await.unwrap(), salt);
    }

    #[tokio::test]
    async fn test_consecutive_saves_use_fresh_ivs() {
        let (vault, store, _) = vault();
        vault.initialize("pw", &[]).await.unwrap();

        vault.save_servers(&servers()).await.unwrap();
        let first: EncryptedRecord = serde_json::from_value(store.get(DATA_KEY).await.unwrap().unwrap()).unwrap();
        vault.save_servers(&servers()).await.unwrap();
        let second: EncryptedRecord = serde_json::from_value(store.get(DATA_KEY).await.unwrap().unwrap()).unwrap();

        assert_ne!(first.iv, second.iv);
        assert_eq!(vault.get_servers().await.unwrap(), servers());
    }

    #[tokio::test]
    async fn test_persisted_layout() {
        let (vault, store, session) = vault();
        vault.initialize("pw", &servers()).await.unwrap();

        let salt = store.get(SALT_KEY).await.unwrap().unwrap();
        assert_eq!(salt.as_array().unwrap().len(), crypto::SALT_LEN);

        let data = store.get(DATA_KEY).await.unwrap().unwrap();
        assert_eq!(data["iv"].as_array().unwrap().len(), crypto::IV_LEN);
        assert!(data["ciphertext"].as_array().is_some());

        // key lives in the session store only
        let key = session.get(SESSION_KEY).await.unwrap().unwrap();
        assert_eq!(key.as_array().unwrap().len(), crypto::KEY_LEN);
        assert_ne!(store.get(SESSION_KEY).await.unwrap(), Some(key));

        // no plaintext credential on disk
        assert!(!data.to_string().contains("hunter2"));
    }

    #[tokio::test]
    async fn test_lock_keeps_persisted_state() {
        let (vault, store, _) = vault();
        vault.initialize("pw", &servers()).await.unwrap();
        let before = (store.get(SALT_KEY).await.unwrap(), store.get(DATA_KEY).await.unwrap());

        vault.lock().await.unwrap();

        let after = (store.get(SALT_KEY).await.unwrap(), store.get(DATA_KEY).await.unwrap());
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_reopen_with_other_iteration_setting() {
        let (vault, store, _) = vault();
        vault.initialize("pw", &servers()).await.unwrap();
        assert_eq!(store.get(KDF_ITERATIONS_KEY).await.unwrap(), Some(json!(TEST_ITERATIONS)));

        let reopened = Vault::with_iterations(store.clone(), Arc::new(MemorySessionStore::new()), 2_000);
        reopened.unlock("pw").await.unwrap();
        assert_eq!(reopened.get_servers().await.unwrap(), servers());

        reopened.change_passphrase("pw", "next").await.unwrap();
        assert_eq!(store.get(KDF_ITERATIONS_KEY).await.unwrap(), Some(json!(TEST_ITERATIONS)));
        reopened.lock().await.unwrap();
        reopened.unlock("next").await.unwrap();
    }

    #[tokio::test]
    async fn test_change_passphrase() {
        let (vault, store, _) = vault();
        vault.initialize("old", &servers()).await.unwrap();
        let salt = store.get(SALT_KEY).await.unwrap();

        assert!(matches!(
            vault.change_passphrase("nope", "new").await,
            Err(VaultError::InvalidPassword)
        ));

        vault.change_passphrase("old", "new").await.unwrap();
        assert_eq!(store.get(SALT_KEY).await.unwrap(), salt);
        assert_eq!(vault.get_servers().await.unwrap(), servers());

        vault.lock().await.unwrap();
        assert!(vault.unlock("old").await.is_err());
        vault.unlock("new").await.unwrap();
        assert_eq!(vault.get_servers().await.unwrap(), servers());
    }

    #[tokio::test]
    async fn test_migrate_legacy_servers() {
        let (vault, store, _) = vault();
        store
            .set(LEGACY_SERVERS_KEY, serde_json::to_value(servers()).unwrap())
            .await
            .unwrap();
        store.set("settings", json!({"poll_interval": 5})).await.unwrap();

        assert!(vault.migrate_legacy("pw").await.unwrap());

        assert_eq!(store.get(LEGACY_SERVERS_KEY).await.unwrap(), None);
        assert_eq!(store.get("settings").await.unwrap(), Some(json!({"poll_interval": 5})));
        assert_eq!(vault.get_servers().await.unwrap(), servers());

        // second run is a no-op
        assert!(!vault.migrate_legacy("pw").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_names_are_refused() {
        let (vault, store, _) = vault();
        let mut twins = servers();
        twins[1].name = "home".to_string();

        assert!(matches!(
            vault.initialize("pw", &twins).await,
            Err(VaultError::DuplicateServer(ref name)) if name == "home"
        ));
        assert!(!vault.is_initialized().await.unwrap());

        vault.initialize("pw", &servers()).await.unwrap();
        assert!(matches!(
            vault.save_servers(&twins).await,
            Err(VaultError::DuplicateServer(_))
        ));
        assert_eq!(vault.get_servers().await.unwrap(), servers());
        assert!(store.get(DATA_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_migrate_keeps_first_of_duplicate_legacy_names() {
        let (vault, store, _) = vault();
        let mut legacy = servers();
        legacy.push(ServerConfig::new("home", "flood", "http://other:3000"));
        store
            .set(LEGACY_SERVERS_KEY, serde_json::to_value(&legacy).unwrap())
            .await
            .unwrap();

        assert!(vault.migrate_legacy("pw").await.unwrap());
        assert_eq!(vault.get_servers().await.unwrap(), servers());
    }

    #[tokio::test]
    async fn test_migrate_without_legacy_data() {
        let (vault, _, _) = vault();
        assert!(!vault.migrate_legacy("pw").await.unwrap());
        assert!(!vault.is_initialized().await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_saves_last_write_wins() {
        let (vault, _, _) = vault();
        vault.initialize("pw", &[]).await.unwrap();
        let vault = Arc::new(vault);

        let mut handles = Vec::new();
        for i in 0..8 {
            let vault = Arc::clone(&vault);
            handles.push(tokio::spawn(async move {
                let list = vec![ServerConfig::new(format!("s{}", i), "aria2", "http://a:6800")];
                vault.save_servers(&list).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let saved = vault.get_servers().await.unwrap();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].name.starts_with('s'));
    }
}
