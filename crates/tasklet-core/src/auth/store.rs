//! Credential storage for the access token and the cached user profile.
//!
//! Only two keys are ever written: [`ACCESS_TOKEN_KEY`] and [`USER_PROFILE_KEY`].
//! Every backend treats reads and deletes of absent keys as success.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::error::StoreError;
use crate::config::{StorageBackend, StorageConfig, paths};

/// Key holding the raw bearer token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Key holding the serialized [`AuthUser`](super::AuthUser).
pub const USER_PROFILE_KEY: &str = "user_profile";

/// Async key/value storage for session secrets.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the value for `key`, or `None` if it was never set.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removes `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Builds the store selected in config.
pub fn open_store(config: &StorageConfig) -> Result<Box<dyn CredentialStore>, StoreError> {
    match config.backend {
        StorageBackend::Keyring => open_keyring(&config.keyring_service),
        StorageBackend::File => {
            warn!("using file credential store; tokens are not encrypted at rest");
            Ok(Box::new(FileStore::new(paths::credentials_path())))
        }
        StorageBackend::Memory => Ok(Box::new(MemoryStore::default())),
    }
}

#[cfg(feature = "keyring")]
fn open_keyring(service: &str) -> Result<Box<dyn CredentialStore>, StoreError> {
    Ok(Box::new(KeyringStore::new(service)))
}

#[cfg(not(feature = "keyring"))]
fn open_keyring(_service: &str) -> Result<Box<dyn CredentialStore>, StoreError> {
    Err(StoreError::Backend(
        "built without keyring support; set storage.backend = \"file\"".to_string(),
    ))
}

/// In-process store. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries().remove(key);
        Ok(())
    }
}

/// JSON map on disk with restricted permissions (0600).
///
/// Not encrypted; intended for hosts without a usable keyring. Writes go to a
/// sibling temp file that is renamed over the original, so a reader never sees
/// a half-written map.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs blocking file work off the async executor.
    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || op(&path))
            .await
            .map_err(|e| StoreError::Backend(format!("credential file task failed: {e}")))?
    }
}

fn load_entries(path: &Path) -> Result<HashMap<String, String>, StoreError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(HashMap::new());
    }
    Ok(serde_json::from_str(&contents)?)
}

/// Like [`load_entries`], but an unreadable map counts as empty so the next
/// write replaces it.
fn load_entries_for_update(path: &Path) -> Result<HashMap<String, String>, StoreError> {
    match load_entries(path) {
        Err(StoreError::Serialization(e)) => {
            warn!(path = %path.display(), "discarding corrupt credential file: {e}");
            Ok(HashMap::new())
        }
        other => other,
    }
}

fn save_entries(path: &Path, entries: &HashMap<String, String>) -> Result<(), StoreError> {
    if entries.is_empty() {
        if path.exists() {
            fs::remove_file(path)?;
        }
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = serde_json::to_string_pretty(entries)?;
    let tmp_path = path.with_extension("json.tmp");

    #[cfg(unix)]
    let mut file = {
        use std::os::unix::fs::OpenOptionsExt;
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp_path)?
    };

    #[cfg(not(unix))]
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.blocking(move |path| Ok(load_entries(path)?.remove(&key)))
            .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        self.blocking(move |path| {
            let mut entries = load_entries_for_update(path)?;
            entries.insert(key, value);
            save_entries(path, &entries)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.blocking(move |path| {
            let mut entries = match load_entries(path) {
                Ok(entries) => entries,
                Err(StoreError::Serialization(e)) => {
                    warn!(path = %path.display(), "removing corrupt credential file: {e}");
                    return save_entries(path, &HashMap::new());
                }
                Err(e) => return Err(e),
            };
            if entries.remove(&key).is_some() {
                save_entries(path, &entries)?;
            }
            Ok(())
        })
        .await
    }
}

/// Platform secure storage (Keychain, Credential Manager, Secret Service with a
/// keyutils cache on Linux).
///
/// Each key becomes one entry under `service`.
#[cfg(feature = "keyring")]
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

#[cfg(feature = "keyring")]
impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    async fn with_entry<T, F>(&self, key: &str, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(keyring::Entry) -> keyring::Result<T> + Send + 'static,
    {
        let service = self.service.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &key)?;
            op(entry)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("keyring task failed: {e}")))?
        .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[cfg(feature = "keyring")]
#[async_trait]
impl CredentialStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_entry(key, |entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let value = value.to_string();
        self.with_entry(key, move |entry| entry.set_password(&value))
            .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let removed = self
            .with_entry(key, |entry| match entry.delete_credential() {
                Ok(()) => Ok(true),
                Err(keyring::Error::NoEntry) => Ok(false),
                Err(e) => Err(e),
            })
            .await?;
        debug!(key, removed, "keyring delete");
        Ok(())
    }
}
