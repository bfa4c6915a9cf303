//! Persistence media backing the credential store.
//!
//! A medium is a synchronous string key/value surface. Failures are
//! reported to the caller; the credential store decides to fail soft.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use keyring::Entry;
use tracing::debug;

use super::error::StorageError;

/// Service name for keychain entries
const KEYRING_SERVICE: &str = "pricewatch";

/// Session file name in the data directory
const SESSION_FILE: &str = "session.json";

pub trait PersistenceMedium: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// ============================================================================
// MemoryMedium
// ============================================================================

/// In-process medium. Can be flipped to unavailable to mimic a disabled store.
#[derive(Default)]
pub struct MemoryMedium {
    values: Mutex<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl PersistenceMedium for MemoryMedium {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.lock().remove(key);
        Ok(())
    }
}

// ============================================================================
// FileMedium
// ============================================================================

/// JSON object on disk, rewritten on every change.
pub struct FileMedium {
    path: PathBuf,
    // Serialises read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl FileMedium {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Session file inside the given data directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(SESSION_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn store(&self, values: &HashMap<String, String>) -> Result<(), StorageError> {
        if values.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl PersistenceMedium for FileMedium {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut values = self.load()?;
        values.insert(key.to_string(), value.to_string());
        self.store(&values)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut values = self.load()?;
        if values.remove(key).is_some() {
            self.store(&values)?;
        }
        Ok(())
    }
}

// ============================================================================
// KeyringMedium
// ============================================================================

/// OS keychain, one entry per key.
pub struct KeyringMedium {
    service: String,
}

impl KeyringMedium {
    pub fn new() -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StorageError> {
        Ok(Entry::new(&self.service, key)?)
    }
}

impl Default for KeyringMedium {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceMedium for KeyringMedium {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entry(key)?.set_password(value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => {
                debug!(key, error = %e, "Failed to delete keychain entry");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_session_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("pricewatch-test-{}-{}", name, std::process::id()))
            .join(SESSION_FILE)
    }

    #[test]
    fn test_memory_medium_roundtrip() {
        let medium = MemoryMedium::new();
        assert_eq!(medium.get("token").unwrap(), None);
        medium.set("token", "abc").unwrap();
        assert_eq!(medium.get("token").unwrap().as_deref(), Some("abc"));
        medium.remove("token").unwrap();
        assert!(medium.is_empty());
    }

    #[test]
    fn test_memory_medium_unavailable() {
        let medium = MemoryMedium::new();
        medium.set_available(false);
        assert!(matches!(medium.get("token"), Err(StorageError::Unavailable)));
        assert!(matches!(medium.set("token", "x"), Err(StorageError::Unavailable)));
        medium.set_available(true);
        assert!(medium.get("token").unwrap().is_none());
    }

    #[test]
    fn test_file_medium_persists_across_instances() {
        let path = temp_session_path("persist");
        let _ = std::fs::remove_file(&path);

        let medium = FileMedium::new(path.clone());
        medium.set("token", "abc").unwrap();
        medium.set("refresh_token", "def").unwrap();

        let reopened = FileMedium::new(path.clone());
        assert_eq!(reopened.get("token").unwrap().as_deref(), Some("abc"));
        assert_eq!(reopened.get("refresh_token").unwrap().as_deref(), Some("def"));

        reopened.remove("token").unwrap();
        reopened.remove("refresh_token").unwrap();
        // Removing the last key deletes the file
        assert!(!path.exists());
    }

    #[test]
    fn test_file_medium_corrupt_file() {
        let path = temp_session_path("corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json").unwrap();

        let medium = FileMedium::new(path.clone());
        assert!(matches!(medium.get("token"), Err(StorageError::Serialization(_))));

        std::fs::remove_file(&path).unwrap();
    }
}
