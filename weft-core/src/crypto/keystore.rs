//! Keystore
//!
//! Persists identity keypairs keyed by owner id. `ensure_identity` is the
//! single creation path and is idempotent: a second call for the same owner
//! returns byte-identical key material.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use super::keypair::{Identity, IdentityKeypair};

/// Keystore errors
#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Other error: {0}")]
    Other(String),
}

/// Helper to convert poison errors into KeystoreError
fn handle_poison<T>(_err: PoisonError<T>) -> KeystoreError {
    KeystoreError::Other("Lock poisoned: a thread panicked while holding the lock".to_string())
}

/// Abstract keystore trait
pub trait Keystore: Send + Sync {
    /// Load the keypair persisted for `owner_id`.
    fn load_keypair(&self, owner_id: &str) -> Result<IdentityKeypair, KeystoreError>;

    /// Persist a keypair for `owner_id`.
    fn save_keypair(&self, owner_id: &str, kp: &IdentityKeypair) -> Result<(), KeystoreError>;

    /// List owner ids with persisted keys.
    fn list_owners(&self) -> Result<Vec<String>, KeystoreError>;

    /// Load `owner_id`'s identity, generating and persisting a keypair on
    /// first use. Never regenerates existing keys.
    fn ensure_identity(&self, owner_id: &str) -> Result<Identity, KeystoreError> {
        match self.load_keypair(owner_id) {
            Ok(kp) => Ok(Identity::new(owner_id, kp)),
            Err(KeystoreError::NotFound(_)) => {
                let kp = IdentityKeypair::generate();
                self.save_keypair(owner_id, &kp)?;
                Ok(Identity::new(owner_id, kp))
            }
            Err(e) => Err(e),
        }
    }
}

/// In-memory keystore (non-persistent, for tests and ephemeral sessions)
#[derive(Clone, Default)]
pub struct MemoryKeystore {
    keys: Arc<RwLock<HashMap<String, IdentityKeypair>>>,
}

impl MemoryKeystore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Keystore for MemoryKeystore {
    fn load_keypair(&self, owner_id: &str) -> Result<IdentityKeypair, KeystoreError> {
        self.keys
            .read()
            .map_err(handle_poison)?
            .get(owner_id)
            .cloned()
            .ok_or_else(|| KeystoreError::NotFound(owner_id.to_string()))
    }

    fn save_keypair(&self, owner_id: &str, kp: &IdentityKeypair) -> Result<(), KeystoreError> {
        self.keys
            .write()
            .map_err(handle_poison)?
            .insert(owner_id.to_string(), kp.clone());
        Ok(())
    }

    fn list_owners(&self) -> Result<Vec<String>, KeystoreError> {
        Ok(self.keys.read().map_err(handle_poison)?.keys().cloned().collect())
    }
}

/// File-backed keystore: one bincode file per owner under `dir`.
///
/// Owner ids are hex-encoded into the file name so arbitrary ids stay
/// path-safe.
pub struct FileKeystore {
    dir: PathBuf,
}

impl FileKeystore {
    /// Open (creating `dir` if needed).
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, KeystoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(FileKeystore { dir })
    }

    fn path_for(&self, owner_id: &str) -> PathBuf {
        self.dir.join(format!("{}.key", hex::encode(owner_id)))
    }
}

impl Keystore for FileKeystore {
    fn load_keypair(&self, owner_id: &str) -> Result<IdentityKeypair, KeystoreError> {
        let path = self.path_for(owner_id);
        if !path.exists() {
            return Err(KeystoreError::NotFound(owner_id.to_string()));
        }
        let bytes = std::fs::read(&path)?;
        IdentityKeypair::deserialize(&bytes).map_err(KeystoreError::Serialization)
    }

    fn save_keypair(&self, owner_id: &str, kp: &IdentityKeypair) -> Result<(), KeystoreError> {
        let tmp = self.dir.join(format!(".{}.tmp", hex::encode(owner_id)));
        std::fs::write(&tmp, kp.serialize())?;
        std::fs::rename(&tmp, self.path_for(owner_id))?;
        Ok(())
    }

    fn list_owners(&self) -> Result<Vec<String>, KeystoreError> {
        let mut owners = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".key") {
                if let Ok(raw) = hex::decode(stem) {
                    if let Ok(owner) = String::from_utf8(raw) {
                        owners.push(owner);
                    }
                }
            }
        }
        Ok(owners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_roundtrip() {
        let keystore = MemoryKeystore::new();
        let kp = IdentityKeypair::generate();
        keystore.save_keypair("alice", &kp).unwrap();
        let loaded = keystore.load_keypair("alice").unwrap();
        assert_eq!(kp.public_key(), loaded.public_key());
    }

    #[test]
    fn test_memory_missing_owner() {
        let keystore = MemoryKeystore::new();
        assert!(matches!(
            keystore.load_keypair("nobody"),
            Err(KeystoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_ensure_identity_idempotent() {
        let keystore = MemoryKeystore::new();
        let first = keystore.ensure_identity("alice").unwrap();
        let second = keystore.ensure_identity("alice").unwrap();
        assert_eq!(first.keypair.public_key(), second.keypair.public_key());
        assert_eq!(first.public_key_b64(), second.public_key_b64());
    }

    #[test]
    fn test_ensure_identity_distinct_owners() {
        let keystore = MemoryKeystore::new();
        let alice = keystore.ensure_identity("alice").unwrap();
        let bob = keystore.ensure_identity("bob").unwrap();
        assert_ne!(alice.keypair.public_key(), bob.keypair.public_key());
    }

    #[test]
    fn test_file_keystore_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();

        let first = {
            let keystore = FileKeystore::open(dir.path()).unwrap();
            keystore.ensure_identity("user/1").unwrap()
        };
        let second = {
            let keystore = FileKeystore::open(dir.path()).unwrap();
            keystore.ensure_identity("user/1").unwrap()
        };

        assert_eq!(first.keypair.public_key(), second.keypair.public_key());
    }

    #[test]
    fn test_file_keystore_lists_owners() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = FileKeystore::open(dir.path()).unwrap();
        keystore.ensure_identity("alice").unwrap();
        keystore.ensure_identity("bob").unwrap();

        let mut owners = keystore.list_owners().unwrap();
        owners.sort();
        assert_eq!(owners, vec!["alice".to_string(), "bob".to_string()]);
    }
}
