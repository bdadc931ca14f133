//! Crypto engine: identity keys, hybrid envelope encryption, key wrapping.

pub mod engine;
pub mod keypair;
pub mod keystore;

pub use engine::{decrypt_payload, encrypt_payload, unwrap_key, wrap_key_for, ContentKey, EncryptedPayload};
pub use keypair::{Identity, IdentityKeypair};
pub use keystore::{FileKeystore, Keystore, KeystoreError, MemoryKeystore};
