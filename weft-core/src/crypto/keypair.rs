//! Identity keypair
//!
//! Each identity holds one X25519 keypair used for wrapping and unwrapping
//! per-envelope content keys. Secret keys are zeroized on drop.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::Rng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::envelope::UserId;

/// Length of X25519 public and secret keys
pub const KEY_LEN: usize = 32;

/// X25519 keypair held by one identity.
///
/// The secret half never leaves the process; the keystore encrypts it at rest.
#[derive(Clone, Serialize, Deserialize)]
pub struct IdentityKeypair {
    /// Public key bytes (32 bytes)
    public: Vec<u8>,
    /// Secret key bytes (32 bytes), zeroized on drop
    secret: Vec<u8>,
}

impl IdentityKeypair {
    /// Generate a fresh keypair from the thread CSPRNG.
    pub fn generate() -> Self {
        let mut seed = [0u8; KEY_LEN];
        rand::rng().fill(&mut seed[..]);

        let secret = StaticSecret::from(seed);
        let public = X25519PublicKey::from(&secret);
        seed.zeroize();

        IdentityKeypair {
            public: public.to_bytes().to_vec(),
            secret: secret.to_bytes().to_vec(),
        }
    }

    /// Public key bytes.
    pub fn public_key(&self) -> &[u8] {
        &self.public
    }

    /// Public key in the base64 form carried on the wire.
    pub fn public_key_b64(&self) -> String {
        BASE64.encode(&self.public)
    }

    /// Secret key bytes (use carefully!)
    pub(crate) fn secret_key(&self) -> &[u8] {
        &self.secret
    }

    /// Serialize for keystore persistence.
    pub fn serialize(&self) -> Vec<u8> {
        bincode::serialize(self).expect("keypair serialization cannot fail")
    }

    /// Deserialize from keystore bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, String> {
        let kp: IdentityKeypair =
            bincode::deserialize(bytes).map_err(|e| format!("Failed to deserialize: {}", e))?;
        if kp.public.len() != KEY_LEN || kp.secret.len() != KEY_LEN {
            return Err("Invalid key length".to_string());
        }
        Ok(kp)
    }
}

impl fmt::Debug for IdentityKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeypair")
            .field("public", &hex::encode(&self.public))
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Drop for IdentityKeypair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// A participant: backend-issued id plus its keypair.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Stable identifier issued by the authoritative backend
    pub id: UserId,
    /// Keypair persisted for the life of the device installation
    pub keypair: IdentityKeypair,
}

impl Identity {
    pub fn new(id: impl Into<UserId>, keypair: IdentityKeypair) -> Self {
        Identity { id: id.into(), keypair }
    }

    /// Public key in wire form.
    pub fn public_key_b64(&self) -> String {
        self.keypair.public_key_b64()
    }
}
