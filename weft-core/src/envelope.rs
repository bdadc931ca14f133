//! Envelope data model
//!
//! An envelope is one encrypted, multi-recipient message/metadata record:
//! the payload is sealed once under a fresh symmetric key, and that key is
//! wrapped per recipient. Field names serialize as camelCase to match the
//! backend REST boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{P2pError, P2pResult};

/// Correlation identifier used as the primary key across store, cache and overlay.
pub type EnvelopeId = String;

/// Stable participant identifier issued by the authoritative backend.
pub type UserId = String;

/// One encrypted, multi-recipient record.
///
/// Immutable once created; "update" is modeled as delete + recreate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Primary key across store/cache/overlay
    pub id: EnvelopeId,

    /// Symmetrically encrypted payload, base64
    pub ciphertext: String,

    /// AEAD nonce, base64
    pub iv: String,

    /// Sender's public key material, base64
    pub sender_public_key: String,

    /// Identity that created the envelope; the only identity allowed to delete it
    pub sender_id: UserId,

    /// Ordered, duplicate-free, non-empty recipient set
    pub recipients: Vec<UserId>,

    /// Recipient id -> that recipient's wrapped copy of the content key.
    /// Domain must exactly equal `recipients`.
    pub wrapped_keys: BTreeMap<UserId, String>,

    /// The sender's own wrapped copy of the content key, so the author can
    /// read back what it sent without appearing in `recipients`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_key: Option<String>,

    /// Sender-assigned creation instant, epoch milliseconds
    pub timestamp: u64,

    /// Opaque application payload (post content, comment text, ...);
    /// not validated by this layer
    pub metadata: serde_json::Value,

    /// Hex SHA-256 over the canonical subset; detects corruption, not forgery
    pub signature: String,
}

impl Envelope {
    /// Canonical byte form hashed into `signature`.
    ///
    /// Fixed field order with sorted recipients, so the same logical envelope
    /// hashes identically regardless of construction order.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut sorted = self.recipients.clone();
        sorted.sort();

        let mut buf = Vec::with_capacity(128);
        for field in [
            self.id.as_str(),
            self.iv.as_str(),
            self.sender_public_key.as_str(),
            self.sender_id.as_str(),
        ] {
            buf.extend_from_slice(field.as_bytes());
            buf.push(b'|');
        }
        buf.extend_from_slice(sorted.join(",").as_bytes());
        buf.push(b'|');
        buf.extend_from_slice(self.timestamp.to_string().as_bytes());
        buf
    }

    /// Compute the canonical hash for the current field values.
    pub fn compute_signature(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes());
        hex::encode(hasher.finalize())
    }

    /// Check the stored signature against the canonical hash.
    pub fn verify_signature(&self) -> bool {
        // Constant-time comparison is not required: the hash is a corruption
        // check over public fields, not a secret.
        self.signature == self.compute_signature()
    }

    /// True when `user` may attempt decryption of this envelope.
    ///
    /// The sender is authorized through its own `sender_key` copy; everyone
    /// else must appear in both `recipients` and `wrapped_keys`.
    pub fn is_authorized(&self, user: &str) -> bool {
        user == self.sender_id || self.is_recipient(user)
    }

    /// True when `user` appears in both `recipients` and `wrapped_keys`.
    ///
    /// Unlike [`Envelope::is_authorized`] this gives the claimed sender no
    /// shortcut, so it is the check for envelopes arriving from untrusted
    /// sources: `sender_id` is attacker-controlled there.
    pub fn is_recipient(&self, user: &str) -> bool {
        self.recipients.iter().any(|r| r == user) && self.wrapped_keys.contains_key(user)
    }

    /// The wrapped content key `user` should unwrap, if any.
    pub fn wrapped_key_for(&self, user: &str) -> Option<&str> {
        if user == self.sender_id {
            self.sender_key.as_deref()
        } else {
            self.wrapped_keys.get(user).map(String::as_str)
        }
    }

    /// Enforce the data-model invariants.
    ///
    /// Must pass before an envelope is persisted or accepted from any source.
    pub fn validate(&self) -> P2pResult<()> {
        if self.id.is_empty() {
            return Err(P2pError::InvalidEnvelope("empty id".to_string()));
        }
        if self.sender_id.is_empty() {
            return Err(P2pError::InvalidEnvelope("empty sender id".to_string()));
        }
        if self.recipients.is_empty() {
            return Err(P2pError::InvalidEnvelope("no recipients".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for r in &self.recipients {
            if !seen.insert(r.as_str()) {
                return Err(P2pError::InvalidEnvelope(format!(
                    "duplicate recipient: {}",
                    r
                )));
            }
        }

        // wrapped_keys domain must exactly equal the recipient set
        for r in &self.recipients {
            if !self.wrapped_keys.contains_key(r) {
                return Err(P2pError::InvalidEnvelope(format!(
                    "missing wrapped key for recipient: {}",
                    r
                )));
            }
        }
        for k in self.wrapped_keys.keys() {
            if !seen.contains(k.as_str()) {
                return Err(P2pError::InvalidEnvelope(format!(
                    "wrapped key for non-recipient: {}",
                    k
                )));
            }
        }

        Ok(())
    }
}
