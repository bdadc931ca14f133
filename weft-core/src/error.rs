//! Error types for the P2P envelope layer

use thiserror::Error;

/// Result type for P2P operations
pub type P2pResult<T> = Result<T, P2pError>;

/// Errors that can occur across the envelope layer.
///
/// `StoreUnavailable` and `Timeout` are retryable; everything else is a
/// terminal outcome for the call that produced it.
#[derive(Debug, Error)]
pub enum P2pError {
    /// Cryptographic primitives are inaccessible; fatal for the session
    #[error("Cryptographic backend unavailable: {0}")]
    CryptoUnavailable(String),

    /// The recipient's public key material is malformed
    #[error("Malformed recipient public key")]
    UnknownRecipientKey,

    /// No public key could be resolved for a recipient
    #[error("No public key available for recipient {0}")]
    RecipientKeyUnavailable(String),

    /// The caller holds no wrapped key for this envelope
    #[error("Access denied")]
    AccessDenied,

    /// Signature or AEAD authentication failed
    #[error("Integrity check failed")]
    IntegrityFailure,

    /// The authoritative store could not be reached
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A network call exceeded the configured deadline
    #[error("Operation timed out")]
    Timeout,

    /// A send was attempted with an empty recipient set
    #[error("Recipient list is empty")]
    NoRecipients,

    /// The envelope violates a data-model invariant
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Deletion was requested by an identity other than the sender
    #[error("Delete rejected: requester is not the sender")]
    DeleteRejected,

    /// No envelope exists under this id
    #[error("Envelope not found: {0}")]
    NotFound(String),

    /// The local cache has been closed
    #[error("Cache is closed")]
    CacheClosed,

    /// The overlay transport is not usable
    #[error("Overlay unavailable: {0}")]
    OverlayUnavailable(String),

    /// Keystore failure while loading or persisting identity keys
    #[error("Keystore error: {0}")]
    Keystore(#[from] crate::crypto::keystore::KeystoreError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (bug)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for P2pError {
    fn from(e: serde_json::Error) -> Self {
        P2pError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for P2pError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            P2pError::Timeout
        } else {
            P2pError::StoreUnavailable(e.to_string())
        }
    }
}

impl P2pError {
    /// True for failures the sync loop retries on its next tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, P2pError::StoreUnavailable(_) | P2pError::Timeout)
    }
}
