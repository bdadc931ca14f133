//! Crypto engine
//!
//! Hybrid encryption for multi-recipient envelopes: the payload is sealed
//! once under a fresh AES-256-GCM key, and that content key is wrapped per
//! recipient with an X25519 sealed box (ephemeral ECDH + HKDF-SHA256 +
//! AES-256-GCM). Encrypting once and wrapping a 32-byte key N times avoids
//! re-encrypting the full payload per recipient.
//!
//! No knowledge of transport or storage lives here.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hkdf::Hkdf;
use rand::Rng;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::keypair::{IdentityKeypair, KEY_LEN};
use crate::error::{P2pError, P2pResult};

/// AES-256 key size
const CONTENT_KEY_LEN: usize = 32;

/// AES-GCM nonce size (96 bits)
const NONCE_LEN: usize = 12;

/// AEAD tag size
const TAG_LEN: usize = 16;

/// Domain separation label for the key-wrap KDF
const WRAP_INFO: &[u8] = b"weft envelope key wrap v1";

/// A per-envelope symmetric content key. Never reused across envelopes;
/// zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ContentKey([u8; CONTENT_KEY_LEN]);

impl ContentKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: [u8; CONTENT_KEY_LEN]) -> Self {
        ContentKey(bytes)
    }
}

/// Result of sealing a payload: raw ciphertext/nonce plus the in-memory
/// content key for subsequent wrapping.
pub struct EncryptedPayload {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; NONCE_LEN],
    pub key: ContentKey,
}

/// Seal `plaintext` under a fresh content key and nonce.
pub fn encrypt_payload(plaintext: &[u8]) -> P2pResult<EncryptedPayload> {
    let mut key_bytes = [0u8; CONTENT_KEY_LEN];
    let mut iv = [0u8; NONCE_LEN];
    rand::rng().fill(&mut key_bytes[..]);
    rand::rng().fill(&mut iv[..]);

    let cipher = Aes256Gcm::new_from_slice(&key_bytes)
        .map_err(|e| P2pError::CryptoUnavailable(e.to_string()))?;

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| P2pError::CryptoUnavailable(e.to_string()))?;

    Ok(EncryptedPayload { ciphertext, iv, key: ContentKey(key_bytes) })
}

/// Open a sealed payload. Fails `IntegrityFailure` when the AEAD tag does
/// not authenticate (tamper or wrong key).
pub fn decrypt_payload(ciphertext: &[u8], iv: &[u8], key: &ContentKey) -> P2pResult<Vec<u8>> {
    if iv.len() != NONCE_LEN {
        return Err(P2pError::IntegrityFailure);
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| P2pError::CryptoUnavailable(e.to_string()))?;

    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| P2pError::IntegrityFailure)
}

/// Wrap a content key for one recipient.
///
/// Blob layout: ephemeral public key (32) || nonce (12) || sealed key (48),
/// base64-encoded. The recipient's public key is bound in as AAD so a blob
/// cannot be replayed against a different identity.
pub fn wrap_key_for(key: &ContentKey, recipient_public_key_b64: &str) -> P2pResult<String> {
    let recipient_bytes = BASE64
        .decode(recipient_public_key_b64)
        .map_err(|_| P2pError::UnknownRecipientKey)?;
    let recipient_arr: [u8; KEY_LEN] = recipient_bytes
        .as_slice()
        .try_into()
        .map_err(|_| P2pError::UnknownRecipientKey)?;
    let recipient_public = X25519PublicKey::from(recipient_arr);

    let mut eph_seed = [0u8; KEY_LEN];
    rand::rng().fill(&mut eph_seed[..]);
    let eph_secret = StaticSecret::from(eph_seed);
    let eph_public = X25519PublicKey::from(&eph_secret);
    eph_seed.zeroize();

    let shared = eph_secret.diffie_hellman(&recipient_public);
    let wrap_key = derive_wrap_key(shared.as_bytes())?;

    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill(&mut nonce[..]);

    let cipher = Aes256Gcm::new_from_slice(&wrap_key)
        .map_err(|e| P2pError::CryptoUnavailable(e.to_string()))?;
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload { msg: key.as_bytes(), aad: &recipient_arr },
        )
        .map_err(|e| P2pError::CryptoUnavailable(e.to_string()))?;

    let mut blob = Vec::with_capacity(KEY_LEN + NONCE_LEN + sealed.len());
    blob.extend_from_slice(eph_public.as_bytes());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&sealed);
    Ok(BASE64.encode(blob))
}

/// Unwrap a content key with our own private key.
///
/// Any failure surfaces as `AccessDenied`: a wrong key and a corrupted blob
/// are indistinguishable at this layer.
pub fn unwrap_key(wrapped_b64: &str, own_keys: &IdentityKeypair) -> P2pResult<ContentKey> {
    let blob = BASE64.decode(wrapped_b64).map_err(|_| P2pError::AccessDenied)?;
    if blob.len() != KEY_LEN + NONCE_LEN + CONTENT_KEY_LEN + TAG_LEN {
        return Err(P2pError::AccessDenied);
    }

    let eph_arr: [u8; KEY_LEN] = blob[..KEY_LEN]
        .try_into()
        .map_err(|_| P2pError::AccessDenied)?;
    let nonce = &blob[KEY_LEN..KEY_LEN + NONCE_LEN];
    let sealed = &blob[KEY_LEN + NONCE_LEN..];

    let secret_arr: [u8; KEY_LEN] = own_keys
        .secret_key()
        .try_into()
        .map_err(|_| P2pError::AccessDenied)?;
    let own_secret = StaticSecret::from(secret_arr);
    let own_public: [u8; KEY_LEN] = own_keys
        .public_key()
        .try_into()
        .map_err(|_| P2pError::AccessDenied)?;

    let shared = own_secret.diffie_hellman(&X25519PublicKey::from(eph_arr));
    let wrap_key = derive_wrap_key(shared.as_bytes())?;

    let cipher = Aes256Gcm::new_from_slice(&wrap_key)
        .map_err(|e| P2pError::CryptoUnavailable(e.to_string()))?;
    let key_bytes = cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad: &own_public })
        .map_err(|_| P2pError::AccessDenied)?;

    let key_arr: [u8; CONTENT_KEY_LEN] = key_bytes
        .as_slice()
        .try_into()
        .map_err(|_| P2pError::AccessDenied)?;
    Ok(ContentKey(key_arr))
}

fn derive_wrap_key(shared_secret: &[u8]) -> P2pResult<[u8; CONTENT_KEY_LEN]> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut okm = [0u8; CONTENT_KEY_LEN];
    hk.expand(WRAP_INFO, &mut okm)
        .map_err(|e| P2pError::CryptoUnavailable(e.to_string()))?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_roundtrip() {
        let sealed = encrypt_payload(b"hello envelope").unwrap();
        let opened = decrypt_payload(&sealed.ciphertext, &sealed.iv, &sealed.key).unwrap();
        assert_eq!(opened, b"hello envelope");
    }

    #[test]
    fn test_fresh_key_and_nonce_per_call() {
        let a = encrypt_payload(b"same plaintext").unwrap();
        let b = encrypt_payload(b"same plaintext").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.key.as_bytes(), b.key.as_bytes());
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut sealed = encrypt_payload(b"payload").unwrap();
        sealed.ciphertext[0] ^= 0xFF;
        let result = decrypt_payload(&sealed.ciphertext, &sealed.iv, &sealed.key);
        assert!(matches!(result, Err(P2pError::IntegrityFailure)));
    }

    #[test]
    fn test_wrong_key_fails_decrypt() {
        let sealed = encrypt_payload(b"payload").unwrap();
        let wrong = ContentKey::from_bytes([7u8; 32]);
        let result = decrypt_payload(&sealed.ciphertext, &sealed.iv, &wrong);
        assert!(matches!(result, Err(P2pError::IntegrityFailure)));
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let recipient = IdentityKeypair::generate();
        let sealed = encrypt_payload(b"payload").unwrap();

        let wrapped = wrap_key_for(&sealed.key, &recipient.public_key_b64()).unwrap();
        let unwrapped = unwrap_key(&wrapped, &recipient).unwrap();
        assert_eq!(unwrapped.as_bytes(), sealed.key.as_bytes());
    }

    #[test]
    fn test_unwrap_with_wrong_identity_fails() {
        let recipient = IdentityKeypair::generate();
        let intruder = IdentityKeypair::generate();
        let sealed = encrypt_payload(b"payload").unwrap();

        let wrapped = wrap_key_for(&sealed.key, &recipient.public_key_b64()).unwrap();
        let result = unwrap_key(&wrapped, &intruder);
        assert!(matches!(result, Err(P2pError::AccessDenied)));
    }

    #[test]
    fn test_tampered_blob_fails_unwrap() {
        let recipient = IdentityKeypair::generate();
        let sealed = encrypt_payload(b"payload").unwrap();
        let wrapped = wrap_key_for(&sealed.key, &recipient.public_key_b64()).unwrap();

        let mut blob = BASE64.decode(&wrapped).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        let result = unwrap_key(&BASE64.encode(blob), &recipient);
        assert!(matches!(result, Err(P2pError::AccessDenied)));
    }

    #[test]
    fn test_malformed_recipient_key_rejected() {
        let sealed = encrypt_payload(b"payload").unwrap();

        let result = wrap_key_for(&sealed.key, "not base64 at all!!");
        assert!(matches!(result, Err(P2pError::UnknownRecipientKey)));

        // Valid base64 but wrong length
        let result = wrap_key_for(&sealed.key, &BASE64.encode([1u8; 16]));
        assert!(matches!(result, Err(P2pError::UnknownRecipientKey)));
    }

    #[test]
    fn test_wrapping_is_randomized() {
        let recipient = IdentityKeypair::generate();
        let sealed = encrypt_payload(b"payload").unwrap();

        let a = wrap_key_for(&sealed.key, &recipient.public_key_b64()).unwrap();
        let b = wrap_key_for(&sealed.key, &recipient.public_key_b64()).unwrap();
        assert_ne!(a, b);

        assert_eq!(
            unwrap_key(&a, &recipient).unwrap().as_bytes(),
            unwrap_key(&b, &recipient).unwrap().as_bytes()
        );
    }
}
