//! Messaging facade
//!
//! The one entry point applications use: send and read encrypted envelopes,
//! delete own envelopes, and run the background sync machinery. Everything
//! underneath (crypto engine, store client, cache, overlay, orchestrator)
//! stays behind this surface.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::EnvelopeCache;
use crate::config::P2pConfig;
use crate::crypto::engine;
use crate::crypto::keypair::Identity;
use crate::envelope::{Envelope, UserId};
use crate::error::{P2pError, P2pResult};
use crate::overlay::{OverlayEvent, OverlayTransport};
use crate::store::EnvelopeStore;
use crate::sync::SyncOrchestrator;

/// High-level client for the encrypted envelope layer, bound to one local
/// identity.
pub struct Messenger {
    identity: Identity,
    store: Arc<dyn EnvelopeStore>,
    cache: EnvelopeCache,
    overlay: Arc<dyn OverlayTransport>,
    config: P2pConfig,
    orchestrator: Mutex<Option<SyncOrchestrator>>,
}

impl Messenger {
    /// Assemble a messenger from its collaborators. Call [`Messenger::start`]
    /// before exchanging envelopes.
    pub fn new(
        identity: Identity,
        store: Arc<dyn EnvelopeStore>,
        overlay: Arc<dyn OverlayTransport>,
        config: P2pConfig,
    ) -> Self {
        let cache = EnvelopeCache::open(identity.id.clone());
        Messenger {
            identity,
            store,
            cache,
            overlay,
            config,
            orchestrator: Mutex::new(None),
        }
    }

    /// The local identity's user id.
    pub fn user_id(&self) -> &str {
        &self.identity.id
    }

    /// Connect the overlay, start the sync orchestrator, and ask connected
    /// peers for anything shared with us while we were offline.
    pub async fn start(&self) -> P2pResult<()> {
        if self
            .orchestrator
            .lock()
            .map_err(|_| P2pError::Internal("orchestrator lock poisoned".to_string()))?
            .is_some()
        {
            return Err(P2pError::Internal("messenger already started".to_string()));
        }

        self.overlay.connect().await?;

        let orchestrator = SyncOrchestrator::spawn(
            self.identity.id.clone(),
            Arc::clone(&self.store),
            self.cache.clone(),
            Arc::clone(&self.overlay),
            self.config.sync.clone(),
        );
        self.set_orchestrator(orchestrator)?;

        // Best effort: peers answer from their caches, the next store pull
        // covers whatever the overlay misses.
        let request = OverlayEvent::SyncRequest { from: self.identity.id.clone() };
        if let Err(e) = self.overlay.broadcast(&request, &[]).await {
            warn!(error = %e, "initial sync request failed");
        }

        info!(user = %self.identity.id, "messenger started");
        Ok(())
    }

    /// Encrypt `plaintext` for `recipients` and persist the envelope.
    ///
    /// The whole send aborts if any recipient's public key cannot be
    /// resolved; a partially readable envelope is never created. Returns the
    /// stored envelope.
    pub async fn send(
        &self,
        recipients: &[UserId],
        plaintext: &[u8],
        metadata: serde_json::Value,
    ) -> P2pResult<Envelope> {
        if recipients.is_empty() {
            return Err(P2pError::NoRecipients);
        }

        let mut recipient_keys = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let key = self
                .with_deadline(self.store.public_key_of(recipient))
                .await
                .map_err(|e| match e {
                    P2pError::NotFound(_) => {
                        P2pError::RecipientKeyUnavailable(recipient.clone())
                    }
                    other => other,
                })?;
            recipient_keys.push((recipient.clone(), key));
        }

        let sealed = engine::encrypt_payload(plaintext)?;

        let mut wrapped_keys = std::collections::BTreeMap::new();
        for (recipient, key_b64) in &recipient_keys {
            let wrapped = engine::wrap_key_for(&sealed.key, key_b64)?;
            wrapped_keys.insert(recipient.clone(), wrapped);
        }
        let sender_key = engine::wrap_key_for(&sealed.key, &self.identity.public_key_b64())?;

        let timestamp = epoch_millis()?;
        let mut envelope = Envelope {
            id: Uuid::new_v4().to_string(),
            ciphertext: BASE64.encode(&sealed.ciphertext),
            iv: BASE64.encode(sealed.iv),
            sender_public_key: self.identity.public_key_b64(),
            sender_id: self.identity.id.clone(),
            recipients: recipients.to_vec(),
            wrapped_keys,
            sender_key: Some(sender_key),
            timestamp,
            metadata,
            signature: String::new(),
        };
        envelope.signature = envelope.compute_signature();
        envelope.validate()?;

        self.with_deadline(self.store.create(&envelope)).await?;
        self.cache.put(envelope.clone())?;

        let event = OverlayEvent::EnvelopeCreated(envelope.clone());
        if let Err(e) = self.overlay.broadcast(&event, &envelope.recipients).await {
            // The envelope is already durable; recipients converge on their
            // next store pull.
            warn!(envelope = %envelope.id, error = %e, "overlay announce failed");
        }

        debug!(envelope = %envelope.id, recipients = envelope.recipients.len(), "envelope sent");
        Ok(envelope)
    }

    /// Shorthand for publishing a post to a set of followers.
    pub async fn create_post(
        &self,
        recipients: &[UserId],
        content: &str,
    ) -> P2pResult<Envelope> {
        self.send(
            recipients,
            content.as_bytes(),
            serde_json::json!({ "kind": "post" }),
        )
        .await
    }

    /// Decrypt the payload of the envelope with id `id` for the local
    /// identity.
    ///
    /// Fails `AccessDenied` when we hold no wrapped key, and
    /// `IntegrityFailure` when the signature or ciphertext does not
    /// authenticate. A tampered envelope is also dropped from the cache.
    pub async fn open(&self, id: &str) -> P2pResult<Vec<u8>> {
        let envelope = match self.cache.get(id)? {
            Some(envelope) => envelope,
            None => {
                let envelope = self.with_deadline(self.store.get_by_id(id)).await?;
                if envelope.is_authorized(&self.identity.id) && envelope.verify_signature() {
                    self.cache.put(envelope.clone())?;
                }
                envelope
            }
        };

        if !envelope.is_authorized(&self.identity.id) {
            return Err(P2pError::AccessDenied);
        }
        if !envelope.verify_signature() {
            self.cache.remove(id)?;
            return Err(P2pError::IntegrityFailure);
        }

        let wrapped = envelope
            .wrapped_key_for(&self.identity.id)
            .ok_or(P2pError::AccessDenied)?;
        let content_key = engine::unwrap_key(wrapped, &self.identity.keypair)?;

        let ciphertext = BASE64
            .decode(&envelope.ciphertext)
            .map_err(|_| P2pError::IntegrityFailure)?;
        let iv = BASE64
            .decode(&envelope.iv)
            .map_err(|_| P2pError::IntegrityFailure)?;

        match engine::decrypt_payload(&ciphertext, &iv, &content_key) {
            Ok(plaintext) => Ok(plaintext),
            Err(e) => {
                self.cache.remove(id)?;
                Err(e)
            }
        }
    }

    /// Delete an envelope the local identity authored.
    ///
    /// Only the sender may delete; the backend enforces the same rule, so a
    /// spoofed local state still cannot delete someone else's envelope.
    pub async fn delete(&self, id: &str) -> P2pResult<()> {
        let envelope = match self.cache.get(id)? {
            Some(envelope) => envelope,
            None => self.with_deadline(self.store.get_by_id(id)).await?,
        };
        if envelope.sender_id != self.identity.id {
            return Err(P2pError::DeleteRejected);
        }

        self.with_deadline(self.store.delete(id, &self.identity.id))
            .await?;
        self.cache.remove(id)?;

        let event = OverlayEvent::EnvelopeDeleted(id.to_string());
        if let Err(e) = self.overlay.broadcast(&event, &envelope.recipients).await {
            warn!(envelope = %id, error = %e, "overlay delete announce failed");
        }

        debug!(envelope = %id, "envelope deleted");
        Ok(())
    }

    /// Everything currently cached for the local identity.
    pub fn envelopes(&self) -> P2pResult<Vec<Envelope>> {
        self.cache.values()
    }

    /// Look one cached envelope up by id.
    pub fn envelope(&self, id: &str) -> P2pResult<Option<Envelope>> {
        self.cache.get(id)
    }

    /// Stop the orchestrator, disconnect the overlay, and close the cache.
    pub async fn shutdown(&self) -> P2pResult<()> {
        let orchestrator = self
            .orchestrator
            .lock()
            .map_err(|_| P2pError::Internal("orchestrator lock poisoned".to_string()))?
            .take();
        if let Some(orchestrator) = orchestrator {
            orchestrator.shutdown().await;
        }

        self.overlay.disconnect().await?;
        self.cache.close()?;
        info!(user = %self.identity.id, "messenger stopped");
        Ok(())
    }

    fn set_orchestrator(&self, orchestrator: SyncOrchestrator) -> P2pResult<()> {
        let mut slot = self
            .orchestrator
            .lock()
            .map_err(|_| P2pError::Internal("orchestrator lock poisoned".to_string()))?;
        if slot.is_some() {
            return Err(P2pError::Internal("messenger already started".to_string()));
        }
        *slot = Some(orchestrator);
        Ok(())
    }

    /// Bound every store round-trip by the configured request timeout.
    async fn with_deadline<T>(
        &self,
        fut: impl Future<Output = P2pResult<T>>,
    ) -> P2pResult<T> {
        match tokio::time::timeout(self.config.store.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(P2pError::Timeout),
        }
    }
}

fn epoch_millis() -> P2pResult<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .map_err(|e| P2pError::Internal(format!("clock before epoch: {}", e)))
}
