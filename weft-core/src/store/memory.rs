//! In-memory envelope store
//!
//! Implements the same contract as the HTTP client against process-local
//! state: a key directory plus an envelope map enforcing the sender-only
//! delete rule. Used by the integration tests and for offline operation.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::EnvelopeStore;
use crate::envelope::{Envelope, UserId};
use crate::error::{P2pError, P2pResult};

fn handle_poison<T>(_err: PoisonError<T>) -> P2pError {
    P2pError::Internal("store lock poisoned".to_string())
}

/// Process-local authoritative store.
#[derive(Default)]
pub struct MemoryEnvelopeStore {
    envelopes: RwLock<HashMap<String, Envelope>>,
    public_keys: RwLock<HashMap<UserId, String>>,
}

impl MemoryEnvelopeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a user's key so senders can wrap for them.
    pub fn register_public_key(&self, user_id: impl Into<UserId>, public_key_b64: impl Into<String>) {
        if let Ok(mut keys) = self.public_keys.write() {
            keys.insert(user_id.into(), public_key_b64.into());
        }
    }

    /// Number of stored envelopes (test inspection).
    pub fn len(&self) -> usize {
        self.envelopes.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EnvelopeStore for MemoryEnvelopeStore {
    async fn create(&self, envelope: &Envelope) -> P2pResult<()> {
        envelope.validate()?;

        let mut envelopes = self.envelopes.write().map_err(handle_poison)?;
        if envelopes.contains_key(&envelope.id) {
            // Envelopes are immutable; update is delete + recreate.
            return Err(P2pError::InvalidEnvelope(format!(
                "duplicate envelope id: {}",
                envelope.id
            )));
        }
        envelopes.insert(envelope.id.clone(), envelope.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> P2pResult<Envelope> {
        self.envelopes
            .read()
            .map_err(handle_poison)?
            .get(id)
            .cloned()
            .ok_or_else(|| P2pError::NotFound(id.to_string()))
    }

    async fn list_for_recipient(
        &self,
        recipient: &str,
        limit: usize,
        offset: usize,
    ) -> P2pResult<Vec<Envelope>> {
        let envelopes = self.envelopes.read().map_err(handle_poison)?;
        let mut matching: Vec<Envelope> = envelopes
            .values()
            .filter(|env| env.recipients.iter().any(|r| r == recipient))
            .cloned()
            .collect();
        // Stable paging order: oldest first, id as tiebreak.
        matching.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn delete(&self, id: &str, requester: &str) -> P2pResult<()> {
        let mut envelopes = self.envelopes.write().map_err(handle_poison)?;
        let envelope = envelopes
            .get(id)
            .ok_or_else(|| P2pError::NotFound(id.to_string()))?;
        if envelope.sender_id != requester {
            return Err(P2pError::DeleteRejected);
        }
        envelopes.remove(id);
        Ok(())
    }

    async fn public_key_of(&self, user_id: &UserId) -> P2pResult<String> {
        self.public_keys
            .read()
            .map_err(handle_poison)?
            .get(user_id)
            .cloned()
            .ok_or_else(|| P2pError::RecipientKeyUnavailable(user_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn envelope(id: &str, sender: &str, recipients: &[&str], timestamp: u64) -> Envelope {
        let mut wrapped = BTreeMap::new();
        for r in recipients {
            wrapped.insert(r.to_string(), "a2V5".to_string());
        }
        let mut env = Envelope {
            id: id.to_string(),
            ciphertext: "Y3Q=".to_string(),
            iv: "aXY=".to_string(),
            sender_public_key: "cGs=".to_string(),
            sender_id: sender.to_string(),
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            wrapped_keys: wrapped,
            sender_key: None,
            timestamp,
            metadata: serde_json::Value::Null,
            signature: String::new(),
        };
        env.signature = env.compute_signature();
        env
    }

    #[tokio::test]
    async fn test_create_and_fetch() {
        let store = MemoryEnvelopeStore::new();
        store.create(&envelope("e1", "s", &["a"], 1)).await.unwrap();

        let fetched = store.get_by_id("e1").await.unwrap();
        assert_eq!(fetched.sender_id, "s");

        assert!(matches!(
            store.get_by_id("nope").await,
            Err(P2pError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = MemoryEnvelopeStore::new();
        store.create(&envelope("e1", "s", &["a"], 1)).await.unwrap();
        assert!(store.create(&envelope("e1", "s", &["a"], 2)).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_requires_sender() {
        let store = MemoryEnvelopeStore::new();
        store.create(&envelope("e1", "s", &["a"], 1)).await.unwrap();

        let err = store.delete("e1", "a").await.unwrap_err();
        assert!(matches!(err, P2pError::DeleteRejected));
        assert!(store.get_by_id("e1").await.is_ok(), "rejected delete must not remove");

        store.delete("e1", "s").await.unwrap();
        assert!(store.get_by_id("e1").await.is_err());
    }

    #[tokio::test]
    async fn test_list_filters_and_pages() {
        let store = MemoryEnvelopeStore::new();
        store.create(&envelope("e1", "s", &["a", "b"], 1)).await.unwrap();
        store.create(&envelope("e2", "s", &["a"], 2)).await.unwrap();
        store.create(&envelope("e3", "s", &["b"], 3)).await.unwrap();

        let for_a = store.list_for_recipient("a", 10, 0).await.unwrap();
        assert_eq!(for_a.len(), 2);
        assert_eq!(for_a[0].id, "e1");

        let page = store.list_for_recipient("a", 1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "e2");
    }

    #[tokio::test]
    async fn test_public_key_lookup() {
        let store = MemoryEnvelopeStore::new();
        store.register_public_key("alice", "cGs=");

        assert_eq!(store.public_key_of(&"alice".to_string()).await.unwrap(), "cGs=");
        assert!(matches!(
            store.public_key_of(&"ghost".to_string()).await,
            Err(P2pError::RecipientKeyUnavailable(_))
        ));
    }
}
