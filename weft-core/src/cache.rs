//! Local envelope cache
//!
//! A keyed map from envelope id to envelope holding everything the local
//! identity is authorized to see. This is a correctness-preserving cache,
//! not a capacity-bounded one: nothing is evicted by default, and envelopes
//! authored by the local identity are never evictable since they back the
//! delete-authorization check. Removal happens only through the sync
//! orchestrator (store-wins) and the facade's delete path.
//!
//! Mutations are atomic per id; envelopes are independent, so no multi-id
//! transactions exist.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use crate::envelope::{Envelope, EnvelopeId, UserId};
use crate::error::{P2pError, P2pResult};

fn handle_poison<T>(_err: PoisonError<T>) -> P2pError {
    P2pError::Internal("cache lock poisoned".to_string())
}

struct CacheInner {
    open: bool,
    owner: UserId,
    entries: HashMap<EnvelopeId, Envelope>,
}

/// Keyed envelope store with an explicit open/close lifecycle.
#[derive(Clone)]
pub struct EnvelopeCache {
    inner: Arc<RwLock<CacheInner>>,
}

impl EnvelopeCache {
    /// Open an empty cache owned by `owner` (the local identity id).
    pub fn open(owner: impl Into<UserId>) -> Self {
        EnvelopeCache {
            inner: Arc::new(RwLock::new(CacheInner {
                open: true,
                owner: owner.into(),
                entries: HashMap::new(),
            })),
        }
    }

    /// Close the cache and drop its contents. Further operations fail
    /// `CacheClosed`.
    pub fn close(&self) -> P2pResult<()> {
        let mut inner = self.inner.write().map_err(handle_poison)?;
        inner.open = false;
        inner.entries.clear();
        Ok(())
    }

    pub fn get(&self, id: &str) -> P2pResult<Option<Envelope>> {
        let inner = self.inner.read().map_err(handle_poison)?;
        if !inner.open {
            return Err(P2pError::CacheClosed);
        }
        Ok(inner.entries.get(id).cloned())
    }

    pub fn put(&self, envelope: Envelope) -> P2pResult<()> {
        let mut inner = self.inner.write().map_err(handle_poison)?;
        if !inner.open {
            return Err(P2pError::CacheClosed);
        }
        inner.entries.insert(envelope.id.clone(), envelope);
        Ok(())
    }

    pub fn remove(&self, id: &str) -> P2pResult<Option<Envelope>> {
        let mut inner = self.inner.write().map_err(handle_poison)?;
        if !inner.open {
            return Err(P2pError::CacheClosed);
        }
        Ok(inner.entries.remove(id))
    }

    pub fn contains(&self, id: &str) -> P2pResult<bool> {
        let inner = self.inner.read().map_err(handle_poison)?;
        if !inner.open {
            return Err(P2pError::CacheClosed);
        }
        Ok(inner.entries.contains_key(id))
    }

    pub fn values(&self) -> P2pResult<Vec<Envelope>> {
        let inner = self.inner.read().map_err(handle_poison)?;
        if !inner.open {
            return Err(P2pError::CacheClosed);
        }
        Ok(inner.entries.values().cloned().collect())
    }

    pub fn ids(&self) -> P2pResult<Vec<EnvelopeId>> {
        let inner = self.inner.read().map_err(handle_poison)?;
        if !inner.open {
            return Err(P2pError::CacheClosed);
        }
        Ok(inner.entries.keys().cloned().collect())
    }

    pub fn len(&self) -> P2pResult<usize> {
        let inner = self.inner.read().map_err(handle_poison)?;
        if !inner.open {
            return Err(P2pError::CacheClosed);
        }
        Ok(inner.entries.len())
    }

    pub fn is_empty(&self) -> P2pResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop every cached envelope whose id is missing from `authoritative`,
    /// except envelopes authored by the local identity (those leave the
    /// cache only through an explicit delete). Returns the removed ids.
    pub fn retain_authoritative(
        &self,
        authoritative: &HashSet<EnvelopeId>,
    ) -> P2pResult<Vec<EnvelopeId>> {
        let mut inner = self.inner.write().map_err(handle_poison)?;
        if !inner.open {
            return Err(P2pError::CacheClosed);
        }
        let owner = inner.owner.clone();
        let stale: Vec<EnvelopeId> = inner
            .entries
            .iter()
            .filter(|(id, env)| env.sender_id != owner && !authoritative.contains(*id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            inner.entries.remove(id);
        }
        Ok(stale)
    }
}
