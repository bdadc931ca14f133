//! In-process overlay hub
//!
//! Routes frames between transports living in the same process, applying
//! the same recipient-only routing rule as the relay. Used by the
//! integration tests and for single-process deployments.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{OverlayEvent, OverlayTransport};
use crate::envelope::UserId;
use crate::error::{P2pError, P2pResult};

const EVENT_CHANNEL_CAPACITY: usize = 256;

type PeerMap = Arc<Mutex<HashMap<UserId, broadcast::Sender<OverlayEvent>>>>;

/// Shared routing table for a set of in-process peers.
#[derive(Clone, Default)]
pub struct LocalOverlayHub {
    peers: PeerMap,
}

impl LocalOverlayHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport endpoint for `user_id` on this hub.
    pub fn endpoint(&self, user_id: impl Into<UserId>) -> LocalOverlay {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        LocalOverlay {
            peers: Arc::clone(&self.peers),
            user_id: user_id.into(),
            events_tx: tx,
        }
    }
}

/// One peer's endpoint on a [`LocalOverlayHub`].
pub struct LocalOverlay {
    peers: PeerMap,
    user_id: UserId,
    events_tx: broadcast::Sender<OverlayEvent>,
}

impl LocalOverlay {
    fn lock_peers(
        &self,
    ) -> P2pResult<std::sync::MutexGuard<'_, HashMap<UserId, broadcast::Sender<OverlayEvent>>>>
    {
        self.peers
            .lock()
            .map_err(|_| P2pError::Internal("overlay hub lock poisoned".to_string()))
    }
}

#[async_trait]
impl OverlayTransport for LocalOverlay {
    async fn connect(&self) -> P2pResult<()> {
        self.lock_peers()?
            .insert(self.user_id.clone(), self.events_tx.clone());
        Ok(())
    }

    async fn broadcast(&self, event: &OverlayEvent, targets: &[UserId]) -> P2pResult<()> {
        let peers = self.lock_peers()?;
        match event {
            OverlayEvent::SyncRequest { .. } => {
                // Relayed to every other connected peer.
                for (peer, tx) in peers.iter() {
                    if peer != &self.user_id {
                        let _ = tx.send(event.clone());
                    }
                }
            }
            _ => {
                for target in targets {
                    if target == &self.user_id {
                        continue;
                    }
                    if let Some(tx) = peers.get(target) {
                        let _ = tx.send(event.clone());
                    }
                }
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<OverlayEvent> {
        self.events_tx.subscribe()
    }

    async fn disconnect(&self) -> P2pResult<()> {
        self.lock_peers()?.remove(&self.user_id);
        Ok(())
    }
}
