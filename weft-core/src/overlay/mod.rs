//! Overlay transport
//!
//! Best-effort, at-most-once propagation of envelope updates among currently
//! connected peers. The overlay only ever accelerates convergence; the
//! authoritative store remains ground truth for existence and deletion.
//!
//! Wire protocol (JSON frames over a WebSocket-style relay):
//!
//! - `{"type": "register", "userId": ...}` on connect and after reconnect
//! - `{"type": "envelope_created" | "envelope_deleted", "to": ..., "data": ...}`
//!   one frame per recipient; routed only to declared recipients
//! - `{"type": "sync_request", "from": ...}` a peer asking for everything
//!   shared with it

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::envelope::{Envelope, EnvelopeId, UserId};
use crate::error::P2pResult;

pub mod local;
pub mod relay;

pub use local::{LocalOverlay, LocalOverlayHub};
pub use relay::RelayTransport;

/// One JSON frame on the relay wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OverlayFrame {
    Register {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    EnvelopeCreated {
        to: UserId,
        data: Envelope,
    },
    EnvelopeDeleted {
        to: UserId,
        data: EnvelopeId,
    },
    SyncRequest {
        from: UserId,
    },
}

/// A decoded overlay event delivered to subscribers.
#[derive(Debug, Clone)]
pub enum OverlayEvent {
    EnvelopeCreated(Envelope),
    EnvelopeDeleted(EnvelopeId),
    SyncRequest { from: UserId },
}

impl OverlayEvent {
    /// Expand into per-recipient wire frames.
    ///
    /// `targets` is ignored for `SyncRequest`, which is addressed by the
    /// relay itself.
    pub(crate) fn frames_for(&self, targets: &[UserId]) -> Vec<OverlayFrame> {
        match self {
            OverlayEvent::EnvelopeCreated(envelope) => targets
                .iter()
                .map(|t| OverlayFrame::EnvelopeCreated { to: t.clone(), data: envelope.clone() })
                .collect(),
            OverlayEvent::EnvelopeDeleted(id) => targets
                .iter()
                .map(|t| OverlayFrame::EnvelopeDeleted { to: t.clone(), data: id.clone() })
                .collect(),
            OverlayEvent::SyncRequest { from } => {
                vec![OverlayFrame::SyncRequest { from: from.clone() }]
            }
        }
    }
}

/// Bidirectional best-effort channel to currently connected peers.
///
/// The concrete transport (WebSocket relay vs. in-process hub) is a
/// swappable strategy behind this one interface.
#[async_trait]
pub trait OverlayTransport: Send + Sync {
    /// Start the transport: announce presence (register) and begin
    /// receiving. Reconnection after drops is the transport's job.
    async fn connect(&self) -> P2pResult<()>;

    /// Fan `event` out to `targets`, one frame per target. Routing to
    /// non-recipients is a confidentiality violation; callers pass exactly
    /// the declared recipient set (or the single requester for sync
    /// replies).
    async fn broadcast(&self, event: &OverlayEvent, targets: &[UserId]) -> P2pResult<()>;

    /// Subscribe to events addressed to the local identity.
    fn subscribe(&self) -> broadcast::Receiver<OverlayEvent>;

    /// Tear the transport down. In-flight frames may be dropped.
    async fn disconnect(&self) -> P2pResult<()>;
}
