//! Envelope store client
//!
//! The authoritative backend: ground truth for the existence and deletion of
//! every envelope. Pure request/response with no caching and no retry —
//! retry policy belongs to the sync orchestrator.

use async_trait::async_trait;

use crate::envelope::{Envelope, UserId};
use crate::error::P2pResult;

pub mod http;
pub mod memory;

pub use http::HttpEnvelopeStore;
pub use memory::MemoryEnvelopeStore;

/// Client seam for the authoritative envelope store plus the public-key
/// lookup collaborator.
#[async_trait]
pub trait EnvelopeStore: Send + Sync {
    /// Persist a new envelope. Implementations must run
    /// [`Envelope::validate`] client-side before any network round-trip.
    async fn create(&self, envelope: &Envelope) -> P2pResult<()>;

    /// Fetch one envelope by id. Fails `NotFound` when absent.
    async fn get_by_id(&self, id: &str) -> P2pResult<Envelope>;

    /// Page through envelopes addressed to `recipient`.
    async fn list_for_recipient(
        &self,
        recipient: &str,
        limit: usize,
        offset: usize,
    ) -> P2pResult<Vec<Envelope>>;

    /// Delete an envelope. The backend rejects requesters other than the
    /// original sender; that surfaces as `DeleteRejected`.
    async fn delete(&self, id: &str, requester: &str) -> P2pResult<()>;

    /// Resolve a user's published public key (base64).
    async fn public_key_of(&self, user_id: &UserId) -> P2pResult<String>;
}
