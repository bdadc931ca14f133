//! weft-core: end-to-end encrypted, multi-recipient envelope layer.
//!
//! Applications exchange immutable envelopes: a payload sealed once under a
//! fresh symmetric key, with that key wrapped per recipient. An
//! authoritative HTTP store is ground truth for existence; a best-effort
//! overlay accelerates convergence between connected peers; a local cache
//! plus sync orchestrator keep each identity's view consistent.
//!
//! Most applications only touch [`facade::Messenger`] and [`config::P2pConfig`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use weft_core::config::P2pConfig;
//! use weft_core::crypto::keystore::{FileKeystore, Keystore};
//! use weft_core::facade::Messenger;
//! use weft_core::overlay::RelayTransport;
//! use weft_core::store::HttpEnvelopeStore;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = P2pConfig::from_env()?;
//! let keystore = FileKeystore::open("keys")?;
//! let identity = keystore.ensure_identity("user-42")?;
//!
//! let store = Arc::new(HttpEnvelopeStore::new(&config.store)?);
//! let overlay = Arc::new(RelayTransport::new(&config.overlay, identity.id.clone()));
//!
//! let messenger = Messenger::new(identity, store, overlay, config);
//! messenger.start().await?;
//! messenger.create_post(&["follower-1".to_string()], "hello").await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod facade;
pub mod logging;
pub mod overlay;
pub mod store;
pub mod sync;

pub use cache::EnvelopeCache;
pub use config::P2pConfig;
pub use crypto::keypair::{Identity, IdentityKeypair};
pub use crypto::keystore::{FileKeystore, Keystore, MemoryKeystore};
pub use envelope::{Envelope, EnvelopeId, UserId};
pub use error::{P2pError, P2pResult};
pub use facade::Messenger;
pub use logging::{init_logging, init_logging_with_config};
pub use overlay::{LocalOverlay, LocalOverlayHub, OverlayTransport, RelayTransport};
pub use store::{EnvelopeStore, HttpEnvelopeStore, MemoryEnvelopeStore};
pub use sync::SyncOrchestrator;
