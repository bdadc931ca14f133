//! Sync orchestrator
//!
//! Owns the reconciliation loop between the local cache, the authoritative
//! store and the overlay. Per envelope id the state is
//! `Unknown -> Cached -> Deleted`, and the store always wins on existence:
//! overlay events only accelerate convergence, they never override the
//! store.
//!
//! Store failures (`StoreUnavailable`/`Timeout`) are swallowed here — logged
//! and retried on the next tick with exponential backoff. Integrity
//! failures are never swallowed: every discarded envelope is logged at
//! error level so tampering stays observable.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::EnvelopeCache;
use crate::config::SyncConfig;
use crate::envelope::{Envelope, UserId};
use crate::error::{P2pError, P2pResult};
use crate::overlay::{OverlayEvent, OverlayTransport};
use crate::store::EnvelopeStore;

/// Handle to the background reconciliation task.
pub struct SyncOrchestrator {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SyncOrchestrator {
    /// Spawn the reconciliation task for `user_id`.
    pub fn spawn(
        user_id: UserId,
        store: Arc<dyn EnvelopeStore>,
        cache: EnvelopeCache,
        overlay: Arc<dyn OverlayTransport>,
        config: SyncConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let events = overlay.subscribe();
        let handle = tokio::spawn(run_sync_loop(
            user_id,
            store,
            cache,
            overlay,
            config,
            events,
            shutdown_rx,
        ));
        SyncOrchestrator { shutdown_tx, handle }
    }

    /// Stop the task and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}

async fn run_sync_loop(
    user_id: UserId,
    store: Arc<dyn EnvelopeStore>,
    cache: EnvelopeCache,
    overlay: Arc<dyn OverlayTransport>,
    config: SyncConfig,
    mut events: broadcast::Receiver<OverlayEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut consecutive_failures = 0u32;
    let mut events_open = true;

    loop {
        let wait = backoff_interval(&config, consecutive_failures);

        let tick = tokio::time::sleep(wait);
        tokio::pin!(tick);

        let action = loop {
            if events_open {
                tokio::select! {
                    _ = shutdown_rx.changed() => break LoopAction::Stop,
                    _ = &mut tick => break LoopAction::Pull,
                    event = events.recv() => match event {
                        Ok(event) => break LoopAction::Event(event),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            // Dropped events resurface on the next store pull.
                            warn!(missed, "overlay event stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            events_open = false;
                        }
                    },
                }
            } else {
                tokio::select! {
                    _ = shutdown_rx.changed() => break LoopAction::Stop,
                    _ = &mut tick => break LoopAction::Pull,
                }
            }
        };

        match action {
            LoopAction::Stop => {
                debug!("sync orchestrator stopping");
                return;
            }
            LoopAction::Pull => {
                match pull_authoritative(&user_id, store.as_ref(), &cache, &config).await {
                    Ok(()) => {
                        if consecutive_failures > 0 {
                            info!("store reachable again");
                        }
                        consecutive_failures = 0;
                    }
                    Err(P2pError::CacheClosed) => return,
                    Err(e) if e.is_retryable() => {
                        consecutive_failures += 1;
                        warn!(
                            error = %e,
                            attempt = consecutive_failures,
                            next_retry = ?backoff_interval(&config, consecutive_failures),
                            "store pull failed"
                        );
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(error = %e, "store pull failed with non-retryable error");
                    }
                }
            }
            LoopAction::Event(event) => {
                if let Err(P2pError::CacheClosed) =
                    apply_overlay_event(&user_id, event, &cache, overlay.as_ref()).await
                {
                    return;
                }
            }
        }
    }
}

enum LoopAction {
    Stop,
    Pull,
    Event(OverlayEvent),
}

/// Exponential backoff on consecutive pull failures, capped by config.
fn backoff_interval(config: &SyncConfig, failures: u32) -> Duration {
    if failures == 0 {
        return config.interval;
    }
    let multiplier = 2u32.saturating_pow(failures.min(16));
    config
        .interval
        .saturating_mul(multiplier)
        .min(config.max_backoff)
}

/// One reconciliation pull: page through the authoritative listing, admit
/// new envelopes, and drop everything the store no longer knows.
async fn pull_authoritative(
    user_id: &str,
    store: &dyn EnvelopeStore,
    cache: &EnvelopeCache,
    config: &SyncConfig,
) -> P2pResult<()> {
    let mut authoritative: HashSet<String> = HashSet::new();
    let mut offset = 0usize;

    loop {
        let page = store
            .list_for_recipient(user_id, config.page_size, offset)
            .await?;
        let page_len = page.len();

        for envelope in page {
            authoritative.insert(envelope.id.clone());
            if !cache.contains(&envelope.id)? {
                admit(user_id, envelope, cache)?;
            }
        }

        if page_len < config.page_size {
            break;
        }
        offset += page_len;
    }

    let removed = cache.retain_authoritative(&authoritative)?;
    for id in &removed {
        debug!(envelope = %id, "removed envelope absent from authoritative store");
    }
    Ok(())
}

/// React to one overlay event. The store remains ground truth: a spoofed
/// deletion is undone by the next pull, and created envelopes are verified
/// before they touch the cache.
async fn apply_overlay_event(
    user_id: &str,
    event: OverlayEvent,
    cache: &EnvelopeCache,
    overlay: &dyn OverlayTransport,
) -> P2pResult<()> {
    match event {
        OverlayEvent::EnvelopeCreated(envelope) => {
            // Not addressed to us: not an error, just not ours to hold.
            if !envelope.is_recipient(user_id) {
                debug!(envelope = %envelope.id, "ignoring envelope not addressed to us");
                return Ok(());
            }
            admit(user_id, envelope, cache)?;
        }
        OverlayEvent::EnvelopeDeleted(id) => {
            if cache.remove(&id)?.is_some() {
                debug!(envelope = %id, "removed envelope on overlay deletion");
            }
        }
        OverlayEvent::SyncRequest { from } => {
            let shared: Vec<Envelope> = cache
                .values()?
                .into_iter()
                .filter(|env| env.recipients.iter().any(|r| r == &from))
                .collect();
            debug!(peer = %from, count = shared.len(), "answering sync request");
            for envelope in shared {
                if let Err(e) = overlay
                    .broadcast(
                        &OverlayEvent::EnvelopeCreated(envelope),
                        std::slice::from_ref(&from),
                    )
                    .await
                {
                    warn!(error = %e, peer = %from, "failed to answer sync request");
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Verify and insert an envelope. Unverified envelopes never enter the
/// cache.
///
/// Membership is checked with `is_recipient`, never `is_authorized`: the
/// claimed `sender_id` is attacker-controlled on both admission paths, and
/// a forged own-sender envelope would otherwise slip past reconciliation
/// through the cache's own-author exemption. Envelopes we genuinely
/// authored are cached at send time and never arrive through here.
fn admit(user_id: &str, envelope: Envelope, cache: &EnvelopeCache) -> P2pResult<()> {
    if envelope.validate().is_err() || !envelope.verify_signature() {
        error!(
            envelope = %envelope.id,
            sender = %envelope.sender_id,
            "integrity failure: discarding envelope with bad signature"
        );
        return Ok(());
    }
    if !envelope.is_recipient(user_id) {
        debug!(envelope = %envelope.id, "ignoring envelope not addressed to us");
        return Ok(());
    }
    cache.put(envelope)
}
