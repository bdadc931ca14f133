//! WebSocket relay transport
//!
//! Connects to a socket relay, registers the local identity, and exchanges
//! JSON frames. A dropped connection triggers automatic reconnection with
//! exponential backoff (1s start, 30s cap by default), and every reconnect
//! re-announces presence before resuming traffic.
//!
//! Delivery is at-most-once: frames queued while the relay is unreachable
//! are flushed on reconnect, but nothing is acknowledged or retried beyond
//! that.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt as _, StreamExt as _};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, info, warn};

use super::{OverlayEvent, OverlayFrame, OverlayTransport};
use crate::config::OverlayConfig;
use crate::envelope::UserId;
use crate::error::{P2pError, P2pResult};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Relay-backed overlay transport.
pub struct RelayTransport {
    user_id: UserId,
    relay_url: String,
    reconnect_initial: Duration,
    reconnect_max: Duration,
    events_tx: broadcast::Sender<OverlayEvent>,
    outgoing_tx: mpsc::UnboundedSender<OverlayFrame>,
    outgoing_rx: Mutex<Option<mpsc::UnboundedReceiver<OverlayFrame>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RelayTransport {
    pub fn new(config: &OverlayConfig, user_id: impl Into<UserId>) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        RelayTransport {
            user_id: user_id.into(),
            relay_url: config.relay_url.clone(),
            reconnect_initial: config.reconnect_initial,
            reconnect_max: config.reconnect_max,
            events_tx,
            outgoing_tx,
            outgoing_rx: Mutex::new(Some(outgoing_rx)),
            shutdown_tx,
            shutdown_rx,
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl OverlayTransport for RelayTransport {
    async fn connect(&self) -> P2pResult<()> {
        let outgoing_rx = self
            .outgoing_rx
            .lock()
            .map_err(|_| P2pError::Internal("relay lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| P2pError::OverlayUnavailable("already connected".to_string()))?;

        let handle = tokio::spawn(run_relay_loop(
            self.user_id.clone(),
            self.relay_url.clone(),
            self.reconnect_initial,
            self.reconnect_max,
            self.events_tx.clone(),
            outgoing_rx,
            self.shutdown_rx.clone(),
        ));

        *self
            .task
            .lock()
            .map_err(|_| P2pError::Internal("relay lock poisoned".to_string()))? = Some(handle);
        Ok(())
    }

    async fn broadcast(&self, event: &OverlayEvent, targets: &[UserId]) -> P2pResult<()> {
        for frame in event.frames_for(targets) {
            self.outgoing_tx
                .send(frame)
                .map_err(|_| P2pError::OverlayUnavailable("relay task stopped".to_string()))?;
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<OverlayEvent> {
        self.events_tx.subscribe()
    }

    async fn disconnect(&self) -> P2pResult<()> {
        let _ = self.shutdown_tx.send(true);
        let handle = self
            .task
            .lock()
            .map_err(|_| P2pError::Internal("relay lock poisoned".to_string()))?
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }
}

/// Connection loop: connect, register, pump frames, reconnect with backoff.
async fn run_relay_loop(
    user_id: UserId,
    relay_url: String,
    reconnect_initial: Duration,
    reconnect_max: Duration,
    events_tx: broadcast::Sender<OverlayEvent>,
    mut outgoing_rx: mpsc::UnboundedReceiver<OverlayFrame>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = reconnect_initial;

    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        match connect_async(relay_url.as_str()).await {
            Ok((ws_stream, _response)) => {
                info!(relay = %relay_url, "overlay connected");
                backoff = reconnect_initial;

                let (mut write, mut read) = ws_stream.split();

                // Re-announce presence before any other traffic.
                let register = OverlayFrame::Register { user_id: user_id.clone() };
                let registered = match serde_json::to_string(&register) {
                    Ok(text) => write.send(WsMessage::Text(text)).await.is_ok(),
                    Err(e) => {
                        warn!(error = %e, "failed to encode register frame");
                        false
                    }
                };

                if registered {
                    loop {
                        tokio::select! {
                            _ = shutdown_rx.changed() => {
                                let _ = write.send(WsMessage::Close(None)).await;
                                return;
                            }
                            frame = outgoing_rx.recv() => {
                                let Some(frame) = frame else { return };
                                let text = match serde_json::to_string(&frame) {
                                    Ok(t) => t,
                                    Err(e) => {
                                        warn!(error = %e, "failed to encode overlay frame");
                                        continue;
                                    }
                                };
                                if let Err(e) = write.send(WsMessage::Text(text)).await {
                                    warn!(error = %e, "overlay send failed");
                                    break;
                                }
                            }
                            msg = read.next() => match msg {
                                Some(Ok(WsMessage::Text(text))) => {
                                    route_incoming(&text, &user_id, &events_tx);
                                }
                                Some(Ok(WsMessage::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!(error = %e, "overlay read failed");
                                    break;
                                }
                            }
                        }
                    }
                }

                warn!(retry_in = ?backoff, "overlay disconnected");
            }
            Err(e) => {
                warn!(relay = %relay_url, error = %e, retry_in = ?backoff, "overlay connect failed");
            }
        }

        tokio::select! {
            _ = shutdown_rx.changed() => return,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(reconnect_max);
    }
}

/// Decode one incoming frame and publish it if addressed to us.
fn route_incoming(text: &str, user_id: &str, events_tx: &broadcast::Sender<OverlayEvent>) {
    let frame: OverlayFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            debug!(error = %e, "discarding malformed overlay frame");
            return;
        }
    };

    let event = match frame {
        OverlayFrame::EnvelopeCreated { to, data } if to == user_id => {
            OverlayEvent::EnvelopeCreated(data)
        }
        OverlayFrame::EnvelopeDeleted { to, data } if to == user_id => {
            OverlayEvent::EnvelopeDeleted(data)
        }
        OverlayFrame::SyncRequest { from } if from != user_id => {
            OverlayEvent::SyncRequest { from }
        }
        // Frames for other peers (relay misroute) or our own echoes.
        _ => return,
    };

    let _ = events_tx.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use crate::envelope::Envelope;

    fn envelope_json(to: &str) -> String {
        let mut wrapped = BTreeMap::new();
        wrapped.insert(to.to_string(), "a2V5".to_string());
        let mut env = Envelope {
            id: "e1".to_string(),
            ciphertext: "Y3Q=".to_string(),
            iv: "aXY=".to_string(),
            sender_public_key: "cGs=".to_string(),
            sender_id: "s".to_string(),
            recipients: vec![to.to_string()],
            wrapped_keys: wrapped,
            sender_key: None,
            timestamp: 1,
            metadata: serde_json::Value::Null,
            signature: String::new(),
        };
        env.signature = env.compute_signature();
        serde_json::to_string(&OverlayFrame::EnvelopeCreated { to: to.to_string(), data: env })
            .unwrap()
    }

    #[test]
    fn test_route_incoming_addressed_to_us() {
        let (tx, mut rx) = broadcast::channel(8);
        route_incoming(&envelope_json("me"), "me", &tx);
        assert!(matches!(rx.try_recv(), Ok(OverlayEvent::EnvelopeCreated(_))));
    }

    #[test]
    fn test_route_incoming_discards_misrouted_frames() {
        let (tx, mut rx) = broadcast::channel(8);
        route_incoming(&envelope_json("someone-else"), "me", &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_route_incoming_discards_garbage() {
        let (tx, mut rx) = broadcast::channel(8);
        route_incoming("{not json", "me", &tx);
        route_incoming("{\"type\":\"unknown\"}", "me", &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_route_incoming_ignores_own_sync_request_echo() {
        let (tx, mut rx) = broadcast::channel(8);
        let frame = serde_json::to_string(&OverlayFrame::SyncRequest { from: "me".to_string() })
            .unwrap();
        route_incoming(&frame, "me", &tx);
        assert!(rx.try_recv().is_err());

        let frame = serde_json::to_string(&OverlayFrame::SyncRequest { from: "peer".to_string() })
            .unwrap();
        route_incoming(&frame, "me", &tx);
        assert!(matches!(rx.try_recv(), Ok(OverlayEvent::SyncRequest { .. })));
    }

    #[tokio::test]
    async fn test_broadcast_queues_while_disconnected() {
        let config = OverlayConfig {
            relay_url: "ws://127.0.0.1:9/ws".to_string(),
            reconnect_initial: Duration::from_millis(10),
            reconnect_max: Duration::from_millis(50),
        };
        let transport = RelayTransport::new(&config, "me");
        // Queueing must succeed even before connect; the frames flush when
        // (if ever) the relay becomes reachable.
        let event = OverlayEvent::EnvelopeDeleted("e1".to_string());
        transport.broadcast(&event, &["a".to_string()]).await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_twice_rejected() {
        let config = OverlayConfig {
            relay_url: "ws://127.0.0.1:9/ws".to_string(),
            reconnect_initial: Duration::from_millis(10),
            reconnect_max: Duration::from_millis(50),
        };
        let transport = RelayTransport::new(&config, "me");
        transport.connect().await.unwrap();
        assert!(matches!(
            transport.connect().await,
            Err(P2pError::OverlayUnavailable(_))
        ));
        transport.disconnect().await.unwrap();
    }
}
