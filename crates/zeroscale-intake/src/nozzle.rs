//! Nozzle — one parallel consumer of the egress stream.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use zeroscale_core::{Envelope, Selector};
use zeroscale_registry::AppRegistry;

use crate::stream::StreamConnector;

/// Kinds every nozzle subscribes to.
const SELECTORS: [Selector; 2] = [Selector::Gauge, Selector::Timer];

/// Pause before re-dialing a failed or closed stream.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// One stream consumer. All nozzles share a shard id, so the egress
/// endpoint load-balances envelopes across them; no inter-nozzle
/// ordering is guaranteed.
pub struct Nozzle {
    index: usize,
    shard_id: String,
    connector: Arc<dyn StreamConnector>,
    registry: AppRegistry,
    envelope_tx: mpsc::Sender<Envelope>,
}

impl Nozzle {
    pub fn new(
        index: usize,
        shard_id: String,
        connector: Arc<dyn StreamConnector>,
        registry: AppRegistry,
        envelope_tx: mpsc::Sender<Envelope>,
    ) -> Self {
        Self {
            index,
            shard_id,
            connector,
            registry,
            envelope_tx,
        }
    }

    /// Stream until shutdown. Connect failures and stream closes are
    /// retried after a short pause; envelopes lost in between are
    /// acceptable (idle detection is timer-based and the stream is
    /// at-least-once anyway).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(index = self.index, shard_id = %self.shard_id, "nozzle started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let mut stream = tokio::select! {
                connected = self.connector.connect(&self.shard_id, &SELECTORS) => {
                    match connected {
                        Ok(stream) => stream,
                        Err(e) => {
                            warn!(index = self.index, error = %e, "egress connect failed");
                            tokio::select! {
                                _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                                _ = shutdown.changed() => break,
                            }
                        }
                    }
                }
                _ = shutdown.changed() => break,
            };

            debug!(index = self.index, "nozzle streaming");
            loop {
                tokio::select! {
                    batch = stream.next_batch() => {
                        match batch {
                            Some(envelopes) => {
                                if !self.forward(envelopes).await {
                                    return; // aggregator gone
                                }
                            }
                            None => {
                                warn!(index = self.index, "egress stream closed, reconnecting");
                                break;
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        info!(index = self.index, "nozzle shutting down");
                        return;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!(index = self.index, "nozzle stopped");
    }

    /// Filter a batch to enrolled apps' HTTP timers and forward them.
    /// Returns false when the envelope channel has closed.
    async fn forward(&self, envelopes: Vec<Envelope>) -> bool {
        for envelope in envelopes {
            if !envelope.is_http_timer() || !self.registry.contains(&envelope.source_id) {
                continue;
            }
            debug!(app_id = %envelope.source_id, "http request envelope");
            if self.envelope_tx.send(envelope).await.is_err() {
                return false;
            }
        }
        true
    }
}
