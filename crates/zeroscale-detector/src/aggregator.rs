//! The idleness aggregator.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info};

use zeroscale_core::{Envelope, Trigger};
use zeroscale_registry::AppRegistry;

/// Aggregates request telemetry into per-app silence and emits a
/// scale-down trigger once the silence exceeds the app's breach window.
///
/// All state lives on the single task driving [`IdlenessDetector::run`];
/// ingest, evaluation and refresh cannot interleave, which is what makes
/// the unlocked maps sound. The evaluator deliberately does not reset
/// an app's last-request time after emitting a trigger: duplicates are
/// expected and the scaling engine's cooldown de-duplicates them.
pub struct IdlenessDetector {
    envelope_rx: mpsc::Receiver<Envelope>,
    trigger_tx: mpsc::Sender<Trigger>,
    registry: AppRegistry,
    evaluation_interval: Duration,
    app_refresh_interval: Duration,
    /// When each app last saw an ingress request.
    last_request: HashMap<String, Instant>,
    /// Mirror of the registry at the last refresh: app → breach seconds.
    breach_window: HashMap<String, u32>,
}

impl IdlenessDetector {
    pub fn new(
        envelope_rx: mpsc::Receiver<Envelope>,
        trigger_tx: mpsc::Sender<Trigger>,
        registry: AppRegistry,
        evaluation_interval: Duration,
        app_refresh_interval: Duration,
    ) -> Self {
        Self {
            envelope_rx,
            trigger_tx,
            registry,
            evaluation_interval,
            app_refresh_interval,
            last_request: HashMap::new(),
            breach_window: HashMap::new(),
        }
    }

    /// Run until shutdown. A full trigger channel blocks the evaluation
    /// arm, which also pauses ingest and refresh; that backpressure on
    /// the detector is intentional.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            evaluation_secs = self.evaluation_interval.as_secs(),
            refresh_secs = self.app_refresh_interval.as_secs(),
            "idleness detector started"
        );

        let start = Instant::now();
        let mut evaluation =
            tokio::time::interval_at(start + self.evaluation_interval, self.evaluation_interval);
        evaluation.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut refresh =
            tokio::time::interval_at(start + self.app_refresh_interval, self.app_refresh_interval);
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut ingest_open = true;
        loop {
            tokio::select! {
                maybe = self.envelope_rx.recv(), if ingest_open => {
                    match maybe {
                        Some(envelope) => self.ingest(envelope),
                        None => {
                            debug!("envelope channel closed");
                            ingest_open = false;
                        }
                    }
                }
                _ = evaluation.tick() => {
                    if !self.evaluate().await {
                        break; // trigger channel closed
                    }
                }
                _ = refresh.tick() => self.refresh(),
                _ = shutdown.changed() => {
                    info!("idleness detector shutting down");
                    break;
                }
            }
        }
    }

    fn ingest(&mut self, envelope: Envelope) {
        debug!(app_id = %envelope.source_id, "app request");
        // The intake filter normally rejects unknown source ids, but the
        // aggregator does not re-validate; the next refresh reconciles.
        self.last_request
            .insert(envelope.source_id, Instant::now());
    }

    /// Emit one trigger per app whose silence exceeds its breach window.
    /// Returns false once the trigger channel has closed.
    async fn evaluate(&self) -> bool {
        let now = Instant::now();
        for (app_id, last) in &self.last_request {
            let Some(&breach_secs) = self.breach_window.get(app_id) else {
                continue; // seen before the registry knows it; wait for refresh
            };
            let silence = now.duration_since(*last);
            debug!(%app_id, silence_secs = silence.as_secs(), "evaluating silence");
            if silence > Duration::from_secs(u64::from(breach_secs)) {
                debug!(%app_id, breach_secs, "emitting scale-down trigger");
                let trigger = Trigger {
                    app_id: app_id.clone(),
                    breach_duration_secs: breach_secs,
                };
                if self.trigger_tx.send(trigger).await.is_err() {
                    return false;
                }
            }
        }
        true
    }

    /// Replace the breach map with the current registry snapshot. Newly
    /// enrolled apps start their silence clock now, so enrollment never
    /// causes an immediate scale-down; departed apps are forgotten.
    fn refresh(&mut self) {
        let snapshot = self.registry.snapshot();
        let now = Instant::now();
        for app_id in snapshot.keys() {
            self.last_request.entry(app_id.clone()).or_insert(now);
        }
        self.last_request
            .retain(|app_id, _| snapshot.contains_key(app_id));
        self.breach_window = snapshot;
        debug!(apps = self.breach_window.len(), "detector refreshed enrollments");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeroscale_core::EnvelopeMessage;

    fn http_timer(source_id: &str) -> Envelope {
        Envelope {
            source_id: source_id.to_string(),
            message: EnvelopeMessage::Timer {
                name: "http".to_string(),
                start_ns: 0,
                stop_ns: 1,
            },
        }
    }

    struct Harness {
        envelope_tx: mpsc::Sender<Envelope>,
        trigger_rx: mpsc::Receiver<Trigger>,
        registry: AppRegistry,
        shutdown_tx: watch::Sender<bool>,
        handle: tokio::task::JoinHandle<()>,
    }

    /// Detector with a 10 s evaluation tick and a 5 s refresh tick.
    fn start_detector(trigger_capacity: usize) -> Harness {
        let (envelope_tx, envelope_rx) = mpsc::channel(64);
        let (trigger_tx, trigger_rx) = mpsc::channel(trigger_capacity);
        let registry = AppRegistry::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let detector = IdlenessDetector::new(
            envelope_rx,
            trigger_tx,
            registry.clone(),
            Duration::from_secs(10),
            Duration::from_secs(5),
        );
        let handle = tokio::spawn(detector.run(shutdown_rx));

        Harness {
            envelope_tx,
            trigger_rx,
            registry,
            shutdown_tx,
            handle,
        }
    }

    async fn advance(duration: Duration) {
        tokio::time::sleep(duration).await;
        // Let the detector task drain its ready arms.
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn emits_trigger_after_breach_window() {
        let mut h = start_detector(16);
        h.registry.add("app-a", 60);

        // Refresh tick picks up the enrollment; a request arrives.
        advance(Duration::from_secs(6)).await;
        h.envelope_tx.send(http_timer("app-a")).await.unwrap();

        // 61 seconds of silence: the evaluation after that emits.
        advance(Duration::from_secs(70)).await;

        let trigger = h.trigger_rx.recv().await.unwrap();
        assert_eq!(trigger.app_id, "app-a");
        assert_eq!(trigger.breach_duration_secs, 60);

        h.shutdown_tx.send(true).unwrap();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_before_breach_emits_nothing() {
        let mut h = start_detector(16);
        h.registry.add("app-a", 60);

        advance(Duration::from_secs(6)).await;
        h.envelope_tx.send(http_timer("app-a")).await.unwrap();

        // Only 30 seconds of silence.
        advance(Duration::from_secs(30)).await;
        assert!(h.trigger_rx.try_recv().is_err());

        h.shutdown_tx.send(true).unwrap();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn newly_enrolled_app_is_not_scaled_immediately() {
        let mut h = start_detector(16);
        h.registry.add("app-a", 60);

        // Never any traffic; the refresh seeded last-request to "now",
        // so the first evaluations stay quiet.
        advance(Duration::from_secs(30)).await;
        assert!(h.trigger_rx.try_recv().is_err());

        // After the window passes with no traffic at all, it fires.
        advance(Duration::from_secs(60)).await;
        assert_eq!(h.trigger_rx.recv().await.unwrap().app_id, "app-a");

        h.shutdown_tx.send(true).unwrap();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_triggers_are_expected() {
        let mut h = start_detector(16);
        h.registry.add("app-a", 10);

        advance(Duration::from_secs(6)).await;
        h.envelope_tx.send(http_timer("app-a")).await.unwrap();

        // Several evaluation ticks past the window: one trigger each,
        // because the evaluator never resets last-request.
        advance(Duration::from_secs(40)).await;
        let mut count = 0;
        while h.trigger_rx.try_recv().is_ok() {
            count += 1;
        }
        assert!(count >= 2, "expected repeated triggers, got {count}");

        h.shutdown_tx.send(true).unwrap();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unenrolled_app_is_dropped_on_refresh() {
        let mut h = start_detector(16);
        h.registry.add("app-a", 10);

        advance(Duration::from_secs(6)).await;
        h.envelope_tx.send(http_timer("app-a")).await.unwrap();

        // Remove before the breach elapses; refresh forgets the app.
        h.registry.remove("app-a");
        advance(Duration::from_secs(60)).await;
        assert!(h.trigger_rx.try_recv().is_err());

        h.shutdown_tx.send(true).unwrap();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn full_trigger_channel_blocks_but_loses_nothing() {
        // Capacity 1, three idle apps, no consumer: the evaluator blocks
        // mid-send until triggers are drained.
        let mut h = start_detector(1);
        for app in ["app-a", "app-b", "app-c"] {
            h.registry.add(app, 10);
        }

        // Enrollment refresh, then silence well past the window.
        advance(Duration::from_secs(6)).await;
        advance(Duration::from_secs(30)).await;

        // Drain: all three apps' triggers arrive once we start reading.
        let mut seen = std::collections::HashSet::new();
        while seen.len() < 3 {
            let trigger = h.trigger_rx.recv().await.unwrap();
            seen.insert(trigger.app_id);
        }
        assert_eq!(seen.len(), 3);

        h.shutdown_tx.send(true).unwrap();
        // The detector may be mid-send on a full channel; dropping the
        // receiver closes it and unblocks the evaluator.
        drop(h.trigger_rx);
        h.handle.await.unwrap();
    }
}
