//! Trigger workers — the bridge from detection to action.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use zeroscale_core::Trigger;

type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>;

/// Capability handed to the workers; in production it wraps
/// `ScalingEngine::stop_app`.
pub type StopAppFn = Arc<dyn Fn(Trigger) -> BoxFuture + Send + Sync>;

/// Spawn `count` workers draining the trigger channel.
///
/// A failed stop is logged and the trigger dropped, never re-queued:
/// the detector re-emits on its next evaluation tick as long as the app
/// stays idle.
pub fn spawn_trigger_workers(
    count: usize,
    trigger_rx: mpsc::Receiver<Trigger>,
    stop_app: StopAppFn,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    // tokio mpsc is single-consumer; the workers take turns on the
    // receiver and release it before acting on a trigger.
    let trigger_rx = Arc::new(Mutex::new(trigger_rx));

    (0..count)
        .map(|index| {
            let trigger_rx = trigger_rx.clone();
            let stop_app = stop_app.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                info!(index, "trigger worker started");
                loop {
                    let trigger = tokio::select! {
                        trigger = async { trigger_rx.lock().await.recv().await } => trigger,
                        _ = shutdown.changed() => {
                            info!(index, "trigger worker shutting down");
                            break;
                        }
                    };
                    let Some(trigger) = trigger else {
                        debug!(index, "trigger channel closed");
                        break;
                    };
                    debug!(index, app_id = %trigger.app_id, "handling scale-down trigger");
                    if let Err(e) = stop_app(trigger.clone()).await {
                        warn!(
                            index,
                            app_id = %trigger.app_id,
                            error = %e,
                            "failed to stop application"
                        );
                    }
                }
            })
        })
        .collect()
}
