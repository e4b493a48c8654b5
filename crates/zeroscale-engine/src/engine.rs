//! The scaling engine.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;
use tracing::{debug, error, info};

use zeroscale_core::{AppScalingHistory, AppState, ScalingStatus, ScalingType, Trigger};
use zeroscale_platform::PlatformClient;
use zeroscale_state::StateStore;

use crate::locks::AppLocks;

type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// Capability to suspend or resume catch-route emission for one app.
/// The route manager supplies these; the engine never holds a reference
/// to the manager itself.
pub type RouteToggleFn = Arc<dyn Fn(String) -> BoxFuture + Send + Sync>;

/// Confirmation poll cadence during start/stop.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Serializes zero-crossing scaling actions per app, gates repeats with
/// a cooldown, and confirms every action against the platform before
/// touching route state or writing history.
pub struct ScalingEngine {
    platform: Arc<dyn PlatformClient>,
    store: StateStore,
    enable_routes: RouteToggleFn,
    disable_routes: RouteToggleFn,
    cool_down: Duration,
    start_stop_deadline: Duration,
    locks: AppLocks,
}

impl ScalingEngine {
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        store: StateStore,
        enable_routes: RouteToggleFn,
        disable_routes: RouteToggleFn,
        cool_down: Duration,
        start_stop_deadline: Duration,
        lock_size: usize,
    ) -> Self {
        Self {
            platform,
            store,
            enable_routes,
            disable_routes,
            cool_down,
            start_stop_deadline,
            locks: AppLocks::new(lock_size),
        }
    }

    /// Cold-start an app on behalf of an intercepted ingress request.
    ///
    /// Holds the app's stripe for the whole call: issues the platform
    /// start, then polls the running instance count until at least one
    /// instance is up or the deadline passes. Exactly one history row is
    /// written per terminal state.
    pub async fn start_app(&self, app_id: &str) -> anyhow::Result<()> {
        let mut cooldowns = self.locks.lock(app_id).await;
        info!(%app_id, "start application");

        let mut history = new_history(app_id, ScalingType::Start2Zero, "ingress request received");

        if let Err(e) = self.platform.start_app(app_id).await {
            error!(%app_id, error = %e, "failed to start application");
            history.message = "failed to send start application request".to_string();
            history.error = e.to_string();
            self.save_history(&history);
            return Err(e.into());
        }

        let deadline = Instant::now() + self.start_stop_deadline;
        loop {
            if Instant::now() >= deadline {
                info!(%app_id, "deadline passed but there are no running instances");
                history.message = format!(
                    "failed to start application in {} seconds",
                    self.start_stop_deadline.as_secs()
                );
                self.save_history(&history);
                anyhow::bail!("failed to start application");
            }

            match self.platform.get_running_instance_count(app_id).await {
                Ok(count) if count >= 1 => {
                    debug!(%app_id, running = count, "start confirmed");
                    cooldowns.insert(app_id.to_string(), Instant::now() + self.cool_down);
                    (self.disable_routes)(app_id.to_string()).await;
                    history.status = ScalingStatus::Succeeded;
                    history.new_instances = count as i32;
                    self.save_history(&history);
                    return Ok(());
                }
                Ok(_) => debug!(%app_id, "no running instance yet"),
                Err(e) => {
                    // Transient observation failure; keep polling until
                    // the deadline decides.
                    error!(%app_id, error = %e, "failed to get running instance count");
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Scale an idle app down to zero.
    ///
    /// The cooldown gate and the already-stopped check are silent
    /// ignores: they return Ok without a platform action or a history
    /// row, because the detector re-emits triggers for as long as the
    /// app stays idle.
    pub async fn stop_app(&self, trigger: &Trigger) -> anyhow::Result<()> {
        let app_id = trigger.app_id.as_str();
        let mut cooldowns = self.locks.lock(app_id).await;
        info!(%app_id, breach_secs = trigger.breach_duration_secs, "stop application");

        if let Some(next_allowed) = cooldowns.get(app_id) {
            if Instant::now() <= *next_allowed {
                debug!(%app_id, "in cooldown, ignoring trigger");
                return Ok(());
            }
        }

        let mut history = new_history(
            app_id,
            ScalingType::Stop2Zero,
            &format!(
                "no ingress request received for {} seconds",
                trigger.breach_duration_secs
            ),
        );

        let summary = match self.platform.get_app_summary(app_id).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(%app_id, error = %e, "failed to get app summary before stopping");
                history.message = "failed to get application status".to_string();
                history.error = e.to_string();
                self.save_history(&history);
                return Err(e.into());
            }
        };
        if summary.state == AppState::Stopped {
            info!(%app_id, "app already stopped");
            return Ok(());
        }

        if let Err(e) = self.platform.stop_app(app_id).await {
            error!(%app_id, error = %e, "failed to stop application");
            history.message = "failed to send stop application request".to_string();
            history.error = e.to_string();
            self.save_history(&history);
            return Err(e.into());
        }

        let deadline = Instant::now() + self.start_stop_deadline;
        loop {
            if Instant::now() >= deadline {
                info!(%app_id, "deadline passed but there are still running instances");
                history.message = format!(
                    "failed to stop application in {} seconds",
                    self.start_stop_deadline.as_secs()
                );
                self.save_history(&history);
                anyhow::bail!("failed to stop application");
            }

            let summary = match self.platform.get_app_summary(app_id).await {
                Ok(summary) => summary,
                Err(e) => {
                    error!(%app_id, error = %e, "failed to get app summary while polling stop");
                    history.message = "failed to get application status".to_string();
                    history.error = e.to_string();
                    self.save_history(&history);
                    return Err(e.into());
                }
            };
            if summary.state == AppState::Stopped {
                debug!(%app_id, "stop confirmed");
                cooldowns.insert(app_id.to_string(), Instant::now() + self.cool_down);
                (self.enable_routes)(app_id.to_string()).await;
                history.status = ScalingStatus::Succeeded;
                self.save_history(&history);
                return Ok(());
            }
            debug!(%app_id, "app has not stopped yet");
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// History writes are best-effort: a store failure is logged and the
    /// scaling outcome stands.
    fn save_history(&self, history: &AppScalingHistory) {
        if let Err(e) = self.store.save_scaling_history(history) {
            error!(app_id = %history.app_id, error = %e, "failed to save scaling history");
        }
    }
}

fn new_history(app_id: &str, scaling_type: ScalingType, reason: &str) -> AppScalingHistory {
    AppScalingHistory {
        app_id: app_id.to_string(),
        timestamp: now_nanos(),
        scaling_type,
        // Overwritten on success; every failure path keeps it.
        status: ScalingStatus::Failed,
        old_instances: 0,
        new_instances: 0,
        reason: reason.to_string(),
        message: String::new(),
        error: String::new(),
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}
