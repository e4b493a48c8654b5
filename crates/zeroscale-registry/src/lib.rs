//! zeroscale-registry — in-memory image of enrolled applications.
//!
//! Maps app id → breach duration (seconds of ingress silence before the
//! app may be stopped). REST mutations apply immediately through
//! [`AppRegistry::add`]/[`AppRegistry::remove`] for low latency; the
//! periodic reload in [`RegistryRefresher`] is authoritative and
//! reconciles divergence (multi-node deployments, manual edits).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use zeroscale_state::StateStore;

/// Cheap-to-clone handle on the enrollment mapping.
#[derive(Clone, Default)]
pub struct AppRegistry {
    apps: Arc<RwLock<HashMap<String, u32>>>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enroll (or re-enroll) an app. Idempotent.
    pub fn add(&self, app_id: &str, breach_duration_secs: u32) {
        let mut apps = self.apps.write().expect("registry lock");
        debug!(%app_id, breach_duration_secs, "app enrolled");
        apps.insert(app_id.to_string(), breach_duration_secs);
    }

    /// Remove an enrollment. Idempotent.
    pub fn remove(&self, app_id: &str) {
        let mut apps = self.apps.write().expect("registry lock");
        debug!(%app_id, "app unenrolled");
        apps.remove(app_id);
    }

    /// Point-in-time copy of the mapping.
    pub fn snapshot(&self) -> HashMap<String, u32> {
        self.apps.read().expect("registry lock").clone()
    }

    pub fn contains(&self, app_id: &str) -> bool {
        self.apps.read().expect("registry lock").contains_key(app_id)
    }

    /// Breach window for one app, if enrolled.
    pub fn breach_for(&self, app_id: &str) -> Option<u32> {
        self.apps.read().expect("registry lock").get(app_id).copied()
    }

    /// Atomically replace the whole mapping (used by the refresher).
    fn replace(&self, apps: HashMap<String, u32>) {
        *self.apps.write().expect("registry lock") = apps;
    }
}

/// Background task that keeps an [`AppRegistry`] in sync with the store.
pub struct RegistryRefresher {
    registry: AppRegistry,
    store: StateStore,
    interval: Duration,
}

impl RegistryRefresher {
    pub fn new(registry: AppRegistry, store: StateStore, interval: Duration) -> Self {
        Self {
            registry,
            store,
            interval,
        }
    }

    /// One reload from the store. On error the previous mapping is kept.
    pub fn refresh(&self) {
        match self.store.list_applications() {
            Ok(apps) => {
                debug!(count = apps.len(), "registry refreshed from store");
                self.registry.replace(apps);
            }
            Err(e) => {
                warn!(error = %e, "registry refresh failed, keeping previous mapping");
            }
        }
    }

    /// Run the refresh loop: one reload immediately, then one per tick.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "registry refresher started");
        loop {
            self.refresh();
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    info!("registry refresher shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_remove_snapshot() {
        let registry = AppRegistry::new();
        registry.add("app-a", 60);
        registry.add("app-b", 300);
        registry.remove("app-a");
        registry.remove("app-a"); // idempotent

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["app-b"], 300);
        assert!(registry.contains("app-b"));
        assert_eq!(registry.breach_for("app-b"), Some(300));
        assert_eq!(registry.breach_for("app-a"), None);
    }

    #[test]
    fn add_overwrites_breach_duration() {
        let registry = AppRegistry::new();
        registry.add("app-a", 60);
        registry.add("app-a", 120);
        assert_eq!(registry.breach_for("app-a"), Some(120));
    }

    #[test]
    fn refresh_replaces_mapping_wholesale() {
        let store = StateStore::open_in_memory().unwrap();
        store.save_application("app-a", 60).unwrap();

        let registry = AppRegistry::new();
        registry.add("stale-app", 10);

        let refresher =
            RegistryRefresher::new(registry.clone(), store.clone(), Duration::from_secs(60));
        refresher.refresh();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["app-a"], 60);
    }

    #[tokio::test(start_paused = true)]
    async fn run_reloads_on_each_tick() {
        let store = StateStore::open_in_memory().unwrap();
        let registry = AppRegistry::new();
        let refresher =
            RegistryRefresher::new(registry.clone(), store.clone(), Duration::from_secs(30));

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(refresher.run(shutdown_rx));

        // First reload happens before the first tick.
        tokio::task::yield_now().await;
        assert!(registry.snapshot().is_empty());

        store.save_application("app-a", 60).unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(registry.breach_for("app-a"), Some(60));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
