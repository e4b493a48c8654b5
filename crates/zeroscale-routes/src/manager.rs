//! The route manager.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use zeroscale_core::RouteEntity;
use zeroscale_platform::PlatformClient;
use zeroscale_registry::AppRegistry;

/// TTL on emitted catch routes; the send loop refreshes them well
/// within this window.
const ROUTE_TTL_SECS: u32 = 120;

/// Both route maps and the suppression set live under one lock, so a
/// reader can never observe one map updated and not the other.
#[derive(Default)]
struct RouteTable {
    /// app → its hostnames.
    app_routes: HashMap<String, Vec<String>>,
    /// hostname → app; the inverse used by the listener.
    route_app: HashMap<String, String>,
    /// Apps currently running: their catch routes are not re-emitted.
    suppressed: HashSet<String>,
}

/// Reconciles enrolled apps to their platform routes and emits catch
/// routes for every stopped app on a timer.
pub struct RouteManager {
    platform: Arc<dyn PlatformClient>,
    registry: AppRegistry,
    route_tx: mpsc::Sender<RouteEntity>,
    listener_ip: String,
    listener_port: u16,
    send_interval: Duration,
    refresh_interval: Duration,
    table: RwLock<RouteTable>,
}

impl RouteManager {
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        registry: AppRegistry,
        route_tx: mpsc::Sender<RouteEntity>,
        listener_ip: String,
        listener_port: u16,
        send_interval: Duration,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            platform,
            registry,
            route_tx,
            listener_ip,
            listener_port,
            send_interval,
            refresh_interval,
            table: RwLock::new(RouteTable::default()),
        }
    }

    // ── Loops ──────────────────────────────────────────────────────

    /// Periodically diff the registry against the route table.
    pub async fn run_refresh(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.refresh_interval.as_secs(),
            "route refresh loop started"
        );
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.refresh_interval,
            self.refresh_interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.refresh_apps().await,
                _ = shutdown.changed() => {
                    info!("route refresh loop shutting down");
                    break;
                }
            }
        }
    }

    /// Periodically emit catch routes for every non-suppressed app.
    pub async fn run_send(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.send_interval.as_secs(),
            "route send loop started"
        );
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.send_interval,
            self.send_interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.send_routes().await {
                        break; // route channel closed
                    }
                }
                _ = shutdown.changed() => {
                    info!("route send loop shutting down");
                    break;
                }
            }
        }
    }

    /// One reconciliation pass: compute the diff under a read lock,
    /// fetch routes for new apps with no lock held, apply under the
    /// write lock. A failed fetch leaves that app for the next tick.
    pub async fn refresh_apps(&self) {
        let enrolled = self.registry.snapshot();

        let (new_apps, stale_apps) = {
            let table = self.table.read().expect("route table lock");
            let new_apps: Vec<String> = enrolled
                .keys()
                .filter(|app| !table.app_routes.contains_key(*app))
                .cloned()
                .collect();
            let stale_apps: Vec<String> = table
                .app_routes
                .keys()
                .filter(|app| !enrolled.contains_key(*app))
                .cloned()
                .collect();
            (new_apps, stale_apps)
        };

        let mut fetched = Vec::new();
        for app_id in new_apps {
            match self.platform.get_app_routes(&app_id).await {
                Ok(routes) => fetched.push((app_id, routes)),
                Err(e) => warn!(%app_id, error = %e, "failed to get app routes"),
            }
        }

        let mut table = self.table.write().expect("route table lock");
        for app_id in &stale_apps {
            if let Some(routes) = table.app_routes.remove(app_id) {
                for route in &routes {
                    table.route_app.remove(route);
                }
            }
            table.suppressed.remove(app_id);
            debug!(%app_id, "dropped routes of unenrolled app");
        }
        for (app_id, routes) in fetched {
            for route in &routes {
                table.route_app.insert(route.clone(), app_id.clone());
            }
            debug!(%app_id, count = routes.len(), "app routes loaded");
            table.app_routes.insert(app_id, routes);
        }
    }

    /// Emit one catch-route entity per hostname of every stopped app.
    /// Returns false once the route channel has closed.
    pub async fn send_routes(&self) -> bool {
        let pending: Vec<Vec<String>> = {
            let table = self.table.read().expect("route table lock");
            table
                .app_routes
                .iter()
                .filter(|(app_id, _)| !table.suppressed.contains(*app_id))
                .map(|(_, routes)| routes.clone())
                .collect()
        };

        for routes in pending {
            for route in routes {
                let entity = RouteEntity {
                    route,
                    ip: self.listener_ip.clone(),
                    port: self.listener_port,
                    ttl: ROUTE_TTL_SECS,
                };
                if self.route_tx.send(entity).await.is_err() {
                    return false;
                }
            }
        }
        true
    }

    // ── Engine coupling ────────────────────────────────────────────

    /// The app started running: stop advertising its catch routes and
    /// pull the ones already registered, so live traffic reaches the
    /// real app instead of the listener.
    pub async fn disable_app_routes(&self, app_id: &str) {
        let routes = {
            let mut table = self.table.write().expect("route table lock");
            table.suppressed.insert(app_id.to_string());
            table.app_routes.get(app_id).cloned().unwrap_or_default()
        };

        if routes.is_empty() {
            return;
        }
        let entities: Vec<RouteEntity> = routes
            .into_iter()
            .map(|route| RouteEntity {
                route,
                ip: self.listener_ip.clone(),
                port: self.listener_port,
                ttl: ROUTE_TTL_SECS,
            })
            .collect();
        debug!(%app_id, count = entities.len(), "unregistering catch routes");
        if let Err(e) = self.platform.unregister_routes(&entities).await {
            warn!(%app_id, error = %e, "failed to unregister catch routes");
        }
    }

    /// The app stopped: resume catch-route emission at the next send tick.
    pub async fn enable_app_routes(&self, app_id: &str) {
        let mut table = self.table.write().expect("route table lock");
        table.suppressed.remove(app_id);
        debug!(%app_id, "catch-route emission resumed");
    }

    // ── Lookups ────────────────────────────────────────────────────

    /// App owning a hostname, if any. Used by the hijack listener.
    pub fn app_id_by_route(&self, route: &str) -> Option<String> {
        let table = self.table.read().expect("route table lock");
        table.route_app.get(route).cloned()
    }

    /// Whether an app's catch routes are currently withheld.
    pub fn is_suppressed(&self, app_id: &str) -> bool {
        let table = self.table.read().expect("route table lock");
        table.suppressed.contains(app_id)
    }
}
