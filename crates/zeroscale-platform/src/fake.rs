//! In-memory platform double for tests.
//!
//! By default a started app immediately reports one running instance and
//! a stopped app immediately reports STOPPED, so the engine's
//! confirmation polls succeed on the first try. Tests exercising the
//! deadline paths can freeze an app so start/stop requests are accepted
//! but its observed state never changes.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use zeroscale_core::{AppState, AppSummary, RouteEntity};

use crate::client::{PlatformClient, PlatformError, PlatformResult};

#[derive(Default)]
struct FakeState {
    states: HashMap<String, AppState>,
    instances: HashMap<String, u32>,
    routes: HashMap<String, Vec<String>>,
    frozen: HashSet<String>,
    fail_start: HashSet<String>,
    fail_stop: HashSet<String>,
    fail_summary: HashSet<String>,
    fail_register_routes: bool,
    fail_get_routes: HashSet<String>,
    start_calls: Vec<String>,
    stop_calls: Vec<String>,
    registered: Vec<RouteEntity>,
    unregistered: Vec<RouteEntity>,
}

/// Scriptable in-memory [`PlatformClient`].
#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<FakeState>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake platform lock")
    }

    // ── Scripting ──────────────────────────────────────────────────

    /// Seed an app's observed state and running instance count.
    pub fn set_app(&self, app_id: &str, state: AppState, instances: u32) {
        let mut inner = self.lock();
        inner.states.insert(app_id.to_string(), state);
        inner.instances.insert(app_id.to_string(), instances);
    }

    /// Seed the hostnames `get_app_routes` returns for an app.
    pub fn set_routes(&self, app_id: &str, routes: Vec<String>) {
        self.lock().routes.insert(app_id.to_string(), routes);
    }

    /// Accept start/stop requests for this app but never change its
    /// observed state (drives the engine into its deadline path).
    pub fn freeze(&self, app_id: &str) {
        self.lock().frozen.insert(app_id.to_string());
    }

    pub fn fail_start(&self, app_id: &str) {
        self.lock().fail_start.insert(app_id.to_string());
    }

    pub fn fail_stop(&self, app_id: &str) {
        self.lock().fail_stop.insert(app_id.to_string());
    }

    pub fn fail_summary(&self, app_id: &str) {
        self.lock().fail_summary.insert(app_id.to_string());
    }

    pub fn set_fail_register_routes(&self, fail: bool) {
        self.lock().fail_register_routes = fail;
    }

    pub fn set_fail_get_routes(&self, app_id: &str, fail: bool) {
        let mut inner = self.lock();
        if fail {
            inner.fail_get_routes.insert(app_id.to_string());
        } else {
            inner.fail_get_routes.remove(app_id);
        }
    }

    // ── Inspection ─────────────────────────────────────────────────

    pub fn start_calls(&self) -> Vec<String> {
        self.lock().start_calls.clone()
    }

    pub fn stop_calls(&self) -> Vec<String> {
        self.lock().stop_calls.clone()
    }

    pub fn registered_routes(&self) -> Vec<RouteEntity> {
        self.lock().registered.clone()
    }

    pub fn unregistered_routes(&self) -> Vec<RouteEntity> {
        self.lock().unregistered.clone()
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn start_app(&self, app_id: &str) -> PlatformResult<()> {
        let mut inner = self.lock();
        inner.start_calls.push(app_id.to_string());
        if inner.fail_start.contains(app_id) {
            return Err(PlatformError::Status {
                status: 502,
                body: "start rejected".to_string(),
            });
        }
        if !inner.frozen.contains(app_id) {
            inner.states.insert(app_id.to_string(), AppState::Started);
            inner.instances.insert(app_id.to_string(), 1);
        }
        Ok(())
    }

    async fn stop_app(&self, app_id: &str) -> PlatformResult<()> {
        let mut inner = self.lock();
        inner.stop_calls.push(app_id.to_string());
        if inner.fail_stop.contains(app_id) {
            return Err(PlatformError::Status {
                status: 502,
                body: "stop rejected".to_string(),
            });
        }
        if !inner.frozen.contains(app_id) {
            inner.states.insert(app_id.to_string(), AppState::Stopped);
            inner.instances.insert(app_id.to_string(), 0);
        }
        Ok(())
    }

    async fn get_app_summary(&self, app_id: &str) -> PlatformResult<AppSummary> {
        let inner = self.lock();
        if inner.fail_summary.contains(app_id) {
            return Err(PlatformError::Transport("summary unavailable".to_string()));
        }
        let state = inner
            .states
            .get(app_id)
            .copied()
            .unwrap_or(AppState::Stopped);
        Ok(AppSummary { state })
    }

    async fn get_running_instance_count(&self, app_id: &str) -> PlatformResult<u32> {
        Ok(self.lock().instances.get(app_id).copied().unwrap_or(0))
    }

    async fn get_app_routes(&self, app_id: &str) -> PlatformResult<Vec<String>> {
        let inner = self.lock();
        if inner.fail_get_routes.contains(app_id) {
            return Err(PlatformError::Transport("routes unavailable".to_string()));
        }
        Ok(inner.routes.get(app_id).cloned().unwrap_or_default())
    }

    async fn register_routes(&self, routes: &[RouteEntity]) -> PlatformResult<()> {
        let mut inner = self.lock();
        if inner.fail_register_routes {
            return Err(PlatformError::Transport("routing api unavailable".to_string()));
        }
        inner.registered.extend_from_slice(routes);
        Ok(())
    }

    async fn unregister_routes(&self, routes: &[RouteEntity]) -> PlatformResult<()> {
        self.lock().unregistered.extend_from_slice(routes);
        Ok(())
    }
}
