//! Domain types shared across the autoscaler.
//!
//! These types cross crate boundaries: triggers flow from the idleness
//! detector to the scaling engine, route entities from the route manager
//! to the emitter, and scaling history rows into the state store and out
//! through the REST API. All of them are serializable to JSON.

use serde::{Deserialize, Serialize};

/// Unique identifier of an application on the platform.
pub type AppId = String;

// ── Scaling ────────────────────────────────────────────────────────

/// Announcement that an app has been silent past its breach window.
///
/// Produced by the idleness detector, consumed by a trigger worker which
/// hands it to the scaling engine. Duplicate triggers for the same idle
/// app are expected; the engine's cooldown de-duplicates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub app_id: AppId,
    /// Seconds of ingress silence that tripped this trigger.
    pub breach_duration_secs: u32,
}

/// Direction of a zero-crossing scaling action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingType {
    /// Cold start: zero instances → at least one.
    Start2Zero,
    /// Scale down: running → zero instances.
    Stop2Zero,
}

/// Outcome of a scaling action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingStatus {
    Succeeded,
    Failed,
    Ignored,
}

/// One row of persisted scaling history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppScalingHistory {
    pub app_id: AppId,
    /// Wall-clock nanoseconds since the Unix epoch.
    pub timestamp: i64,
    pub scaling_type: ScalingType,
    pub status: ScalingStatus,
    pub old_instances: i32,
    pub new_instances: i32,
    pub reason: String,
    pub message: String,
    pub error: String,
}

// ── Platform ───────────────────────────────────────────────────────

/// Lifecycle state the platform reports for an app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppState {
    #[serde(rename = "STARTED")]
    Started,
    #[serde(rename = "STOPPED")]
    Stopped,
    #[serde(other)]
    Unknown,
}

/// Summary the platform control plane returns for an app.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSummary {
    pub state: AppState,
}

// ── Routing ────────────────────────────────────────────────────────

/// One route registration sent to the routing API.
///
/// Points `route` (a hostname) at the hijack listener so that traffic
/// for a stopped app lands there instead of nowhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntity {
    pub route: String,
    pub ip: String,
    pub port: u16,
    pub ttl: u32,
}

// ── API ────────────────────────────────────────────────────────────

/// JSON error body returned by the REST API and the hijack listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}
