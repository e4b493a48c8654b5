//! The platform operation contract.

use async_trait::async_trait;
use thiserror::Error;

use zeroscale_core::{AppSummary, RouteEntity};

/// Result type alias for platform operations.
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Failure modes of the platform control plane.
///
/// All of these are transient from the autoscaler's point of view: the
/// caller logs, records the failure where the protocol asks for it, and
/// lets the next tick retry.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("platform returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode platform response: {0}")]
    Decode(String),

    #[error("invalid endpoint url: {0}")]
    InvalidEndpoint(String),
}

/// Operations the autoscaler needs from the platform.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Ask the platform to start the app. Returns once the request is
    /// accepted; actually reaching a running instance is observed via
    /// [`Self::get_running_instance_count`].
    async fn start_app(&self, app_id: &str) -> PlatformResult<()>;

    /// Ask the platform to stop the app. Confirmation is observed via
    /// [`Self::get_app_summary`].
    async fn stop_app(&self, app_id: &str) -> PlatformResult<()>;

    /// Current lifecycle state of the app.
    async fn get_app_summary(&self, app_id: &str) -> PlatformResult<AppSummary>;

    /// Number of instances in the RUNNING state.
    async fn get_running_instance_count(&self, app_id: &str) -> PlatformResult<u32>;

    /// Hostnames currently routed to the app.
    async fn get_app_routes(&self, app_id: &str) -> PlatformResult<Vec<String>>;

    /// Bulk-register catch routes with the routing API.
    async fn register_routes(&self, routes: &[RouteEntity]) -> PlatformResult<()>;

    /// Bulk-remove catch routes from the routing API.
    async fn unregister_routes(&self, routes: &[RouteEntity]) -> PlatformResult<()>;
}
