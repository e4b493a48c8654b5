//! zeroscale-api — the public REST surface.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | PUT | `/v1/apps/{app_id}/scale2zero` | Enroll an app with a breach duration |
//! | DELETE | `/v1/apps/{app_id}/scale2zero` | Remove an enrollment |
//! | GET | `/v1/apps/{app_id}/scaling_histories` | Query scaling history |
//!
//! Enrollment mutations persist first, then hook the in-memory registry
//! so the control loop reacts without waiting for the next refresh.

pub mod handlers;

use axum::routing::get;
use axum::Router;

use zeroscale_registry::AppRegistry;
use zeroscale_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub registry: AppRegistry,
}

/// Build the API router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/v1/apps/{app_id}/scale2zero",
            axum::routing::put(handlers::enable).delete(handlers::disable),
        )
        .route(
            "/v1/apps/{app_id}/scaling_histories",
            get(handlers::scaling_histories),
        )
        .with_state(state)
}
