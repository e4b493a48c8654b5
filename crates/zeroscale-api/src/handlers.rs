//! REST API handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{error, info};

use zeroscale_core::ErrorResponse;
use zeroscale_state::Order;

use crate::ApiState;

/// PUT request body.
#[derive(Debug, Deserialize)]
pub struct Policy {
    pub breach_duration: u32,
}

/// Query parameters of the history endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub start: Option<String>,
    pub end: Option<String>,
    pub order: Option<String>,
    pub include: Option<String>,
}

fn error_response(status: StatusCode, code: &str, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            code: code.to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

fn bad_request(message: &str) -> axum::response::Response {
    error_response(StatusCode::BAD_REQUEST, "Bad-Request", message)
}

fn server_error(message: &str) -> axum::response::Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal-Server-Error",
        message,
    )
}

/// PUT /v1/apps/{app_id}/scale2zero
///
/// The body is parsed by hand so a malformed payload surfaces as a
/// server error, matching the enrollment contract.
pub async fn enable(
    State(state): State<ApiState>,
    Path(app_id): Path<String>,
    body: Bytes,
) -> axum::response::Response {
    if app_id.is_empty() {
        return bad_request("AppId is required");
    }
    let policy: Policy = match serde_json::from_slice(&body) {
        Ok(policy) => policy,
        Err(e) => {
            error!(%app_id, error = %e, "failed to parse enrollment body");
            return server_error("Failed to unmarshal request body");
        }
    };

    info!(%app_id, breach_duration = policy.breach_duration, "enable scale-to-zero");
    if let Err(e) = state.store.save_application(&app_id, policy.breach_duration) {
        error!(%app_id, error = %e, "failed to save application");
        return server_error("Error saving application");
    }
    state.registry.add(&app_id, policy.breach_duration);
    StatusCode::OK.into_response()
}

/// DELETE /v1/apps/{app_id}/scale2zero
///
/// Idempotent: deleting an unenrolled app still returns 200.
pub async fn disable(
    State(state): State<ApiState>,
    Path(app_id): Path<String>,
) -> axum::response::Response {
    if app_id.is_empty() {
        return bad_request("AppId is required");
    }

    info!(%app_id, "disable scale-to-zero");
    if let Err(e) = state.store.delete_application(&app_id) {
        error!(%app_id, error = %e, "failed to delete application");
        return server_error("Error deleting application");
    }
    state.registry.remove(&app_id);
    StatusCode::OK.into_response()
}

/// GET /v1/apps/{app_id}/scaling_histories?start=&end=&order=&include=
///
/// Defaults: start=0, end="now", order=desc. `include=all` also returns
/// Ignored rows.
pub async fn scaling_histories(
    State(state): State<ApiState>,
    Path(app_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> axum::response::Response {
    let start = match &query.start {
        None => 0,
        Some(raw) => match raw.parse::<i64>() {
            Ok(value) => value,
            Err(_) => return bad_request("Error parsing start time"),
        },
    };
    let end = match &query.end {
        None => -1,
        Some(raw) => match raw.parse::<i64>() {
            Ok(value) => value,
            Err(_) => return bad_request("Error parsing end time"),
        },
    };
    let order = match query.order.as_deref() {
        None => Order::Desc,
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "asc" => Order::Asc,
            "desc" => Order::Desc,
            _ => {
                return bad_request(
                    "Incorrect order parameter in query string, the value can only be 'asc' or 'desc'",
                )
            }
        },
    };
    let include_all = match query.include.as_deref() {
        None => false,
        Some(raw) if raw.eq_ignore_ascii_case("all") => true,
        Some(_) => {
            return bad_request("Incorrect include parameter in query string, the value can only be 'all'")
        }
    };

    match state
        .store
        .retrieve_scaling_histories(&app_id, start, end, order, include_all)
    {
        Ok(histories) => Json(histories).into_response(),
        Err(e) => {
            error!(%app_id, error = %e, "failed to retrieve scaling histories");
            server_error("Error getting scaling histories from database")
        }
    }
}
