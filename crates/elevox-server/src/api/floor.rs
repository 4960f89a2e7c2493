//! Floor reading endpoints.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use elevox_core::{floor_label, ElevoxError, FloorReading};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// The current floor reading.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "floor": 1,
    "label": "Floor 1",
    "observed_at_utc": "2025-01-15T09:30:05Z",
    "age_secs": 3
}))]
pub struct FloorResponse {
    /// Estimated floor.
    #[schema(example = 1)]
    pub floor: u32,

    /// Display label for the floor.
    #[schema(example = "Floor 1")]
    pub label: String,

    /// UTC timestamp of the scan window that produced the reading.
    #[schema(example = "2025-01-15T09:30:05Z")]
    pub observed_at_utc: String,

    /// Seconds since the reading was produced.
    #[schema(example = 3)]
    pub age_secs: i64,
}

impl From<FloorReading> for FloorResponse {
    fn from(reading: FloorReading) -> Self {
        Self {
            floor: reading.floor,
            label: floor_label(reading.floor),
            observed_at_utc: reading
                .observed_at
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            age_secs: (Utc::now() - reading.observed_at).num_seconds().max(0),
        }
    }
}

/// Result of resetting the estimator.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "previous_floor": 2,
    "reset_at_utc": "2025-01-15T09:31:00Z"
}))]
pub struct ResetResponse {
    /// Floor the estimator was locked on before the reset.
    #[schema(example = 2)]
    pub previous_floor: Option<u32>,

    /// UTC timestamp of the reset.
    #[schema(example = "2025-01-15T09:31:00Z")]
    pub reset_at_utc: String,
}

// ============================================================================
// Router
// ============================================================================

/// Creates the floor router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_floor))
        .route("/reset", post(reset_floor))
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the current floor.
#[utoipa::path(
    get,
    path = "/api/floor",
    tag = "floor",
    operation_id = "getFloor",
    summary = "Get the detected floor",
    description = "Returns the last floor produced by the scan cycle. The value is \
        read from the published reading and never waits for a scan. A reading \
        restored from disk is returned until the first new one is produced. \
        Without a reading, a scan failure reported by the last cycle is returned \
        in place of 404.",
    responses(
        (status = 200, description = "Current floor", body = FloorResponse),
        (status = 403, description = "Scanning permission denied", body = crate::api::error::ErrorResponse),
        (status = 404, description = "No floor detected yet", body = crate::api::error::ErrorResponse),
        (status = 501, description = "Bluetooth LE scanning unsupported", body = crate::api::error::ErrorResponse),
        (status = 503, description = "Bluetooth adapter unavailable", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn get_floor(State(state): State<AppState>) -> ApiResult<Json<FloorResponse>> {
    let scheduler = state.scheduler();
    if let Some(reading) = scheduler.current_reading() {
        return Ok(Json(FloorResponse::from(reading)));
    }

    match scheduler.latest_status().and_then(|status| status.failure()) {
        Some(err) => Err(ElevoxError::from(err).into()),
        None => Err(ApiError::not_found(
            "no_reading",
            "No floor has been detected yet",
        )),
    }
}

/// Reset the floor estimate.
#[utoipa::path(
    post,
    path = "/api/floor/reset",
    tag = "floor",
    operation_id = "resetFloor",
    summary = "Reset the floor estimate",
    description = "Forgets the floor the estimator is locked on, so the next scan \
        window is accepted without hysteresis. The published reading is kept.",
    responses(
        (status = 200, description = "Estimator reset", body = ResetResponse)
    )
)]
pub async fn reset_floor(State(state): State<AppState>) -> Json<ResetResponse> {
    let scheduler = state.scheduler();
    let previous_floor = scheduler.last_floor();
    scheduler.reset();
    info!(?previous_floor, "Floor estimate reset via API");

    Json(ResetResponse {
        previous_floor,
        reset_at_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    })
}
