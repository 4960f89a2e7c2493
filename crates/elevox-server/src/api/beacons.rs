//! Beacon table and scan diagnostics endpoints.

use axum::extract::State;
use axum::Json;
use elevox_core::{floor_label, WindowReport};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

/// A registered beacon.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "identifier": "terreo",
    "floor": 0,
    "label": "Ground floor"
}))]
pub struct BeaconEntry {
    /// Advertised name of the beacon.
    #[schema(example = "terreo")]
    pub identifier: String,

    /// Floor the beacon marks.
    #[schema(example = 0)]
    pub floor: u32,

    /// Display label for the floor.
    #[schema(example = "Ground floor")]
    pub label: String,
}

/// The beacon table and detection tuning.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BeaconsResponse {
    /// Registered beacons in priority order.
    pub beacons: Vec<BeaconEntry>,

    /// Beacons weaker than this (dBm) are ignored.
    #[schema(example = -90)]
    pub rssi_threshold: i16,

    /// Advantage (dB) a new floor needs before the estimate switches.
    #[schema(example = 5)]
    pub hysteresis_margin_db: i16,
}

/// List the registered beacons.
#[utoipa::path(
    get,
    path = "/api/beacons",
    tag = "beacons",
    operation_id = "listBeacons",
    summary = "List registered beacons",
    description = "Returns the beacon-to-floor table. Earlier entries win ties between \
        equally strong beacons.",
    responses(
        (status = 200, description = "Beacon table", body = BeaconsResponse)
    )
)]
pub async fn list_beacons(State(state): State<AppState>) -> Json<BeaconsResponse> {
    let beacons = state
        .registry()
        .beacons()
        .iter()
        .map(|beacon| BeaconEntry {
            identifier: beacon.identifier.clone(),
            floor: beacon.floor,
            label: floor_label(beacon.floor),
        })
        .collect();

    let detection = state.detection();
    Json(BeaconsResponse {
        beacons,
        rssi_threshold: detection.rssi_threshold,
        hysteresis_margin_db: detection.hysteresis_margin_db,
    })
}

/// Diagnostics of the most recent scan window.
#[utoipa::path(
    get,
    path = "/api/diagnostics",
    tag = "beacons",
    operation_id = "getDiagnostics",
    summary = "Inspect the last scan window",
    description = "Returns every registered beacon heard in the most recent completed \
        window with its strongest signal and whether it cleared the threshold.",
    responses(
        (status = 200, description = "Last window", body = WindowReport),
        (status = 404, description = "No window has completed yet", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn get_diagnostics(State(state): State<AppState>) -> ApiResult<Json<WindowReport>> {
    state
        .scheduler()
        .latest_report()
        .map(Json)
        .ok_or_else(|| ApiError::not_found("no_window", "No scan window has completed yet"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::server;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_beacons_lists_builtin_table_in_order() {
        let (server, _scheduler) = server();

        let response = server.get("/api/beacons").await;
        response.assert_status_ok();
        let body: BeaconsResponse = response.json();
        let identifiers: Vec<_> = body.beacons.iter().map(|b| b.identifier.as_str()).collect();
        assert_eq!(identifiers, ["terreo", "1", "2", "3"]);
        assert_eq!(body.beacons[0].label, "Ground floor");
        assert_eq!(body.rssi_threshold, -90);
        assert_eq!(body.hysteresis_margin_db, 5);
    }

    #[tokio::test]
    async fn test_diagnostics_404_before_first_window() {
        let (server, _scheduler) = server();

        let response = server.get("/api/diagnostics").await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "no_window");
    }
}
