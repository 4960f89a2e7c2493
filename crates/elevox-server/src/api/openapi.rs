//! OpenAPI specification generation for the elevox API.
//!
//! The document is served at `/api/openapi.json` and written to disk by the
//! `gen-openapi` binary for client generation.

use axum::Json;
use elevox_core::{ReportEntry, ScanStatus, WindowReport};
use utoipa::OpenApi;

use super::beacons::{BeaconEntry, BeaconsResponse};
use super::error::ErrorResponse;
use super::floor::{FloorResponse, ResetResponse};
use super::health::HealthResponse;
use super::status::StatusResponse;

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for elevox.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "elevox API",
        version = "0.1.0",
        description = r#"
# elevox API

elevox works out which floor of a building this device is on from the Bluetooth
beacons it can hear.

## Overview

A background cycle scans for a short window every few seconds and estimates the
floor from the strongest registered beacon, with hysteresis so the reading does
not flicker between adjacent floors.

1. **Floor**: the last detected floor and when it was observed
2. **Status**: what the scan cycle is doing, polled or streamed as server-sent events
3. **Beacons**: the beacon table and diagnostics of the last scan window

Reading the floor never triggers a scan.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local elevox server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "floor", description = "The detected floor"),
        (name = "status", description = "Scan cycle status"),
        (name = "beacons", description = "Beacon table and scan diagnostics")
    ),
    paths(
        super::health::health_check,
        super::floor::get_floor,
        super::floor::reset_floor,
        super::status::get_status,
        super::status::status_stream,
        super::beacons::list_beacons,
        super::beacons::get_diagnostics,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            FloorResponse,
            ResetResponse,
            StatusResponse,
            ScanStatus,
            BeaconEntry,
            BeaconsResponse,
            WindowReport,
            ReportEntry,
        )
    )
)]
pub struct ApiDoc;
