//! HTTP API routes and handlers.
//!
//! - `floor` - The detected floor and estimator reset
//! - `status` - Scan status, polled or streamed
//! - `beacons` - Beacon table and window diagnostics
//! - `health` - Service health checks
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub mod beacons;
pub mod error;
pub mod floor;
pub mod health;
pub mod openapi;
pub mod status;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /api
/// ├── /floor             - Current floor
/// │   └── /reset         - Reset the estimator (POST)
/// ├── /status            - Latest scan status
/// │   └── /stream        - Status events (SSE)
/// ├── /beacons           - Beacon table
/// ├── /diagnostics       - Last scan window
/// └── /openapi.json      - OpenAPI specification
/// ```
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .nest(
            "/api",
            Router::new()
                .nest("/floor", floor::router())
                .nest("/status", status::router())
                .route("/beacons", get(beacons::list_beacons))
                .route("/diagnostics", get(beacons::get_diagnostics))
                .route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum_test::TestServer;
    use elevox_core::{
        BeaconRegistry, DetectionConfig, FloorEstimator, FloorReading, FloorScheduler,
        ReadingStore, ScanDriver, ScanTiming, SimulatedAdapter,
    };
    use tempfile::TempDir;

    use super::create_router;
    use crate::state::AppState;

    /// State over a stopped scheduler driving `adapter`.
    pub fn build_state(
        adapter: SimulatedAdapter,
        store: Option<ReadingStore>,
    ) -> (AppState, FloorScheduler<SimulatedAdapter>) {
        let registry = BeaconRegistry::builtin();
        let scheduler = FloorScheduler::new(
            ScanDriver::new(adapter, Arc::clone(&registry)),
            FloorEstimator::new(Arc::clone(&registry)),
            ScanTiming::default(),
            store,
        );
        let state = AppState::new(scheduler.handle(), registry, DetectionConfig::default());
        (state, scheduler)
    }

    /// State over a stopped scheduler with a silent adapter.
    pub fn server_state() -> (AppState, FloorScheduler<SimulatedAdapter>) {
        build_state(SimulatedAdapter::default(), None)
    }

    /// Server over a stopped scheduler driving `adapter`.
    pub fn build(
        adapter: SimulatedAdapter,
        store: Option<ReadingStore>,
    ) -> (TestServer, FloorScheduler<SimulatedAdapter>) {
        let (state, scheduler) = build_state(adapter, store);
        let server = TestServer::new(create_router(state)).unwrap();
        (server, scheduler)
    }

    /// Server over a stopped scheduler with no reading.
    pub fn server() -> (TestServer, FloorScheduler<SimulatedAdapter>) {
        build(SimulatedAdapter::default(), None)
    }

    /// Server over a stopped scheduler that restored `reading` from disk.
    pub fn server_with_reading(
        reading: FloorReading,
    ) -> (TestServer, FloorScheduler<SimulatedAdapter>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ReadingStore::new(dir.path().join("reading.json"));
        store.save(&reading).unwrap();
        let (server, scheduler) = build(SimulatedAdapter::default(), Some(store));
        (server, scheduler, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{build, server};
    use elevox_core::{RawAdvertisement, ScanStatus, SimulatedAdapter, SimulatedCycle};

    #[tokio::test]
    async fn test_health_reports_stopped_scheduler() {
        let (server, _scheduler) = server();

        let response = server.get("/health").await;
        response.assert_status_ok();
        let body: super::health::HealthResponse = response.json();
        assert_eq!(body.status, "ok");
        assert!(!body.scanning);
    }

    #[tokio::test]
    async fn test_openapi_document_is_served() {
        let (server, _scheduler) = server();

        let response = server.get("/api/openapi.json").await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["info"]["title"], "elevox API");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (server, _scheduler) = server();

        server
            .get("/api/elevator")
            .await
            .assert_status(axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detected_floor_is_served_from_running_scheduler() {
        let adapter = SimulatedAdapter::new(vec![SimulatedCycle::Advertise(vec![
            RawAdvertisement::named("2", "C4:4F:33:0A:12:02", -61),
            RawAdvertisement::named("3", "C4:4F:33:0A:12:03", -95),
        ])]);
        let (server, mut scheduler) = build(adapter, None);
        let mut statuses = scheduler.subscribe();
        scheduler.start().unwrap();

        while statuses.recv().await.unwrap() != (ScanStatus::FloorDetected { floor: 2 }) {}

        let floor: serde_json::Value = server.get("/api/floor").await.json();
        assert_eq!(floor["floor"], 2);
        assert_eq!(floor["label"], "Floor 2");

        let status: serde_json::Value = server.get("/api/status").await.json();
        assert_eq!(status["status"]["status"], "floor_detected");
        assert_eq!(status["locked_floor"], 2);
        assert_eq!(status["running"], true);

        let report: serde_json::Value = server.get("/api/diagnostics").await.json();
        assert_eq!(report["entries"][0]["identifier"], "2");
        assert_eq!(report["entries"][1]["above_threshold"], false);

        scheduler.stop().await;
        let health: serde_json::Value = server.get("/health").await.json();
        assert_eq!(health["scanning"], false);
    }
}
