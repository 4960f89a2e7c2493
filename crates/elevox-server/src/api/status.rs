//! Scan status endpoints.
//!
//! `GET /api/status` returns the latest status; `GET /api/status/stream`
//! pushes every status event to the client as it is published.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use elevox_core::ScanStatus;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::state::AppState;

/// Latest scan status.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": { "status": "floor_detected", "floor": 1 },
    "label": "Floor detected: Floor 1",
    "running": true,
    "locked_floor": 1
}))]
pub struct StatusResponse {
    /// Most recent status event; absent until the first cycle has run.
    pub status: Option<ScanStatus>,

    /// Display text for `status`.
    #[schema(example = "Floor detected: Floor 1")]
    pub label: Option<String>,

    /// Whether the scan cycle is running.
    #[schema(example = true)]
    pub running: bool,

    /// Floor the estimator is locked on.
    #[schema(example = 1)]
    pub locked_floor: Option<u32>,
}

/// Creates the status router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_status))
        .route("/stream", get(status_stream))
}

/// Get the latest scan status.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "status",
    operation_id = "getStatus",
    summary = "Get the scan status",
    description = "Returns the most recent status event with its display label, \
        whether the scan cycle is running, and the floor the estimator is locked on.",
    responses(
        (status = 200, description = "Current status", body = StatusResponse)
    )
)]
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let scheduler = state.scheduler();
    let status = scheduler.latest_status();

    Json(StatusResponse {
        status,
        label: status.map(|status| status.label()),
        running: scheduler.is_running(),
        locked_floor: scheduler.last_floor(),
    })
}

/// Stream status events.
#[utoipa::path(
    get,
    path = "/api/status/stream",
    tag = "status",
    operation_id = "statusStream",
    summary = "Stream scan status events",
    description = "Server-sent events, one per status. The event name is the status \
        name (e.g. `floor_detected`) and the data is the status as JSON. Events \
        published while the client is not connected are not replayed. The stream \
        ends when the server shuts down.",
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream", body = ScanStatus)
    )
)]
pub async fn status_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("Status stream client connected");
    let events = statuses(state.scheduler().subscribe())
        .take_until(state.shutdown_requested())
        .map(|status| Ok(to_event(status)));

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Turn a status subscription into a stream that ends when the scheduler goes away.
///
/// A slow client skips the events it missed instead of disconnecting.
fn statuses(receiver: broadcast::Receiver<ScanStatus>) -> impl Stream<Item = ScanStatus> {
    futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(status) => return Some((status, receiver)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Status stream client lagging, skipped events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

fn to_event(status: ScanStatus) -> Event {
    let event = Event::default().event(status.name());
    match serde_json::to_string(&status) {
        Ok(data) => event.data(data),
        Err(_) => event,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{server, server_state};

    #[tokio::test]
    async fn test_status_is_empty_before_first_cycle() {
        let (server, _scheduler) = server();

        let response = server.get("/api/status").await;
        response.assert_status_ok();
        let body: StatusResponse = response.json();
        assert_eq!(body.status, None);
        assert_eq!(body.label, None);
        assert!(!body.running);
        assert_eq!(body.locked_floor, None);
    }

    #[tokio::test]
    async fn test_statuses_follow_publication_order() {
        let (sender, receiver) = broadcast::channel(8);
        let stream = statuses(receiver);
        futures::pin_mut!(stream);

        sender.send(ScanStatus::Scanning).unwrap();
        sender.send(ScanStatus::FloorDetected { floor: 2 }).unwrap();
        drop(sender);

        assert_eq!(stream.next().await, Some(ScanStatus::Scanning));
        assert_eq!(
            stream.next().await,
            Some(ScanStatus::FloorDetected { floor: 2 })
        );
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_stream_ends_on_shutdown() {
        let (state, _scheduler) = server_state();
        let (sender, receiver) = broadcast::channel(8);
        let stream = statuses(receiver).take_until(state.shutdown_requested());
        futures::pin_mut!(stream);

        sender.send(ScanStatus::Scanning).unwrap();
        assert_eq!(stream.next().await, Some(ScanStatus::Scanning));

        state.begin_shutdown();
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_lagging_client_skips_to_newest() {
        let (sender, receiver) = broadcast::channel(2);
        let stream = statuses(receiver);
        futures::pin_mut!(stream);

        sender.send(ScanStatus::Scanning).unwrap();
        sender.send(ScanStatus::NoBeaconInRange).unwrap();
        sender.send(ScanStatus::AdapterDisabled).unwrap();

        assert_eq!(stream.next().await, Some(ScanStatus::NoBeaconInRange));
        assert_eq!(stream.next().await, Some(ScanStatus::AdapterDisabled));
    }
}
