use crate::downloads::DownloadEvent;
use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use tracing::{debug, error};

pub async fn ingest_event(
    State(state): State<AppState>,
    Json(event): Json<DownloadEvent>,
) -> (StatusCode, Json<serde_json::Value>) {
    debug!("Download event for {}: {:?}", event.id(), event);

    // The table reflects the event before the tracker queries it, and
    // concurrent requests reach both in the same order.
    state.downloads.record(event, |event| {
        if let Some(tracker) = &state.tracker
            && let Err(e) = tracker.dispatch(event)
        {
            error!("Failed to dispatch download event: {}", e);
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "accepted" })),
    )
}
