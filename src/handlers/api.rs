use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, Sse},
};
use futures::stream::{Stream, StreamExt};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::downloads::{DownloadItem, DownloadQuery, DownloadState};
use crate::fuse::TREASURE_ICON;
use crate::notifications::{NotificationDisplay, NotificationOptions};
use crate::state::AppState;

const TEST_NOTIFICATION_SECS: u64 = 3;

pub async fn list_downloads(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Json<Vec<DownloadItem>> {
    Json(state.downloads.find(&query))
}

pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let tracked = match &state.tracker {
        Some(tracker) => tracker.snapshot().await.unwrap_or_else(|e| {
            warn!("Status snapshot unavailable: {}", e);
            Vec::new()
        }),
        None => Vec::new(),
    };
    let in_progress = state
        .downloads
        .find(&DownloadQuery::by_state(DownloadState::InProgress))
        .len();

    Json(serde_json::json!({
        "tracker_installed": state.tracker.is_some(),
        "notifications_available": state.display.is_available(),
        "in_progress": in_progress,
        "tracked": tracked,
        "visible_notifications": state.display.visible()
    }))
}

pub async fn test_notification(
    State(state): State<AppState>,
) -> (StatusCode, Json<serde_json::Value>) {
    let id = format!("pirate-test-{}", Uuid::new_v4());
    let options = NotificationOptions {
        title: "Ahoy! Test Success".to_string(),
        message: "Pirate Downloader is working!".to_string(),
        icon_url: TREASURE_ICON.to_string(),
        silent: true,
    };

    match state.display.create(&id, options).await {
        Ok(()) => {
            info!("Test notification sent: {}", id);
            let display = state.display.clone();
            let clear_id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(TEST_NOTIFICATION_SECS)).await;
                if let Err(e) = display.clear(&clear_id).await {
                    warn!("Failed to clear test notification {}: {}", clear_id, e);
                }
            });
            (
                StatusCode::OK,
                Json(serde_json::json!({ "status": "sent", "id": id })),
            )
        }
        Err(e) => {
            error!("Test notification failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "failed", "error": e.to_string() })),
            )
        }
    }
}

pub async fn notification_clicked(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.display.clear(&id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "cleared", "id": id })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "failed", "error": e.to_string() })),
        ),
    }
}

pub async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let rx = state.tx.subscribe();
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).map(|msg| match msg {
        Ok(msg) => Ok(Event::default().data(msg)),
        Err(_) => Ok(Event::default().comment("keepalive")),
    });

    Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::default())
}
