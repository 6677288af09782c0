mod config;
mod downloads;
mod fuse;
mod handlers;
mod notifications;
mod state;
mod tasks;
mod tracker;

use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{Level, info};

use crate::config::Settings;
use crate::downloads::DownloadTable;
use crate::handlers::{api, events};
use crate::notifications::BroadcastDisplay;
use crate::state::AppState;
use crate::tracker::TrackerConfig;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let settings = Settings::new().expect("Failed to load configuration");

    tracing_subscriber::fmt()
        .with_env_filter(&settings.log_level)
        .init();

    info!("Pirate Downloader: Ahoy! Starting the adventure...");

    let state = build_state(settings);
    if state.tracker.is_none() {
        info!("Running without notifications, download events are only recorded");
    }

    // Start background tasks (download speed summary)
    tasks::start_background_tasks(state.clone());

    let addr = SocketAddr::new(state.settings.host, state.settings.server_port);
    let app = create_app(state);

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    info!("Pirate Downloader: dropping anchor");
}

pub fn build_state(settings: Settings) -> AppState {
    let (tx, _) = broadcast::channel(100);
    let downloads = DownloadTable::default();
    let display = BroadcastDisplay::new(tx.clone(), settings.notifications_enabled);
    let tracker = tracker::install(
        downloads.clone(),
        display.clone(),
        TrackerConfig::from(&settings),
    );

    AppState {
        settings,
        downloads,
        display,
        tracker,
        tx,
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/api/events", post(events::ingest_event))
        .route("/api/downloads", get(api::list_downloads))
        .route("/api/status", get(api::status))
        .route("/api/test-notification", post(api::test_notification))
        .route(
            "/api/notifications/{id}/click",
            post(api::notification_clicked),
        )
        .route("/events", get(api::sse_handler))
        .nest_service("/icons", ServeDir::new(&state.settings.icons_dir))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    fn test_settings(icons_dir: std::path::PathBuf, notifications_enabled: bool) -> Settings {
        Settings {
            host: "127.0.0.1".parse().unwrap(),
            server_port: 0,
            log_level: "info".to_string(),
            icons_dir,
            notifications_enabled,
            grace_delay_ms: 50,
            completion_display_secs: 0,
            summary_interval_ms: 1000,
        }
    }

    async fn setup_test_app(
        notifications_enabled: bool,
    ) -> (TestServer, AppState, broadcast::Receiver<String>, tempfile::TempDir) {
        let tmp_dir = tempdir().unwrap();
        let icons_dir = tmp_dir.path().join("icons");
        std::fs::create_dir_all(&icons_dir).unwrap();
        std::fs::write(icons_dir.join("fuse-0.png"), "png").unwrap();

        let state = build_state(test_settings(icons_dir, notifications_enabled));
        let rx = state.tx.subscribe();
        let app = create_app(state.clone());
        (TestServer::new(app).unwrap(), state, rx, tmp_dir)
    }

    async fn next_notification(rx: &mut broadcast::Receiver<String>) -> serde_json::Value {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let msg: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
                if msg["type"] == "notification" {
                    return msg["command"].clone();
                }
            }
        })
        .await
        .expect("no notification broadcast")
    }

    #[tokio::test]
    async fn test_created_event_is_tracked() {
        let (server, _, mut rx, _tmp) = setup_test_app(true).await;

        let response = server
            .post("/api/events")
            .json(&json!({ "type": "created", "id": 7, "filename": "map.png", "totalBytes": 100 }))
            .await;
        response.assert_status(StatusCode::ACCEPTED);

        let command = next_notification(&mut rx).await;
        assert_eq!(command["action"], "create");
        assert_eq!(command["id"], "download-progress-7");
        assert_eq!(command["message"], "map.png");

        let response = server.get("/api/status").await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["tracker_installed"], true);
        assert_eq!(body["in_progress"], 1);
        assert_eq!(body["tracked"][0]["download_id"], 7);
        assert_eq!(body["tracked"][0]["bucket"], 0);
        assert_eq!(body["visible_notifications"], json!(["download-progress-7"]));
    }

    #[tokio::test]
    async fn test_download_lifecycle_over_http() {
        let (server, state, mut rx, _tmp) = setup_test_app(true).await;

        server
            .post("/api/events")
            .json(&json!({ "type": "created", "id": 1, "filename": "a.zip", "totalBytes": 200 }))
            .await
            .assert_status(StatusCode::ACCEPTED);
        assert_eq!(next_notification(&mut rx).await["action"], "create");

        server
            .post("/api/events")
            .json(&json!({ "type": "changed", "id": 1, "bytesReceived": 120 }))
            .await
            .assert_status(StatusCode::ACCEPTED);
        let update = next_notification(&mut rx).await;
        assert_eq!(update["action"], "update");
        assert_eq!(update["iconUrl"], "icons/fuse-50.png");
        assert_eq!(update["message"], "a.zip (60%)");

        server
            .post("/api/events")
            .json(&json!({ "type": "changed", "id": 1, "state": { "current": "complete" } }))
            .await
            .assert_status(StatusCode::ACCEPTED);
        let cleared = next_notification(&mut rx).await;
        assert_eq!(cleared["action"], "clear");
        assert_eq!(cleared["id"], "download-progress-1");
        let completed = next_notification(&mut rx).await;
        assert_eq!(completed["action"], "create");
        assert_eq!(completed["id"], "download-complete-1");
        assert_eq!(completed["title"], "Treasure Acquired!");

        tokio::time::sleep(Duration::from_millis(200)).await;
        let tracked = state.tracker.as_ref().unwrap().snapshot().await.unwrap();
        assert!(tracked.is_empty());

        let downloads: Vec<serde_json::Value> = server
            .get("/api/downloads")
            .add_query_param("state", "complete")
            .await
            .json();
        assert_eq!(downloads.len(), 1);
        assert_eq!(downloads[0]["bytesReceived"], 120);
    }

    #[tokio::test]
    async fn test_list_downloads_filters_by_state() {
        let (server, _, _rx, _tmp) = setup_test_app(true).await;
        for id in [1, 2] {
            server
                .post("/api/events")
                .json(&json!({ "type": "created", "id": id }))
                .await;
        }
        server
            .post("/api/events")
            .json(&json!({ "type": "changed", "id": 2, "state": { "current": "interrupted" } }))
            .await;

        let all: Vec<serde_json::Value> = server.get("/api/downloads").await.json();
        assert_eq!(all.len(), 2);

        let running: Vec<serde_json::Value> = server
            .get("/api/downloads")
            .add_query_param("state", "in_progress")
            .await
            .json();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0]["id"], 1);
    }

    #[tokio::test]
    async fn test_malformed_event_is_rejected() {
        let (server, state, _rx, _tmp) = setup_test_app(true).await;
        let response = server
            .post("/api/events")
            .json(&json!({ "type": "exploded", "id": 1 }))
            .await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        assert!(state.downloads.find(&Default::default()).is_empty());
    }

    #[tokio::test]
    async fn test_inert_without_notifications() {
        let (server, state, _rx, _tmp) = setup_test_app(false).await;
        assert!(state.tracker.is_none());

        server
            .post("/api/events")
            .json(&json!({ "type": "created", "id": 3, "filename": "b.iso" }))
            .await
            .assert_status(StatusCode::ACCEPTED);

        let body: serde_json::Value = server.get("/api/status").await.json();
        assert_eq!(body["tracker_installed"], false);
        assert_eq!(body["notifications_available"], false);
        assert_eq!(body["in_progress"], 1);
        assert_eq!(body["tracked"], json!([]));

        let response = server.post("/api/test-notification").await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_test_notification_and_click() {
        let (server, state, mut rx, _tmp) = setup_test_app(true).await;

        let response = server.post("/api/test-notification").await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        let id = body["id"].as_str().unwrap().to_string();
        assert!(id.starts_with("pirate-test-"));
        assert_eq!(next_notification(&mut rx).await["title"], "Ahoy! Test Success");
        assert_eq!(state.display.visible(), vec![id.clone()]);

        server
            .post(&format!("/api/notifications/{}/click", id))
            .await
            .assert_status_ok();
        assert!(state.display.visible().is_empty());
        assert_eq!(next_notification(&mut rx).await["action"], "clear");
    }

    #[tokio::test]
    async fn test_icons_are_served() {
        let (server, _, _rx, _tmp) = setup_test_app(true).await;
        let response = server.get("/icons/fuse-0.png").await;
        response.assert_status_ok();
        assert_eq!(response.text(), "png");
    }
}
