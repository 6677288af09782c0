use crate::state::AppState;
use std::collections::HashMap;
use tracing::info;

pub fn start_background_tasks(state: AppState) {
    // Download speed and summary task
    tokio::spawn(async move {
        let period = state.settings.summary_interval();
        let elapsed_ms = period.as_millis() as u64;
        let mut interval = tokio::time::interval(period);
        let mut last_bytes = HashMap::new();
        let mut was_busy = false;

        loop {
            interval.tick().await;
            let active = state.downloads.refresh_speeds(&mut last_bytes, elapsed_ms);

            if active.is_empty() {
                if was_busy {
                    info!("All downloads settled, the seas are calm");
                    let _ = state.tx.send(
                        serde_json::json!({
                            "type": "downloads",
                            "in_progress": 0,
                            "data": []
                        })
                        .to_string(),
                    );
                }
                was_busy = false;
                continue;
            }
            was_busy = true;

            if let Ok(data_json) = serde_json::to_value(&active) {
                let msg = serde_json::json!({
                    "type": "downloads",
                    "in_progress": active.len(),
                    "data": data_json
                })
                .to_string();
                let _ = state.tx.send(msg);
            }
        }
    });
}
