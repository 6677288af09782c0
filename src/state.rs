use crate::config::Settings;
use crate::downloads::DownloadTable;
use crate::notifications::BroadcastDisplay;
use crate::tracker::TrackerHandle;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub downloads: DownloadTable,
    pub display: BroadcastDisplay,
    /// `None` when the display was unavailable at startup.
    pub tracker: Option<TrackerHandle>,
    pub tx: broadcast::Sender<String>,
}
