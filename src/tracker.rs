//! Maps download lifecycle events onto notification lifecycle events.
//!
//! The tracker runs as a single task that owns the registry of tracked
//! downloads. Progress lookups and delayed work run in spawned tasks that post
//! their result back into the tracker's queue, so every registry mutation
//! happens on that one task and re-checks that the record still exists.

use crate::config::Settings;
use crate::downloads::{
    DownloadDelta, DownloadEvent, DownloadId, DownloadItem, DownloadQuery, DownloadSource,
    DownloadState,
};
use crate::fuse::{self, FuseBucket, TREASURE_ICON};
use crate::notifications::{
    NotificationDisplay, NotificationOptions, NotificationPatch, completion_notification_id,
    progress_notification_id,
};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

pub const FALLBACK_FILENAME: &str = "Unknown treasure";

const PROGRESS_TITLE: &str = "Plundering in Progress...";
const COMPLETION_TITLE: &str = "Treasure Acquired!";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DownloadRecord {
    pub download_id: DownloadId,
    pub notification_id: String,
    pub filename: String,
    pub bucket: FuseBucket,
    pub complete: bool,
    /// Distinguishes this record from earlier ones that reused the id.
    #[serde(skip)]
    pub generation: u64,
}

#[derive(Clone, Debug)]
pub struct TrackerConfig {
    /// Time a completed record lingers so late change events still find it.
    pub grace_delay: Duration,
    pub completion_display: Option<Duration>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            grace_delay: Duration::from_secs(1),
            completion_display: Some(Duration::from_secs(5)),
        }
    }
}

impl From<&Settings> for TrackerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            grace_delay: settings.grace_delay(),
            completion_display: settings.completion_display(),
        }
    }
}

#[derive(Debug)]
pub enum TrackerMessage {
    Download(DownloadEvent),
    ProgressResolved {
        id: DownloadId,
        item: Option<DownloadItem>,
    },
    GraceElapsed {
        id: DownloadId,
        generation: u64,
    },
    ExpireCompletion {
        id: DownloadId,
        generation: u64,
    },
    Snapshot(oneshot::Sender<Vec<DownloadRecord>>),
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("download tracker has shut down")]
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct TrackerHandle {
    tx: mpsc::UnboundedSender<TrackerMessage>,
}

impl TrackerHandle {
    pub fn dispatch(&self, event: DownloadEvent) -> Result<(), TrackerError> {
        self.tx
            .send(TrackerMessage::Download(event))
            .map_err(|_| TrackerError::Shutdown)
    }

    pub async fn snapshot(&self) -> Result<Vec<DownloadRecord>, TrackerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(TrackerMessage::Snapshot(reply_tx))
            .map_err(|_| TrackerError::Shutdown)?;
        reply_rx.await.map_err(|_| TrackerError::Shutdown)
    }
}

pub struct ProgressTracker<S, D> {
    registry: HashMap<DownloadId, DownloadRecord>,
    // Generation of the completion notification currently shown per download.
    shown_completions: HashMap<DownloadId, u64>,
    next_generation: u64,
    source: S,
    display: D,
    config: TrackerConfig,
    // Weak so that the queue closes once every handle is dropped.
    tx: mpsc::WeakUnboundedSender<TrackerMessage>,
}

/// Starts the tracker task, unless the display cannot show anything.
pub fn install<S, D>(source: S, display: D, config: TrackerConfig) -> Option<TrackerHandle>
where
    S: DownloadSource,
    D: NotificationDisplay,
{
    if !display.is_available() {
        error!("Notification display unavailable, download tracker not installed");
        return None;
    }

    let (tracker, handle, rx) = ProgressTracker::new(source, display, config);
    tokio::spawn(tracker.run(rx));
    info!("Download tracker installed");
    Some(handle)
}

impl<S, D> ProgressTracker<S, D>
where
    S: DownloadSource,
    D: NotificationDisplay,
{
    pub fn new(
        source: S,
        display: D,
        config: TrackerConfig,
    ) -> (Self, TrackerHandle, mpsc::UnboundedReceiver<TrackerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let tracker = Self {
            registry: HashMap::new(),
            shown_completions: HashMap::new(),
            next_generation: 0,
            source,
            display,
            config,
            tx: tx.downgrade(),
        };
        (tracker, TrackerHandle { tx }, rx)
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<TrackerMessage>) {
        while let Some(message) = rx.recv().await {
            self.handle(message).await;
        }
        info!(
            "Download tracker stopped, forgetting {} tracked downloads",
            self.registry.len()
        );
        self.registry.clear();
        self.shown_completions.clear();
    }

    pub async fn handle(&mut self, message: TrackerMessage) {
        match message {
            TrackerMessage::Download(DownloadEvent::Created(item)) => {
                self.on_download_created(item).await
            }
            TrackerMessage::Download(DownloadEvent::Changed(delta)) => {
                self.on_download_changed(delta).await
            }
            TrackerMessage::Download(DownloadEvent::Erased { id }) => {
                self.on_download_erased(id).await
            }
            TrackerMessage::ProgressResolved { id, item } => {
                self.on_progress_resolved(id, item).await
            }
            TrackerMessage::GraceElapsed { id, generation } => {
                self.on_grace_elapsed(id, generation)
            }
            TrackerMessage::ExpireCompletion { id, generation } => {
                self.on_completion_expired(id, generation).await
            }
            TrackerMessage::Snapshot(reply) => {
                let _ = reply.send(self.records());
            }
        }
    }

    pub fn records(&self) -> Vec<DownloadRecord> {
        let mut records: Vec<DownloadRecord> = self.registry.values().cloned().collect();
        records.sort_by_key(|record| record.download_id);
        records
    }

    pub async fn on_download_created(&mut self, item: DownloadItem) {
        let id = item.id;
        let notification_id = progress_notification_id(id);
        let filename = item
            .filename
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| FALLBACK_FILENAME.to_string());

        info!("Plundering has begun: {} (ID: {})", filename, id);

        let options = NotificationOptions {
            title: PROGRESS_TITLE.to_string(),
            message: filename.clone(),
            icon_url: FuseBucket::Unlit.icon().to_string(),
            silent: true,
        };
        if let Err(e) = self.display.create(&notification_id, options).await {
            warn!("Progress notification {} failed: {}", notification_id, e);
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        self.registry.insert(
            id,
            DownloadRecord {
                download_id: id,
                notification_id,
                filename,
                bucket: FuseBucket::Unlit,
                complete: false,
                generation,
            },
        );
    }

    pub async fn on_download_changed(&mut self, delta: DownloadDelta) {
        let id = delta.id;
        let Some(record) = self.registry.get(&id) else {
            debug!("Ignoring change for untracked download {}", id);
            return;
        };
        let already_complete = record.complete;

        // A zero byte count carries no progress worth looking up.
        if delta
            .bytes_received
            .as_ref()
            .is_some_and(|bytes| bytes.current > 0)
        {
            self.request_progress(id);
        }

        if let Some(state) = &delta.state {
            match state.current {
                DownloadState::Complete if !already_complete => self.complete(id).await,
                DownloadState::Interrupted | DownloadState::Cancelled => {
                    self.stop(id, state.current).await
                }
                _ => {}
            }
        }
    }

    pub async fn on_download_erased(&mut self, id: DownloadId) {
        let Some(record) = self.registry.remove(&id) else {
            debug!("Erased download {} was not tracked", id);
            return;
        };

        info!("Download {} erased from history", id);
        self.shown_completions.remove(&id);
        for notification_id in [record.notification_id, completion_notification_id(id)] {
            if let Err(e) = self.display.clear(&notification_id).await {
                warn!("Failed to clear notification {}: {}", notification_id, e);
            }
        }
    }

    fn request_progress(&self, id: DownloadId) {
        let source = self.source.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let item = source
                .search(DownloadQuery::by_id(id))
                .await
                .into_iter()
                .next();
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(TrackerMessage::ProgressResolved { id, item });
            }
        });
    }

    async fn on_progress_resolved(&mut self, id: DownloadId, item: Option<DownloadItem>) {
        let Some(item) = item else {
            debug!("Download {} vanished before its progress arrived", id);
            return;
        };
        let Some(percent) = fuse::progress_percent(item.bytes_received, item.total_bytes) else {
            debug!("Download {} has no known size yet", id);
            return;
        };
        let Some(record) = self.registry.get_mut(&id) else {
            debug!("Download {} is no longer tracked", id);
            return;
        };

        debug!("Fuse burning for download {}: {}%", id, percent);
        let bucket = FuseBucket::from_percent(percent);
        if bucket == record.bucket {
            return;
        }
        record.bucket = bucket;

        let notification_id = record.notification_id.clone();
        let patch = NotificationPatch {
            title: None,
            message: Some(format!("{} ({}%)", record.filename, percent)),
            icon_url: Some(bucket.icon().to_string()),
        };
        if let Err(e) = self.display.update(&notification_id, patch).await {
            warn!("Failed to update notification {}: {}", notification_id, e);
        }
    }

    async fn complete(&mut self, id: DownloadId) {
        let Some(record) = self.registry.get_mut(&id) else {
            return;
        };
        record.complete = true;
        let generation = record.generation;
        let progress_id = record.notification_id.clone();
        let filename = record.filename.clone();

        info!("Treasure acquired: {} (ID: {})", filename, id);

        if let Err(e) = self.display.clear(&progress_id).await {
            warn!("Failed to clear notification {}: {}", progress_id, e);
        }

        let completion_id = completion_notification_id(id);
        let options = NotificationOptions {
            title: COMPLETION_TITLE.to_string(),
            message: format!("Successfully plundered: {}", filename),
            icon_url: TREASURE_ICON.to_string(),
            silent: true,
        };
        match self.display.create(&completion_id, options).await {
            Ok(()) => {
                self.shown_completions.insert(id, generation);
                if let Some(after) = self.config.completion_display {
                    self.schedule(after, TrackerMessage::ExpireCompletion { id, generation });
                }
            }
            Err(e) => warn!("Completion notification {} failed: {}", completion_id, e),
        }

        self.schedule(
            self.config.grace_delay,
            TrackerMessage::GraceElapsed { id, generation },
        );
    }

    async fn stop(&mut self, id: DownloadId, state: DownloadState) {
        let Some(record) = self.registry.remove(&id) else {
            return;
        };

        info!("Download {} stopped ({:?}): {}", id, state, record.filename);
        if let Err(e) = self.display.clear(&record.notification_id).await {
            warn!("Failed to clear notification {}: {}", record.notification_id, e);
        }
    }

    fn on_grace_elapsed(&mut self, id: DownloadId, generation: u64) {
        let ours = self
            .registry
            .get(&id)
            .is_some_and(|record| record.complete && record.generation == generation);
        if ours {
            self.registry.remove(&id);
            debug!("Completed download {} no longer tracked", id);
        }
    }

    async fn on_completion_expired(&mut self, id: DownloadId, generation: u64) {
        if self.shown_completions.get(&id) != Some(&generation) {
            debug!("Completion notice for download {} was replaced or erased", id);
            return;
        }
        self.shown_completions.remove(&id);

        let notification_id = completion_notification_id(id);
        if let Err(e) = self.display.clear(&notification_id).await {
            warn!("Failed to expire notification {}: {}", notification_id, e);
        }
    }

    fn schedule(&self, delay: Duration, message: TrackerMessage) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(message);
            }
        });
    }
}
