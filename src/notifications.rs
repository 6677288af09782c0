use crate::downloads::DownloadId;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

pub fn progress_notification_id(id: DownloadId) -> String {
    format!("download-progress-{}", id)
}

pub fn completion_notification_id(id: DownloadId) -> String {
    format!("download-complete-{}", id)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOptions {
    pub title: String,
    pub message: String,
    pub icon_url: String,
    pub silent: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NotificationCommand {
    Create {
        id: String,
        #[serde(flatten)]
        options: NotificationOptions,
    },
    Update {
        id: String,
        #[serde(flatten)]
        patch: NotificationPatch,
    },
    Clear {
        id: String,
    },
}

impl NotificationCommand {
    pub fn id(&self) -> &str {
        match self {
            NotificationCommand::Create { id, .. }
            | NotificationCommand::Update { id, .. }
            | NotificationCommand::Clear { id } => id,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification {0} must not be empty")]
    MissingField(&'static str),
    #[error("notification display is unavailable")]
    Unavailable,
    #[error("failed to encode notification command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Shows notifications to the user.
///
/// Updating or clearing an id that is not shown must succeed without effect.
pub trait NotificationDisplay: Send + Sync + 'static {
    fn is_available(&self) -> bool;

    fn create(
        &self,
        id: &str,
        options: NotificationOptions,
    ) -> impl Future<Output = Result<(), NotificationError>> + Send;

    fn update(
        &self,
        id: &str,
        patch: NotificationPatch,
    ) -> impl Future<Output = Result<(), NotificationError>> + Send;

    fn clear(&self, id: &str) -> impl Future<Output = Result<(), NotificationError>> + Send;
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    command: &'a NotificationCommand,
}

/// Publishes notification commands to every `/events` subscriber.
#[derive(Clone, Debug)]
pub struct BroadcastDisplay {
    enabled: bool,
    visible: Arc<Mutex<HashSet<String>>>,
    tx: broadcast::Sender<String>,
}

impl BroadcastDisplay {
    pub fn new(tx: broadcast::Sender<String>, enabled: bool) -> Self {
        Self {
            enabled,
            visible: Arc::new(Mutex::new(HashSet::new())),
            tx,
        }
    }

    fn visible_set(&self) -> MutexGuard<'_, HashSet<String>> {
        self.visible.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn visible(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.visible_set().iter().cloned().collect();
        ids.sort();
        ids
    }

    fn publish(&self, command: &NotificationCommand) -> Result<(), NotificationError> {
        let msg = serde_json::to_string(&Envelope {
            kind: "notification",
            command,
        })?;
        if self.tx.send(msg).is_err() {
            debug!("No subscribers for notification {}", command.id());
        }
        Ok(())
    }
}

impl NotificationDisplay for BroadcastDisplay {
    fn is_available(&self) -> bool {
        self.enabled
    }

    async fn create(&self, id: &str, options: NotificationOptions) -> Result<(), NotificationError> {
        if !self.enabled {
            return Err(NotificationError::Unavailable);
        }
        if id.is_empty() {
            return Err(NotificationError::MissingField("id"));
        }
        if options.title.is_empty() {
            return Err(NotificationError::MissingField("title"));
        }
        if options.message.is_empty() {
            return Err(NotificationError::MissingField("message"));
        }

        info!("Notification {}: {} - {}", id, options.title, options.message);
        let command = NotificationCommand::Create {
            id: id.to_string(),
            options,
        };
        self.publish(&command)?;
        self.visible_set().insert(id.to_string());
        Ok(())
    }

    async fn update(&self, id: &str, patch: NotificationPatch) -> Result<(), NotificationError> {
        if !self.enabled {
            return Err(NotificationError::Unavailable);
        }
        if !self.visible_set().contains(id) {
            debug!("Notification {} is not shown, update skipped", id);
            return Ok(());
        }
        self.publish(&NotificationCommand::Update {
            id: id.to_string(),
            patch,
        })
    }

    async fn clear(&self, id: &str) -> Result<(), NotificationError> {
        if !self.enabled {
            return Err(NotificationError::Unavailable);
        }
        if !self.visible_set().remove(id) {
            debug!("Notification {} is not shown, clear skipped", id);
            return Ok(());
        }
        self.publish(&NotificationCommand::Clear { id: id.to_string() })
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Records every command it receives, optionally failing each call.
    #[derive(Clone, Default)]
    pub struct RecordingDisplay {
        commands: Arc<Mutex<Vec<NotificationCommand>>>,
        failing: bool,
        unavailable: bool,
    }

    impl RecordingDisplay {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                failing: true,
                ..Self::default()
            }
        }

        pub fn unavailable() -> Self {
            Self {
                unavailable: true,
                ..Self::default()
            }
        }

        pub fn take(&self) -> Vec<NotificationCommand> {
            std::mem::take(&mut *self.commands.lock().unwrap())
        }

        fn record(&self, command: NotificationCommand) -> Result<(), NotificationError> {
            self.commands.lock().unwrap().push(command);
            if self.failing {
                Err(NotificationError::Unavailable)
            } else {
                Ok(())
            }
        }
    }

    impl NotificationDisplay for RecordingDisplay {
        fn is_available(&self) -> bool {
            !self.unavailable
        }

        async fn create(
            &self,
            id: &str,
            options: NotificationOptions,
        ) -> Result<(), NotificationError> {
            self.record(NotificationCommand::Create {
                id: id.to_string(),
                options,
            })
        }

        async fn update(&self, id: &str, patch: NotificationPatch) -> Result<(), NotificationError> {
            self.record(NotificationCommand::Update {
                id: id.to_string(),
                patch,
            })
        }

        async fn clear(&self, id: &str) -> Result<(), NotificationError> {
            self.record(NotificationCommand::Clear { id: id.to_string() })
        }
    }
}
