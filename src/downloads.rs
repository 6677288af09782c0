use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadId(pub u64);

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    #[default]
    InProgress,
    Complete,
    Interrupted,
    Cancelled,
}

/// The host's latest view of one download.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadItem {
    pub id: DownloadId,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub bytes_received: u64,
    /// `0` or negative while the host does not know the size.
    #[serde(default)]
    pub total_bytes: i64,
    #[serde(default)]
    pub state: DownloadState,
    #[serde(default, skip_deserializing)]
    pub speed: u64, // bytes per second
}

#[cfg(test)]
impl DownloadItem {
    pub fn new(id: u64) -> Self {
        Self {
            id: DownloadId(id),
            filename: None,
            url: None,
            bytes_received: 0,
            total_bytes: 0,
            state: DownloadState::InProgress,
            speed: 0,
        }
    }

    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = Some(filename.to_string());
        self
    }

    pub fn with_total_bytes(mut self, total_bytes: i64) -> Self {
        self.total_bytes = total_bytes;
        self
    }
}

/// A changed field of a delta. Hosts send either `{current, previous}` or the
/// bare new value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "ChangeRepr<T>")]
pub struct Change<T> {
    pub current: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<T>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChangeRepr<T> {
    Full {
        current: T,
        #[serde(default)]
        previous: Option<T>,
    },
    Bare(T),
}

impl<T> From<ChangeRepr<T>> for Change<T> {
    fn from(repr: ChangeRepr<T>) -> Self {
        match repr {
            ChangeRepr::Full { current, previous } => Change { current, previous },
            ChangeRepr::Bare(current) => Change {
                current,
                previous: None,
            },
        }
    }
}

#[cfg(test)]
impl<T> Change<T> {
    pub fn to(current: T) -> Self {
        Self {
            current,
            previous: None,
        }
    }
}

/// Fields of a download that changed in one host event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadDelta {
    pub id: DownloadId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_received: Option<Change<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<Change<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<Change<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Change<DownloadState>>,
}

#[cfg(test)]
impl DownloadDelta {
    pub fn new(id: u64) -> Self {
        Self {
            id: DownloadId(id),
            bytes_received: None,
            total_bytes: None,
            filename: None,
            state: None,
        }
    }

    pub fn with_bytes_received(mut self, bytes: u64) -> Self {
        self.bytes_received = Some(Change::to(bytes));
        self
    }

    pub fn with_state(mut self, state: DownloadState) -> Self {
        self.state = Some(Change::to(state));
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadEvent {
    Created(DownloadItem),
    Changed(DownloadDelta),
    Erased { id: DownloadId },
}

impl DownloadEvent {
    pub fn id(&self) -> DownloadId {
        match self {
            DownloadEvent::Created(item) => item.id,
            DownloadEvent::Changed(delta) => delta.id,
            DownloadEvent::Erased { id } => *id,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DownloadQuery {
    pub id: Option<DownloadId>,
    pub state: Option<DownloadState>,
}

impl DownloadQuery {
    pub fn by_id(id: DownloadId) -> Self {
        Self {
            id: Some(id),
            state: None,
        }
    }

    pub fn by_state(state: DownloadState) -> Self {
        Self {
            id: None,
            state: Some(state),
        }
    }

    fn matches(&self, item: &DownloadItem) -> bool {
        self.id.is_none_or(|id| id == item.id) && self.state.is_none_or(|s| s == item.state)
    }
}

/// Where the tracker resolves the current byte counts of a download.
pub trait DownloadSource: Clone + Send + Sync + 'static {
    fn search(&self, query: DownloadQuery) -> impl Future<Output = Vec<DownloadItem>> + Send;
}

/// In-memory table of the downloads reported by the host.
#[derive(Clone, Debug, Default)]
pub struct DownloadTable {
    items: Arc<Mutex<HashMap<DownloadId, DownloadItem>>>,
}

impl DownloadTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<DownloadId, DownloadItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn apply(&self, event: &DownloadEvent) {
        Self::apply_to(&mut self.lock(), event);
    }

    /// Applies `event` and hands it to `forward` under the same lock, so the
    /// receiving side sees events in the order the table applied them.
    pub fn record<F>(&self, event: DownloadEvent, forward: F)
    where
        F: FnOnce(DownloadEvent),
    {
        let mut items = self.lock();
        Self::apply_to(&mut items, &event);
        forward(event);
    }

    fn apply_to(items: &mut HashMap<DownloadId, DownloadItem>, event: &DownloadEvent) {
        match event {
            DownloadEvent::Created(item) => {
                let mut item = item.clone();
                item.speed = 0;
                items.insert(item.id, item);
            }
            DownloadEvent::Changed(delta) => {
                let Some(item) = items.get_mut(&delta.id) else {
                    debug!("Change for unknown download {} ignored", delta.id);
                    return;
                };
                if let Some(bytes) = &delta.bytes_received {
                    item.bytes_received = bytes.current;
                }
                if let Some(total) = &delta.total_bytes {
                    item.total_bytes = total.current;
                }
                if let Some(filename) = &delta.filename {
                    item.filename = Some(filename.current.clone());
                }
                if let Some(state) = &delta.state {
                    item.state = state.current;
                    if state.current != DownloadState::InProgress {
                        item.speed = 0;
                    }
                }
            }
            DownloadEvent::Erased { id } => {
                items.remove(id);
            }
        }
    }

    pub fn find(&self, query: &DownloadQuery) -> Vec<DownloadItem> {
        let items = self.lock();
        let mut found: Vec<DownloadItem> = items
            .values()
            .filter(|item| query.matches(item))
            .cloned()
            .collect();
        found.sort_by_key(|item| item.id);
        found
    }

    /// Recomputes the speed of in-progress downloads from the byte counts seen
    /// on the previous call, `elapsed_ms` ago, and returns those downloads.
    pub fn refresh_speeds(
        &self,
        last_bytes: &mut HashMap<DownloadId, u64>,
        elapsed_ms: u64,
    ) -> Vec<DownloadItem> {
        let mut items = self.lock();
        let mut active = Vec::new();

        for (id, item) in items.iter_mut() {
            if item.state != DownloadState::InProgress {
                continue;
            }
            let last = last_bytes.get(id).cloned().unwrap_or(0);
            let current = item.bytes_received;

            if current >= last && elapsed_ms > 0 {
                item.speed = (current - last).saturating_mul(1000) / elapsed_ms;
            }

            last_bytes.insert(*id, current);
            active.push(item.clone());
        }

        // Forget downloads that finished or were erased
        last_bytes.retain(|k, _| active.iter().any(|item| item.id == *k));

        active.sort_by_key(|item| item.id);
        active
    }
}

impl DownloadSource for DownloadTable {
    fn search(&self, query: DownloadQuery) -> impl Future<Output = Vec<DownloadItem>> + Send {
        std::future::ready(self.find(&query))
    }
}
