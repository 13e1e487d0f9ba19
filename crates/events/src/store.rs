//! Event store trait and implementations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::event::ClusterEvent;
use crate::types::{EventId, ObjectKey};

/// Trait for event storage backends.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append an event to the store.
    async fn append(&self, event: ClusterEvent) -> Result<EventId>;

    /// Read events strictly after `from`, or every event when `from` is
    /// `None` or unknown.
    async fn read(&self, from: Option<EventId>) -> Result<Vec<ClusterEvent>>;

    /// Read events for a specific object.
    async fn read_for_object(&self, key: &ObjectKey) -> Result<Vec<ClusterEvent>>;

    /// Get the last event ID.
    async fn last_event_id(&self) -> Result<Option<EventId>>;

    /// Get the total number of events.
    async fn count(&self) -> Result<usize>;
}

/// In-memory event store.
#[derive(Default)]
pub struct InMemoryEventStore {
    events: RwLock<Vec<ClusterEvent>>,
    object_index: RwLock<HashMap<ObjectKey, Vec<usize>>>,
}

impl InMemoryEventStore {
    /// Create a new in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: ClusterEvent) -> Result<EventId> {
        let event_id = event.event_id();
        let key = event.key();

        let mut events = self.events.write().await;
        let index = events.len();
        events.push(event);

        let mut object_index = self.object_index.write().await;
        object_index.entry(key).or_default().push(index);

        Ok(event_id)
    }

    async fn read(&self, from: Option<EventId>) -> Result<Vec<ClusterEvent>> {
        let events = self.events.read().await;

        let start = from
            .and_then(|from_id| events.iter().position(|e| e.event_id() == from_id))
            .map_or(0, |pos| pos.saturating_add(1));

        Ok(events.iter().skip(start).cloned().collect())
    }

    async fn read_for_object(&self, key: &ObjectKey) -> Result<Vec<ClusterEvent>> {
        let events = self.events.read().await;
        let object_index = self.object_index.read().await;

        Ok(object_index
            .get(key)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|&i| events.get(i).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn last_event_id(&self) -> Result<Option<EventId>> {
        let events = self.events.read().await;
        Ok(events.last().map(ClusterEvent::event_id))
    }

    async fn count(&self) -> Result<usize> {
        let events = self.events.read().await;
        Ok(events.len())
    }
}

/// A wrapper that adds tracing to an event store.
pub struct TracingEventStore<S: EventStore> {
    inner: S,
}

impl<S: EventStore> TracingEventStore<S> {
    /// Create a new tracing event store.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: EventStore> EventStore for TracingEventStore<S> {
    async fn append(&self, event: ClusterEvent) -> Result<EventId> {
        tracing::debug!(
            event_type = event.event_type(),
            object = %event.key(),
            "Appending event"
        );
        let result = self.inner.append(event).await;
        if let Ok(ref id) = result {
            tracing::trace!(event_id = %id, "Event appended");
        }
        result
    }

    async fn read(&self, from: Option<EventId>) -> Result<Vec<ClusterEvent>> {
        tracing::debug!(from = ?from, "Reading events");
        self.inner.read(from).await
    }

    async fn read_for_object(&self, key: &ObjectKey) -> Result<Vec<ClusterEvent>> {
        tracing::debug!(object = %key, "Reading events for object");
        self.inner.read_for_object(key).await
    }

    async fn last_event_id(&self) -> Result<Option<EventId>> {
        self.inner.last_event_id().await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }
}

/// Event store that mirrors every event into a JSON-lines journal file.
///
/// Reads are served from memory. Opening an existing journal replays it.
pub struct JournalEventStore {
    path: PathBuf,
    memory: InMemoryEventStore,
    file: Mutex<File>,
}

impl JournalEventStore {
    /// Open (or create) a journal, loading any events already in it.
    ///
    /// # Errors
    ///
    /// Returns `Error::CorruptJournal` for an undecodable line and
    /// `Error::StoreFailed` when the file cannot be read or opened.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let memory = InMemoryEventStore::new();

        for event in read_journal(&path).await? {
            memory.append(event).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| Error::store_failed("open journal", format!("{}: {e}", path.display())))?;

        tracing::info!(
            path = %path.display(),
            events = memory.count().await?,
            "Journal opened"
        );

        Ok(Self {
            path,
            memory,
            file: Mutex::new(file),
        })
    }

    /// Path of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Decode every event in a journal file. A missing file holds no events.
///
/// # Errors
///
/// Returns `Error::CorruptJournal` naming the first line that fails to decode.
pub async fn read_journal(path: &Path) -> Result<Vec<ClusterEvent>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(Error::store_failed(
                "read journal",
                format!("{}: {e}", path.display()),
            ));
        }
    };

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .map_err(|e| Error::corrupt_journal(idx.saturating_add(1), e.to_string()))
        })
        .collect()
}

#[async_trait]
impl EventStore for JournalEventStore {
    async fn append(&self, event: ClusterEvent) -> Result<EventId> {
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        {
            let mut file = self.file.lock().await;
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| Error::store_failed("append journal", e.to_string()))?;
            file.flush()
                .await
                .map_err(|e| Error::store_failed("flush journal", e.to_string()))?;
        }

        self.memory.append(event).await
    }

    async fn read(&self, from: Option<EventId>) -> Result<Vec<ClusterEvent>> {
        self.memory.read(from).await
    }

    async fn read_for_object(&self, key: &ObjectKey) -> Result<Vec<ClusterEvent>> {
        self.memory.read_for_object(key).await
    }

    async fn last_event_id(&self) -> Result<Option<EventId>> {
        self.memory.last_event_id().await
    }

    async fn count(&self) -> Result<usize> {
        self.memory.count().await
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{PodPhase, ResourceKind};

    fn pod_key(name: &str) -> ObjectKey {
        ObjectKey::default_ns(ResourceKind::Pod, name)
    }

    #[tokio::test]
    async fn test_append_and_read() {
        let store = InMemoryEventStore::new();
        let event = ClusterEvent::pod_bound(pod_key("web-0"), "node-a");

        let event_id = store.append(event).await.unwrap();
        let events = store.read(None).await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events.first().map(ClusterEvent::event_id), Some(event_id));
    }

    #[tokio::test]
    async fn test_read_after_event_id() {
        let store = InMemoryEventStore::new();
        let first = store
            .append(ClusterEvent::pod_bound(pod_key("web-0"), "node-a"))
            .await
            .unwrap();
        store
            .append(ClusterEvent::pod_phase_changed(
                pod_key("web-0"),
                PodPhase::Pending,
                PodPhase::Running,
            ))
            .await
            .unwrap();

        let after = store.read(Some(first)).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(
            after.first().map(ClusterEvent::event_type),
            Some("pod_phase_changed")
        );
    }

    #[tokio::test]
    async fn test_read_from_unknown_id_returns_everything() {
        let store = InMemoryEventStore::new();
        store
            .append(ClusterEvent::pod_bound(pod_key("web-0"), "node-a"))
            .await
            .unwrap();

        let events = store.read(Some(EventId::new())).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_read_for_object() {
        let store = InMemoryEventStore::new();
        store
            .append(ClusterEvent::pod_bound(pod_key("web-0"), "node-a"))
            .await
            .unwrap();
        store
            .append(ClusterEvent::pod_bound(pod_key("web-1"), "node-b"))
            .await
            .unwrap();
        store
            .append(ClusterEvent::deleted(pod_key("web-0"), "gone"))
            .await
            .unwrap();

        let events = store.read_for_object(&pod_key("web-0")).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_tracing_store_delegates() {
        let store = TracingEventStore::new(InMemoryEventStore::new());
        let id = store
            .append(ClusterEvent::claim_bound(ObjectKey::default_ns(
                ResourceKind::PersistentVolumeClaim,
                "data-db-0",
            )))
            .await
            .unwrap();

        assert_eq!(store.last_event_id().await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn test_journal_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        {
            let journal = JournalEventStore::open(&path).await.unwrap();
            journal
                .append(ClusterEvent::pod_bound(pod_key("web-0"), "node-a"))
                .await
                .unwrap();
            journal
                .append(ClusterEvent::deleted(pod_key("web-0"), "done"))
                .await
                .unwrap();
        }

        let reopened = JournalEventStore::open(&path).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 2);
        assert_eq!(reopened.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_corrupt_journal_names_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let good = serde_json::to_string(&ClusterEvent::pod_bound(pod_key("a"), "n")).unwrap();
        std::fs::write(&path, format!("{good}\nnot json\n")).unwrap();

        let result = read_journal(&path).await;
        assert!(matches!(result, Err(Error::CorruptJournal { line: 2, .. })));
    }

    #[tokio::test]
    async fn test_missing_journal_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let events = read_journal(&dir.path().join("nope.jsonl")).await.unwrap();
        assert!(events.is_empty());
    }
}
