//! Durable local queue backed by an append-only NDJSON file.
//!
//! Enqueued events sit in memory until the next [`DurableQueue::flush`], which
//! appends them to the queue file and fsyncs before handing them back to the
//! caller. Only flushed events are eligible for delivery; after a crash the
//! file is replayed with [`DurableQueue::load_all`]. Once
//! [`DurableQueue::close`] has run its final flush, enqueues append straight
//! to the file.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::application::metrics::GatewayMetrics;
use crate::domain::{validate, Event};
use crate::error::QueueError;

pub struct DurableQueue {
    path: PathBuf,
    backup_path: PathBuf,
    pending: Mutex<VecDeque<Event>>,
    /// Only changes while `pending` is locked.
    closed: AtomicBool,
    /// Held for the duration of one flush; timer flushes skip when busy.
    flush_guard: tokio::sync::Mutex<()>,
    /// Serialises every writer of the queue file.
    file_lock: tokio::sync::Mutex<()>,
    metrics: Arc<GatewayMetrics>,
}

impl DurableQueue {
    pub fn new(
        path: impl Into<PathBuf>,
        backup_path: impl Into<PathBuf>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            path: path.into(),
            backup_path: backup_path.into(),
            pending: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            flush_guard: tokio::sync::Mutex::new(()),
            file_lock: tokio::sync::Mutex::new(()),
            metrics,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of events waiting for the next flush.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Validate `payload` and buffer it for the next flush.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidEvent`] when the payload does not conform
    /// to the event schema, or a write error when the queue is closed and the
    /// direct append fails.
    pub async fn enqueue(&self, payload: &Value) -> Result<Event, QueueError> {
        let event = validate(payload).map_err(QueueError::InvalidEvent)?;
        self.enqueue_event(event.clone()).await?;
        Ok(event)
    }

    /// Buffer an event that has already been validated.
    ///
    /// # Errors
    ///
    /// Returns a write error when the queue is closed and the direct append
    /// fails.
    pub async fn enqueue_event(&self, event: Event) -> Result<(), QueueError> {
        {
            let mut pending = self.pending.lock();
            if !self.closed.load(Ordering::Acquire) {
                pending.push_back(event);
                let depth = pending.len();
                drop(pending);
                self.metrics.set_queue_depth(depth);
                return Ok(());
            }
        }

        // The final flush has already run; nothing would pick the buffer up.
        if let Err(err) = self.append(std::slice::from_ref(&event)).await {
            self.metrics.increment_queue_write_errors();
            error!(event_id = event.event_id(), error = %err, "Write-through to closed queue failed");
            return Err(err);
        }
        info!(event_id = event.event_id(), "Event written to closed queue");
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Append every pending event to the queue file.
    ///
    /// Returns the events that are now durable. When another flush is already
    /// running this returns an empty list without touching the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error when the file write fails; the events are put back at
    /// the front of the buffer.
    pub async fn flush(&self) -> Result<Vec<Event>, QueueError> {
        let Ok(_guard) = self.flush_guard.try_lock() else {
            debug!("Flush already in progress, skipping");
            return Ok(Vec::new());
        };
        self.flush_pending().await
    }

    async fn flush_pending(&self) -> Result<Vec<Event>, QueueError> {
        let batch: Vec<Event> = self.pending.lock().drain(..).collect();
        if batch.is_empty() {
            return Ok(batch);
        }

        match self.append(&batch).await {
            Ok(()) => {
                self.metrics.set_queue_depth(self.pending_len());
                debug!(count = batch.len(), path = %self.path.display(), "Flushed events");
                Ok(batch)
            }
            Err(err) => {
                let depth = {
                    let mut pending = self.pending.lock();
                    for event in batch.into_iter().rev() {
                        pending.push_front(event);
                    }
                    pending.len()
                };
                self.metrics.increment_queue_write_errors();
                self.metrics.set_queue_depth(depth);
                warn!(error = %err, pending = depth, "Queue flush failed, events requeued");
                Err(err)
            }
        }
    }

    async fn append(&self, batch: &[Event]) -> Result<(), QueueError> {
        let mut buf = String::new();
        for event in batch {
            buf.push_str(&serde_json::to_string(event)?);
            buf.push('\n');
        }

        let _lock = self.file_lock.lock().await;
        ensure_parent(&self.path).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Read every event recorded in the queue file.
    ///
    /// A missing file yields an empty list. Lines that are not valid events are
    /// skipped and counted as read errors.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read.
    pub async fn load_all(&self) -> Result<Vec<Event>, QueueError> {
        let _lock = self.file_lock.lock().await;
        let Some(contents) = read_optional(&self.path).await? else {
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(line) {
                Some(event) => events.push(event),
                None => {
                    self.metrics.increment_queue_read_errors();
                    warn!(line = index + 1, path = %self.path.display(), "Skipping unreadable queue record");
                }
            }
        }

        info!(count = events.len(), path = %self.path.display(), "Loaded queued events");
        Ok(events)
    }

    /// Drop the record with `event_id` from the buffer and the queue file.
    ///
    /// Best effort: a failed rewrite is logged and counted, never returned.
    pub async fn remove_by_id(&self, event_id: &str) {
        let depth = {
            let mut pending = self.pending.lock();
            pending.retain(|event| event.event_id() != event_id);
            pending.len()
        };
        self.metrics.set_queue_depth(depth);

        if let Err(err) = self.rewrite_without(event_id).await {
            self.metrics.increment_queue_write_errors();
            warn!(event_id, error = %err, "Failed to remove event from queue file");
        }
    }

    async fn rewrite_without(&self, event_id: &str) -> Result<(), QueueError> {
        let _lock = self.file_lock.lock().await;
        let Some(contents) = read_optional(&self.path).await? else {
            return Ok(());
        };

        let kept: String = contents
            .lines()
            .filter(|line| !line.trim().is_empty() && !record_has_id(line, event_id))
            .flat_map(|line| [line, "\n"])
            .collect();

        let temp_path = temp_path(&self.path);
        let result = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(kept.as_bytes()).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &self.path).await
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Copy the queue file to the backup path. A missing queue file is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error when the copy fails.
    pub async fn snapshot(&self) -> Result<(), QueueError> {
        let _lock = self.file_lock.lock().await;
        match fs::metadata(&self.path).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        }

        ensure_parent(&self.backup_path).await?;
        let bytes = fs::copy(&self.path, &self.backup_path).await?;
        debug!(bytes, backup = %self.backup_path.display(), "Queue snapshot written");
        Ok(())
    }

    /// Final flush followed by a snapshot. Waits for a running flush.
    ///
    /// # Errors
    ///
    /// Returns the flush error if any, else the snapshot error.
    pub async fn close(&self) -> Result<(), QueueError> {
        {
            let _pending = self.pending.lock();
            self.closed.store(true, Ordering::Release);
        }
        let flushed = {
            let _guard = self.flush_guard.lock().await;
            self.flush_pending().await
        };
        let snapshot = self.snapshot().await;
        flushed?;
        snapshot?;
        info!(path = %self.path.display(), "Durable queue closed");
        Ok(())
    }
}

fn parse_line(line: &str) -> Option<Event> {
    let value: Value = serde_json::from_str(line).ok()?;
    validate(&value).ok()
}

fn record_has_id(line: &str, event_id: &str) -> bool {
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|value| value.get("eventId").and_then(Value::as_str).map(|id| id == event_id))
        .unwrap_or(false)
}

pub(crate) async fn read_optional(path: &Path) -> std::io::Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

pub(crate) async fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn payload(id: &str) -> Value {
        json!({
            "eventId": id,
            "timestamp": "2024-05-01T12:00:00Z",
            "source": "tiktok",
            "funnelStage": "bottom",
            "eventType": "follow",
            "data": {
                "user": { "userId": "u1", "username": "test", "followers": 3 },
                "engagement": {
                    "actionTime": "2024-05-01T12:00:00Z",
                    "profileId": "p1",
                    "purchasedItem": null,
                    "purchaseAmount": null
                }
            }
        })
    }

    fn queue(dir: &TempDir) -> (DurableQueue, Arc<GatewayMetrics>) {
        let metrics = Arc::new(GatewayMetrics::new());
        let queue = DurableQueue::new(
            dir.path().join("data/events.jsonl"),
            dir.path().join("backup/events_backup.jsonl"),
            Arc::clone(&metrics),
        );
        (queue, metrics)
    }

    #[tokio::test]
    async fn enqueue_rejects_invalid_payload() {
        let dir = TempDir::new().unwrap();
        let (queue, _) = queue(&dir);

        let err = queue.enqueue(&json!({ "source": "tiktok" })).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidEvent(_)));
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn flush_then_load_round_trips_in_order() {
        let dir = TempDir::new().unwrap();
        let (queue, metrics) = queue(&dir);

        queue.enqueue(&payload("a")).await.unwrap();
        queue.enqueue(&payload("b")).await.unwrap();
        assert_eq!(metrics.snapshot().queue_depth, 2);

        let flushed = queue.flush().await.unwrap();
        assert_eq!(flushed.len(), 2);
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(metrics.snapshot().queue_depth, 0);

        let loaded = queue.load_all().await.unwrap();
        let ids: Vec<_> = loaded.iter().map(Event::event_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(loaded, flushed);
    }

    #[tokio::test]
    async fn flush_with_nothing_pending_creates_no_file() {
        let dir = TempDir::new().unwrap();
        let (queue, _) = queue(&dir);

        assert!(queue.flush().await.unwrap().is_empty());
        assert!(!queue.path().exists());
    }

    #[tokio::test]
    async fn load_all_on_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let (queue, _) = queue(&dir);

        assert!(queue.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_all_skips_corrupt_lines() {
        let dir = TempDir::new().unwrap();
        let (queue, metrics) = queue(&dir);

        queue.enqueue(&payload("a")).await.unwrap();
        queue.flush().await.unwrap();
        let mut contents = std::fs::read_to_string(queue.path()).unwrap();
        contents.push_str("{not json\n{\"eventId\":\"x\"}\n");
        std::fs::write(queue.path(), contents).unwrap();

        let loaded = queue.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(metrics.snapshot().queue_read_errors, 2);
    }

    #[tokio::test]
    async fn failed_flush_requeues_at_front() {
        let dir = TempDir::new().unwrap();
        let metrics = Arc::new(GatewayMetrics::new());
        // A directory at the queue path makes the append fail.
        let path = dir.path().join("events.jsonl");
        std::fs::create_dir_all(&path).unwrap();
        let queue = DurableQueue::new(&path, dir.path().join("b.jsonl"), Arc::clone(&metrics));

        queue.enqueue(&payload("a")).await.unwrap();
        queue.enqueue(&payload("b")).await.unwrap();
        assert!(queue.flush().await.is_err());

        queue.enqueue(&payload("c")).await.unwrap();
        let order: Vec<String> = queue
            .pending
            .lock()
            .iter()
            .map(|event| event.event_id().to_string())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(metrics.snapshot().queue_write_errors, 1);
    }

    #[tokio::test]
    async fn remove_by_id_rewrites_file() {
        let dir = TempDir::new().unwrap();
        let (queue, _) = queue(&dir);

        for id in ["a", "b", "c"] {
            queue.enqueue(&payload(id)).await.unwrap();
        }
        queue.flush().await.unwrap();

        queue.remove_by_id("b").await;

        let ids: Vec<String> = queue
            .load_all()
            .await
            .unwrap()
            .iter()
            .map(|event| event.event_id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(!temp_path(queue.path()).exists());
    }

    #[tokio::test]
    async fn remove_by_id_drops_pending_entry() {
        let dir = TempDir::new().unwrap();
        let (queue, _) = queue(&dir);

        queue.enqueue(&payload("a")).await.unwrap();
        queue.remove_by_id("a").await;

        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn snapshot_copies_file_and_ignores_missing_source() {
        let dir = TempDir::new().unwrap();
        let (queue, _) = queue(&dir);
        let backup = dir.path().join("backup/events_backup.jsonl");

        queue.snapshot().await.unwrap();
        assert!(!backup.exists());

        queue.enqueue(&payload("a")).await.unwrap();
        queue.flush().await.unwrap();
        queue.snapshot().await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&backup).unwrap(),
            std::fs::read_to_string(queue.path()).unwrap()
        );
    }

    #[tokio::test]
    async fn close_flushes_and_snapshots() {
        let dir = TempDir::new().unwrap();
        let (queue, _) = queue(&dir);

        queue.enqueue(&payload("a")).await.unwrap();
        queue.close().await.unwrap();

        assert_eq!(queue.pending_len(), 0);
        assert!(dir.path().join("backup/events_backup.jsonl").exists());
        assert_eq!(queue.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn enqueue_after_close_writes_through() {
        let dir = TempDir::new().unwrap();
        let (queue, _) = queue(&dir);

        queue.enqueue(&payload("a")).await.unwrap();
        queue.close().await.unwrap();
        assert!(queue.is_closed());

        queue.enqueue(&payload("late")).await.unwrap();

        assert_eq!(queue.pending_len(), 0);
        let ids: Vec<String> = queue
            .load_all()
            .await
            .unwrap()
            .iter()
            .map(|event| event.event_id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "late"]);
    }
}
