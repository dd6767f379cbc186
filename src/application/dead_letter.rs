//! Append-only dead-letter file for batches that could not be delivered.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{error, warn};

use crate::application::metrics::GatewayMetrics;
use crate::application::queue::{ensure_parent, read_optional};
use crate::domain::{validate, Event};
use crate::error::QueueError;

pub struct DeadLetterSink {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
    metrics: Arc<GatewayMetrics>,
}

impl DeadLetterSink {
    pub fn new(path: impl Into<PathBuf>, metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
            metrics,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a whole chunk as NDJSON in a single write.
    ///
    /// # Errors
    ///
    /// Returns an error when encoding or the file write fails.
    pub async fn save_chunk(&self, events: &[Event]) -> Result<(), QueueError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut buf = String::new();
        for event in events {
            buf.push_str(&serde_json::to_string(event)?);
            buf.push('\n');
        }

        let _lock = self.lock.lock().await;
        let written = async {
            ensure_parent(&self.path).await?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(buf.as_bytes()).await?;
            file.sync_data().await
        }
        .await;

        match written {
            Ok(()) => {
                self.metrics.add_dead_lettered(events.len());
                warn!(count = events.len(), path = %self.path.display(), "Chunk written to dead letter file");
                Ok(())
            }
            Err(err) => {
                error!(count = events.len(), error = %err, "Failed to write dead letter chunk");
                Err(err.into())
            }
        }
    }

    /// Read every dead-lettered event. Unreadable lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read.
    pub async fn load_all(&self) -> Result<Vec<Event>, QueueError> {
        let _lock = self.lock.lock().await;
        let Some(contents) = read_optional(&self.path).await? else {
            return Ok(Vec::new());
        };

        Ok(contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|value| validate(&value).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn event(id: &str) -> Event {
        validate(&json!({
            "eventId": id,
            "timestamp": "2024-05-01T12:00:00Z",
            "source": "tiktok",
            "funnelStage": "top",
            "eventType": "like",
            "data": {
                "user": { "userId": "u1", "username": "test", "followers": 1 },
                "engagement": {
                    "watchTime": 1,
                    "percentageWatched": 50,
                    "device": "iOS",
                    "country": "US",
                    "videoId": "v"
                }
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn chunks_append_and_load_back() {
        let dir = TempDir::new().unwrap();
        let metrics = Arc::new(GatewayMetrics::new());
        let sink = DeadLetterSink::new(dir.path().join("dlq/dead.jsonl"), Arc::clone(&metrics));

        sink.save_chunk(&[event("a"), event("b")]).await.unwrap();
        sink.save_chunk(&[event("c")]).await.unwrap();

        let ids: Vec<String> = sink
            .load_all()
            .await
            .unwrap()
            .iter()
            .map(|e| e.event_id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(metrics.snapshot().dead_lettered, 3);
    }

    #[tokio::test]
    async fn empty_chunk_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let sink = DeadLetterSink::new(dir.path().join("dead.jsonl"), Arc::new(GatewayMetrics::new()));

        sink.save_chunk(&[]).await.unwrap();
        assert!(!sink.path().exists());
        assert!(sink.load_all().await.unwrap().is_empty());
    }
}
