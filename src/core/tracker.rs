//! In-memory registry of media streams served by this process

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::AppError;

/// Lifecycle of one streamed download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DownloadStatus {
    Streaming,
    Completed,
    Failed { error: String },
    Cancelled,
}

impl DownloadStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Streaming)
    }
}

/// One tracked download
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: Uuid,
    pub url: String,
    pub format: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub bytes_streamed: u64,
    pub status: DownloadStatus,
}

/// Aggregate counters reported by `/health`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadStatistics {
    pub total_downloads: usize,
    pub active_downloads: usize,
    pub completed_downloads: usize,
    pub failed_downloads: usize,
    pub cancelled_downloads: usize,
    pub total_bytes_streamed: u64,
}

/// Thread-safe download registry
#[derive(Debug, Clone, Default)]
pub struct DownloadTracker {
    records: Arc<DashMap<Uuid, DownloadRecord>>,
}

impl DownloadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new stream and return its id
    pub fn begin(&self, url: &str, format: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.records.insert(
            id,
            DownloadRecord {
                id,
                url: url.to_string(),
                format: format.to_string(),
                started_at: Utc::now(),
                finished_at: None,
                bytes_streamed: 0,
                status: DownloadStatus::Streaming,
            },
        );
        debug!("Tracking download {} for {}", id, url);
        id
    }

    pub fn record_bytes(&self, id: Uuid, count: u64) {
        if let Some(mut record) = self.records.get_mut(&id) {
            record.bytes_streamed += count;
        }
    }

    pub fn finish(&self, id: Uuid) {
        self.transition(id, DownloadStatus::Completed);
    }

    pub fn fail(&self, id: Uuid, error: impl Into<String>) {
        self.transition(
            id,
            DownloadStatus::Failed {
                error: error.into(),
            },
        );
    }

    pub fn cancel(&self, id: Uuid) {
        self.transition(id, DownloadStatus::Cancelled);
    }

    pub fn get(&self, id: Uuid) -> Option<DownloadRecord> {
        self.records.get(&id).map(|r| r.clone())
    }

    /// Only a streaming record may change state; finished records are final.
    fn transition(&self, id: Uuid, status: DownloadStatus) {
        if let Some(mut record) = self.records.get_mut(&id) {
            if record.status.is_finished() {
                return;
            }
            record.status = status;
            record.finished_at = Some(Utc::now());
            info!(
                "Download {} finished as {:?} after {} bytes",
                id, record.status, record.bytes_streamed
            );
        }
    }

    pub fn statistics(&self) -> DownloadStatistics {
        let mut stats = DownloadStatistics::default();

        for record in self.records.iter() {
            stats.total_downloads += 1;
            stats.total_bytes_streamed += record.bytes_streamed;
            match record.status {
                DownloadStatus::Streaming => stats.active_downloads += 1,
                DownloadStatus::Completed => stats.completed_downloads += 1,
                DownloadStatus::Failed { .. } => stats.failed_downloads += 1,
                DownloadStatus::Cancelled => stats.cancelled_downloads += 1,
            }
        }

        stats
    }

    /// Drop records that finished more than `max_age` ago, returning how
    /// many were removed. Active streams are never dropped.
    pub fn cleanup_finished(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let before = self.records.len();
        self.records.retain(|_, record| match record.finished_at {
            Some(finished) if record.status.is_finished() => finished > cutoff,
            _ => true,
        });
        let removed = before - self.records.len();
        if removed > 0 {
            info!("Cleaned up {} finished downloads", removed);
        }
        removed
    }
}

/// Byte stream that reports progress to a [`DownloadTracker`].
///
/// Reaching the end marks the download completed, an error marks it failed,
/// and dropping it early marks it cancelled.
pub struct TrackedStream<S> {
    inner: S,
    tracker: DownloadTracker,
    id: Uuid,
    done: bool,
}

impl<S> TrackedStream<S> {
    pub fn new(inner: S, tracker: DownloadTracker, id: Uuid) -> Self {
        Self {
            inner,
            tracker,
            id,
            done: false,
        }
    }
}

impl<S> Stream for TrackedStream<S>
where
    S: Stream<Item = Result<Bytes, AppError>> + Unpin,
{
    type Item = Result<Bytes, AppError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.tracker.record_bytes(this.id, chunk.len() as u64);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.done = true;
                warn!("Download {} failed mid-stream: {}", this.id, err);
                this.tracker.fail(this.id, err.to_string());
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.done = true;
                this.tracker.finish(this.id);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for TrackedStream<S> {
    fn drop(&mut self) {
        if !self.done {
            self.tracker.cancel(self.id);
        }
    }
}
