//! Download manager
//!
//! Ties the extractor, retry policy, and download tracker together. Handlers
//! call into this type only; they never touch yt-dlp directly.

use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use super::config::AppConfig;
use super::error_handling::{RetryExecutor, RetryPolicy};
use super::extractor::{MediaExtractor, MediaStream};
use super::metadata;
use super::models::{AppError, AppResult, FormatsResponse, InfoResponse, Quality};
use super::tracker::{DownloadStatistics, DownloadTracker, TrackedStream};
use crate::utils::validation::{validate_format_id, validate_url};

/// A media stream ready to be sent to a client
pub struct PreparedDownload {
    pub filename: String,
    pub format_spec: String,
    pub stream: MediaStream,
}

impl std::fmt::Debug for PreparedDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedDownload")
            .field("filename", &self.filename)
            .field("format_spec", &self.format_spec)
            .finish_non_exhaustive()
    }
}

/// Coordinates metadata lookups and media streams
#[derive(Clone)]
pub struct DownloadManager {
    extractor: Arc<dyn MediaExtractor>,
    retry: RetryExecutor,
    tracker: DownloadTracker,
    description_limit: usize,
}

impl DownloadManager {
    pub fn new(extractor: Arc<dyn MediaExtractor>, config: &AppConfig) -> Self {
        Self {
            extractor,
            retry: RetryExecutor::new(RetryPolicy::from(&config.retry)),
            tracker: DownloadTracker::new(),
            description_limit: config.extractor.description_limit,
        }
    }

    pub fn tracker(&self) -> &DownloadTracker {
        &self.tracker
    }

    pub fn statistics(&self) -> DownloadStatistics {
        self.tracker.statistics()
    }

    pub async fn tool_version(&self) -> Option<String> {
        self.extractor.version().await
    }

    /// Metadata document for `url`, retried on transient failures
    pub async fn fetch_raw_info(&self, url: &str) -> AppResult<Value> {
        let url = validate_url(url)?;
        let url = url.as_str();
        self.retry
            .execute("fetch_info", || self.extractor.fetch_info(url))
            .await
    }

    pub async fn info(&self, url: &str) -> AppResult<InfoResponse> {
        let raw = self.fetch_raw_info(url).await?;
        let info = metadata::video_info(&raw, self.description_limit);
        info!(
            "Fetched info for '{}' ({}) from {}",
            info.title,
            metadata::format_duration(info.duration),
            info.platform
        );
        Ok(info)
    }

    pub async fn formats(&self, url: &str) -> AppResult<FormatsResponse> {
        let raw = self.fetch_raw_info(url).await?;
        let formats = metadata::format_entries(&raw);
        debug!("Found {} downloadable formats for {}", formats.format_count, url);
        Ok(formats)
    }

    /// Prepare a download for one of the quality presets
    pub async fn download(&self, url: &str, quality: Option<&str>) -> AppResult<PreparedDownload> {
        let spec = Quality::parse(quality).format_spec();
        self.prepare(url, spec).await
    }

    /// Prepare a download for an explicit yt-dlp format id
    pub async fn download_format(&self, url: &str, format_id: &str) -> AppResult<PreparedDownload> {
        let format_id = validate_format_id(format_id)?;
        self.prepare(url, format_id).await
    }

    /// Metadata first (for the file name), then the stream. The first chunk
    /// is awaited here so an immediate yt-dlp failure becomes an error
    /// response instead of an empty 200 body.
    async fn prepare(&self, url: &str, format_spec: &str) -> AppResult<PreparedDownload> {
        let url = validate_url(url)?;
        let raw = self.fetch_raw_info(url.as_str()).await?;
        let filename = metadata::download_filename(&raw);

        let id = self.tracker.begin(url.as_str(), format_spec);
        let inner = match self.extractor.open_stream(url.as_str(), format_spec).await {
            Ok(stream) => stream,
            Err(err) => {
                self.tracker.fail(id, err.to_string());
                return Err(err);
            }
        };

        let mut tracked = TrackedStream::new(inner, self.tracker.clone(), id);
        let stream: MediaStream = match tracked.next().await {
            Some(Ok(first)) => {
                Box::pin(futures::stream::once(async { Ok::<_, AppError>(first) }).chain(tracked))
            }
            Some(Err(err)) => return Err(err),
            None => Box::pin(futures::stream::empty()),
        };

        Ok(PreparedDownload {
            filename,
            format_spec: format_spec.to_string(),
            stream,
        })
    }
}
