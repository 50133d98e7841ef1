//! yt-dlp process integration
//!
//! Every call spawns one yt-dlp child. Metadata calls collect the child's
//! JSON output; media calls hand back a byte stream wired to the child's
//! stdout. A semaphore bounds how many children run at once, and a media
//! stream holds its permit until the stream is dropped. The tool version is
//! looked up under a permit as well and cached once known.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{OnceCell, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use super::config::ExtractorConfig;
use super::models::{AppError, AppResult};

/// Flags shared by every yt-dlp invocation
const COMMON_FLAGS: &[&str] = &[
    "--no-playlist",
    "--no-warnings",
    "--no-call-home",
    "--no-check-certificate",
];

/// Stderr kept for error messages
const STDERR_TAIL_CHARS: usize = 2000;

/// Media bytes produced by an extractor
pub type MediaStream = Pin<Box<dyn Stream<Item = AppResult<Bytes>> + Send>>;

/// Source of media metadata and media bytes
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Raw metadata document for a single video
    async fn fetch_info(&self, url: &str) -> AppResult<Value>;

    /// Stream the media selected by `format_spec`
    async fn open_stream(&self, url: &str, format_spec: &str) -> AppResult<MediaStream>;

    /// Version of the underlying tool, if it can be run
    async fn version(&self) -> Option<String>;
}

/// Arguments for a metadata dump
pub fn info_args(url: &str) -> Vec<String> {
    let mut args = vec![url.to_string(), "--dump-json".to_string()];
    args.extend(COMMON_FLAGS.iter().map(|f| f.to_string()));
    args
}

/// Arguments for streaming media to stdout
pub fn stream_args(url: &str, format_spec: &str) -> Vec<String> {
    let mut args = vec![
        url.to_string(),
        "-f".to_string(),
        format_spec.to_string(),
        "-o".to_string(),
        "-".to_string(),
    ];
    args.extend(COMMON_FLAGS.iter().map(|f| f.to_string()));
    args.push("--prefer-free-formats".to_string());
    args
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_TAIL_CHARS {
        trimmed.to_string()
    } else {
        trimmed.chars().skip(count - STDERR_TAIL_CHARS).collect()
    }
}

/// yt-dlp backed [`MediaExtractor`]
pub struct YtDlpExtractor {
    config: ExtractorConfig,
    permits: Arc<Semaphore>,
    version: OnceCell<String>,
}

impl YtDlpExtractor {
    pub fn new(config: ExtractorConfig) -> AppResult<Self> {
        if config.max_concurrent_processes == 0 {
            return Err(AppError::Config(
                "max_concurrent_processes must be greater than 0".to_string(),
            ));
        }

        if config.chunk_size == 0 {
            return Err(AppError::Config(
                "chunk_size must be greater than 0".to_string(),
            ));
        }

        info!(
            "Initialized yt-dlp extractor (binary: {}, max processes: {})",
            config.binary, config.max_concurrent_processes
        );

        Ok(Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent_processes)),
            config,
            version: OnceCell::new(),
        })
    }

    /// Number of processes that may still be started right now
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    async fn acquire(&self) -> AppResult<OwnedSemaphorePermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Download("extractor is shutting down".to_string()))
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, err: std::io::Error) -> AppError {
        if err.kind() == std::io::ErrorKind::NotFound {
            AppError::ToolMissing(self.config.binary.clone())
        } else {
            AppError::Io(err)
        }
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn fetch_info(&self, url: &str) -> AppResult<Value> {
        debug!("Fetching media info for URL: {}", url);
        let _permit = self.acquire().await?;

        let timeout_secs = self.config.info_timeout_secs;
        let output = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.command(&info_args(url)).output(),
        )
        .await
        .map_err(|_| AppError::Timeout(timeout_secs))?
        .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(AppError::Extractor(stderr_tail(&output.stderr)));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| AppError::Parse(format!("Failed to parse yt-dlp output: {}", e)))
    }

    async fn open_stream(&self, url: &str, format_spec: &str) -> AppResult<MediaStream> {
        info!("Streaming {} with format {}", url, format_spec);
        let permit = self.acquire().await?;

        let mut child = self
            .command(&stream_args(url, format_spec))
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Download("yt-dlp stdout was not captured".to_string()))?;

        // Drain stderr concurrently so a chatty child never blocks on a full pipe.
        let stderr = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                buf
            })
        });

        let state = ChildStream {
            reader: ReaderStream::with_capacity(stdout, self.config.chunk_size),
            child,
            stderr,
            _permit: permit,
            finished: false,
        };

        Ok(Box::pin(futures::stream::unfold(state, ChildStream::advance)))
    }

    async fn version(&self) -> Option<String> {
        if let Some(version) = self.version.get() {
            return Some(version.clone());
        }

        let _permit = self.acquire().await.ok()?;
        let timeout_secs = self.config.info_timeout_secs;
        let output = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.command(&["--version".to_string()]).output(),
        )
        .await
        .ok()?
        .ok()?;

        if !output.status.success() {
            warn!("yt-dlp --version exited with {}", output.status);
            return None;
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if version.is_empty() {
            return None;
        }
        // Failures are not cached so a tool installed later is still found.
        let _ = self.version.set(version.clone());
        Some(version)
    }
}

/// State carried by a media stream: the child must outlive its stdout.
struct ChildStream {
    reader: ReaderStream<ChildStdout>,
    child: Child,
    stderr: Option<JoinHandle<Vec<u8>>>,
    _permit: OwnedSemaphorePermit,
    finished: bool,
}

impl ChildStream {
    async fn advance(mut self) -> Option<(AppResult<Bytes>, Self)> {
        if self.finished {
            return None;
        }

        match self.reader.next().await {
            Some(Ok(chunk)) => Some((Ok(chunk), self)),
            Some(Err(err)) => {
                self.finished = true;
                Some((Err(AppError::Io(err)), self))
            }
            None => {
                self.finished = true;
                match self.child.wait().await {
                    Ok(status) if status.success() => None,
                    Ok(status) => {
                        let stderr = match self.stderr.take() {
                            Some(handle) => handle.await.unwrap_or_default(),
                            None => Vec::new(),
                        };
                        warn!("yt-dlp exited with {} while streaming", status);
                        Some((Err(AppError::Extractor(stderr_tail(&stderr))), self))
                    }
                    Err(err) => Some((Err(AppError::Io(err)), self)),
                }
            }
        }
    }
}
