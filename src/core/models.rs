//! Core data models for the media download service

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Body accepted by every POST endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    #[serde(rename = "videoUrl")]
    pub video_url: String,
    #[serde(default = "default_quality")]
    pub quality: Option<String>,
}

fn default_quality() -> Option<String> {
    Some("best".to_string())
}

/// Query parameters for `/download/format`
#[derive(Debug, Clone, Deserialize)]
pub struct FormatQuery {
    pub format_id: Option<String>,
}

/// Video information returned by `/info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoResponse {
    pub title: String,
    pub duration: Option<u64>,
    pub uploader: Option<String>,
    pub upload_date: Option<String>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub comment_count: Option<u64>,
    pub platform: String,
    pub thumbnail: Option<String>,
    pub formats_available: usize,
    pub filesize_approx: Option<u64>,
    #[serde(default)]
    pub description: String,
}

/// One downloadable format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatEntry {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub quality: String,
    pub filesize: Option<u64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub height: Option<u64>,
    pub width: Option<u64>,
    pub fps: Option<f64>,
}

/// Format listing returned by `/formats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatsResponse {
    pub title: Option<String>,
    pub formats: Vec<FormatEntry>,
    pub format_count: usize,
}

/// Error body shared by all endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

/// Service banner returned by `/`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceBanner {
    pub service: String,
    pub status: String,
    pub version: String,
    pub endpoints: BTreeMap<String, String>,
}

/// Health report returned by `/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(rename = "yt-dlp_version")]
    pub ytdlp_version: String,
    pub service_version: String,
    pub downloads: super::tracker::DownloadStatistics,
}

/// Quality presets accepted by `/download`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Best,
    Worst,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
}

impl Quality {
    /// Parse a quality name; unknown values fall back to `Best`
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("worst") => Self::Worst,
            Some("720p") => Self::P720,
            Some("480p") => Self::P480,
            Some("360p") => Self::P360,
            _ => Self::Best,
        }
    }

    /// yt-dlp `-f` selector for this preset
    pub fn format_spec(&self) -> &'static str {
        match self {
            Self::Best => "best[ext=mp4]/best",
            Self::Worst => "worst[ext=mp4]/worst",
            Self::P720 => "best[height<=720][ext=mp4]/best[height<=720]",
            Self::P480 => "best[height<=480][ext=mp4]/best[height<=480]",
            Self::P360 => "best[height<=360][ext=mp4]/best[height<=360]",
        }
    }
}

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("yt-dlp error: {0}")]
    Extractor(String),

    #[error("yt-dlp binary not available: {0}")]
    ToolMissing(String),

    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    #[error("Parsing error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Download error: {0}")]
    Download(String),
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
