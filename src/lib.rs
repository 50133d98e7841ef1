//! Media Fetch API - Core Library
//!
//! This library provides an HTTP service that wraps yt-dlp for metadata
//! lookups and streamed downloads, plus the image builder that packages the
//! service into a minimally-privileged container image.

pub mod api;
pub mod commands;
pub mod core;
pub mod image;
pub mod utils;

// Re-export commonly used types
pub use crate::core::{
    config::AppConfig,
    extractor::{MediaExtractor, YtDlpExtractor},
    manager::DownloadManager,
    models::{AppError, AppResult, DownloadRequest, InfoResponse, Quality},
    tracker::DownloadTracker,
};
pub use image::{BuildContract, BuildError};

use std::sync::Arc;

/// Application state shared between HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: DownloadManager,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// State backed by the real yt-dlp binary
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let extractor = YtDlpExtractor::new(config.extractor.clone())
            .map_err(|e| anyhow::anyhow!("Failed to create yt-dlp extractor: {}", e))?;

        Ok(Self::with_extractor(Arc::new(extractor), config))
    }

    /// State backed by any extractor implementation
    pub fn with_extractor(extractor: Arc<dyn MediaExtractor>, config: AppConfig) -> Self {
        let manager = DownloadManager::new(extractor, &config);
        Self {
            manager,
            config: Arc::new(config),
        }
    }
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "media-fetch-api");
    }

    #[test]
    fn test_state_rejects_invalid_config() {
        let mut config = AppConfig::default();
        config.extractor.max_concurrent_processes = 0;
        assert!(AppState::new(config).is_err());
    }

    #[tokio::test]
    async fn test_state_with_default_config() {
        let state = AppState::new(AppConfig::default()).unwrap();
        assert_eq!(state.config.server.port, 8080);
        assert_eq!(state.manager.statistics().total_downloads, 0);
    }
}
