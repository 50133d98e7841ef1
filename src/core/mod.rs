//! Core business logic module
//!
//! This module contains the domain models, the yt-dlp integration, and the
//! download manager that the HTTP layer drives.

pub mod config;
pub mod error_handling;
pub mod extractor;
pub mod manager;
pub mod metadata;
pub mod models;
pub mod tracker;

// Re-export commonly used types
pub use config::AppConfig;
pub use extractor::{MediaExtractor, YtDlpExtractor};
pub use manager::DownloadManager;
