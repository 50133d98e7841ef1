//! Error classification and retry for extractor calls
//!
//! yt-dlp reports every failure as free text on stderr. This module sorts
//! those failures into categories so the API can pick a status code and the
//! metadata path can decide whether another attempt is worthwhile.
//!
//! Key features:
//! - Category detection from yt-dlp stderr
//! - Exponential backoff with jitter
//! - Per-category backoff multipliers

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::config::RetryConfig;
use super::models::AppError;

/// Maximum retry attempts allowed
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Default base delay for exponential backoff
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Maximum delay cap for exponential backoff
pub const MAX_DELAY_CAP: Duration = Duration::from_secs(30);

/// Error categories for extractor failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// DNS, connection resets, upstream timeouts
    Network,
    /// Upstream site throttling (HTTP 429)
    RateLimited,
    /// No extractor matches the URL
    Unsupported,
    /// Private, removed, or region-locked media
    Unavailable,
    /// Our own deadline expired
    Timeout,
    /// yt-dlp itself is missing or broken
    Tool,
    /// Output could not be decoded
    Parse,
    /// Bad input or settings
    Configuration,
    /// Anything yt-dlp reported that we do not recognise
    Extractor,
}

impl ErrorCategory {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::RateLimited | Self::Timeout)
    }

    /// Backoff multiplier used between attempts
    pub fn backoff_multiplier(&self) -> f64 {
        match self {
            Self::RateLimited => 3.0,
            _ => 2.0,
        }
    }
}

const RATE_LIMIT_MARKERS: &[&str] = &["HTTP Error 429", "Too Many Requests"];
const UNSUPPORTED_MARKERS: &[&str] = &["Unsupported URL", "is not a valid URL"];
const UNAVAILABLE_MARKERS: &[&str] = &[
    "Private video",
    "Video unavailable",
    "This video is not available",
    "HTTP Error 404",
    "has been removed",
];
const NETWORK_MARKERS: &[&str] = &[
    "Temporary failure in name resolution",
    "Connection reset",
    "Connection refused",
    "timed out",
    "Unable to download webpage",
];

/// Determine the category of an application error
pub fn classify(error: &AppError) -> ErrorCategory {
    match error {
        AppError::Extractor(message) => classify_stderr(message),
        AppError::ToolMissing(_) => ErrorCategory::Tool,
        AppError::Timeout(_) => ErrorCategory::Timeout,
        AppError::Parse(_) => ErrorCategory::Parse,
        AppError::InvalidRequest(_) | AppError::Config(_) => ErrorCategory::Configuration,
        AppError::Io(_) | AppError::Download(_) => ErrorCategory::Network,
    }
}

/// Determine the category of raw yt-dlp stderr text
pub fn classify_stderr(stderr: &str) -> ErrorCategory {
    let contains_any = |markers: &[&str]| markers.iter().any(|m| stderr.contains(m));

    if contains_any(RATE_LIMIT_MARKERS) {
        ErrorCategory::RateLimited
    } else if contains_any(UNSUPPORTED_MARKERS) {
        ErrorCategory::Unsupported
    } else if contains_any(UNAVAILABLE_MARKERS) {
        ErrorCategory::Unavailable
    } else if contains_any(NETWORK_MARKERS) {
        ErrorCategory::Network
    } else {
        ErrorCategory::Extractor
    }
}

/// Retry strategy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Add random jitter to prevent thundering herd
    pub jitter_enabled: bool,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: MAX_DELAY_CAP,
            jitter_enabled: true,
            jitter_factor: 0.1,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.clamp(1, MAX_RETRY_ATTEMPTS),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            ..Self::default()
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1
    pub fn delay_for(&self, category: ErrorCategory, attempt: u32) -> Duration {
        let multiplier = category.backoff_multiplier();
        let delay_ms =
            self.base_delay.as_millis() as f64 * multiplier.powi(attempt.saturating_sub(1) as i32);
        let mut delay = Duration::from_millis(delay_ms as u64).min(self.max_delay);

        if self.jitter_enabled {
            let jitter =
                delay.as_millis() as f64 * self.jitter_factor * (rand::random::<f64>() - 0.5);
            let jittered = delay.as_millis() as i64 + jitter as i64;
            delay = Duration::from_millis(jittered.max(0) as u64);
        }

        delay
    }
}

/// Runs an operation under a [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `f` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned unchanged.
    pub async fn execute<F, Fut, T>(&self, operation: &str, mut f: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let category = classify(&error);
                    if !category.is_retryable() || attempt >= self.policy.max_attempts {
                        return Err(error);
                    }

                    let delay = self.policy.delay_for(category, attempt);
                    warn!(
                        "{} failed on attempt {}/{} ({:?}): {}; retrying in {:?}",
                        operation, attempt, self.policy.max_attempts, category, error, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
