//! URL and input validation utilities

use url::Url;

use crate::core::models::{AppError, AppResult};

/// Longest format selector accepted from a client
const MAX_FORMAT_ID_LEN: usize = 128;

/// Validate that the input is an absolute http(s) URL
pub fn validate_url(url: &str) -> AppResult<Url> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidRequest("videoUrl is required".to_string()));
    }

    let parsed = Url::parse(trimmed)
        .map_err(|e| AppError::InvalidRequest(format!("Invalid URL format: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        scheme => Err(AppError::InvalidRequest(format!(
            "Unsupported URL scheme: {}",
            scheme
        ))),
    }
}

/// Validate a client supplied yt-dlp format selector.
///
/// The value ends up as a single argv entry after `-f`, so it can never
/// become a separate flag; still, a leading `-` and characters outside the
/// selector grammar are rejected.
pub fn validate_format_id(format_id: &str) -> AppResult<&str> {
    let trimmed = format_id.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidRequest("format_id is required".to_string()));
    }
    if trimmed.len() > MAX_FORMAT_ID_LEN {
        return Err(AppError::InvalidRequest("format_id is too long".to_string()));
    }
    if trimmed.starts_with('-') {
        return Err(AppError::InvalidRequest(
            "format_id must not start with '-'".to_string(),
        ));
    }

    let allowed = |c: char| c.is_ascii_alphanumeric() || "+/_-[]=<>.:,!?*".contains(c);
    if let Some(bad) = trimmed.chars().find(|c| !allowed(*c)) {
        return Err(AppError::InvalidRequest(format!(
            "format_id contains invalid character '{}'",
            bad
        )));
    }

    Ok(trimmed)
}
