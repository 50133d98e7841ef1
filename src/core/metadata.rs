//! Mapping of raw yt-dlp metadata to API responses

use serde_json::Value;

use super::models::{FormatEntry, FormatsResponse, InfoResponse};
use crate::utils::file_utils::sanitize_filename;

/// Descriptions longer than this are truncated by default
pub const DEFAULT_DESCRIPTION_LIMIT: usize = 500;

fn str_field(info: &Value, key: &str) -> Option<String> {
    info.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Accepts integer or float JSON numbers; yt-dlp emits both for sizes.
fn u64_field(info: &Value, key: &str) -> Option<u64> {
    let value = info.get(key)?;
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

fn first_str(info: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| str_field(info, key))
}

fn first_u64(info: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| u64_field(info, key))
}

/// Largest thumbnail is listed last; fall back to the single `thumbnail` field
pub fn pick_thumbnail(info: &Value) -> Option<String> {
    match info.get("thumbnails").and_then(Value::as_array) {
        Some(thumbnails) if !thumbnails.is_empty() => thumbnails
            .last()
            .and_then(|t| t.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => str_field(info, "thumbnail"),
    }
}

/// Cut to `limit` characters and mark the cut with "..."
pub fn truncate_description(description: &str, limit: usize) -> String {
    if description.chars().count() > limit {
        let mut cut: String = description.chars().take(limit).collect();
        cut.push_str("...");
        cut
    } else {
        description.to_string()
    }
}

/// Build the `/info` response from a yt-dlp metadata document
pub fn video_info(info: &Value, description_limit: usize) -> InfoResponse {
    let description = str_field(info, "description").unwrap_or_default();

    InfoResponse {
        title: str_field(info, "title").unwrap_or_else(|| "Unknown Title".to_string()),
        duration: u64_field(info, "duration"),
        uploader: first_str(info, &["uploader", "channel", "creator"]),
        upload_date: str_field(info, "upload_date"),
        view_count: u64_field(info, "view_count"),
        like_count: u64_field(info, "like_count"),
        comment_count: u64_field(info, "comment_count"),
        platform: str_field(info, "extractor_key").unwrap_or_else(|| "Unknown".to_string()),
        thumbnail: pick_thumbnail(info),
        formats_available: info
            .get("formats")
            .and_then(Value::as_array)
            .map_or(0, Vec::len),
        filesize_approx: first_u64(info, &["filesize_approx", "filesize"]),
        description: truncate_description(&description, description_limit),
    }
}

/// Formats with at least one real stream; "none" marks a missing codec
fn has_media(format: &Value) -> bool {
    let is_none = |key: &str| format.get(key).and_then(Value::as_str) == Some("none");
    !(is_none("vcodec") && is_none("acodec"))
}

fn format_entry(format: &Value) -> FormatEntry {
    let quality = str_field(format, "format_note")
        .or_else(|| match format.get("quality") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| "Unknown".to_string());

    FormatEntry {
        format_id: str_field(format, "format_id"),
        ext: str_field(format, "ext"),
        quality,
        filesize: first_u64(format, &["filesize", "filesize_approx"]),
        vcodec: str_field(format, "vcodec"),
        acodec: str_field(format, "acodec"),
        height: u64_field(format, "height"),
        width: u64_field(format, "width"),
        fps: format.get("fps").and_then(Value::as_f64),
    }
}

/// Build the `/formats` response from a yt-dlp metadata document
pub fn format_entries(info: &Value) -> FormatsResponse {
    let formats: Vec<FormatEntry> = info
        .get("formats")
        .and_then(Value::as_array)
        .map(|formats| {
            formats
                .iter()
                .filter(|f| has_media(f))
                .map(format_entry)
                .collect()
        })
        .unwrap_or_default();

    FormatsResponse {
        title: str_field(info, "title"),
        format_count: formats.len(),
        formats,
    }
}

/// Attachment file name for a download
pub fn download_filename(info: &Value) -> String {
    let title = str_field(info, "title").unwrap_or_else(|| "video".to_string());
    format!("{}.mp4", sanitize_filename(&title))
}

/// Human readable duration such as "1h 2m 3s"
pub fn format_duration(seconds: Option<u64>) -> String {
    let seconds = match seconds {
        Some(s) if s > 0 => s,
        _ => return "Unknown".to_string(),
    };

    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    if secs > 0 || parts.is_empty() {
        parts.push(format!("{}s", secs));
    }
    parts.join(" ")
}
