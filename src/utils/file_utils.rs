//! File name and file system utilities

use anyhow::{anyhow, Result};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// Upper bound on sanitized file name length, in characters
pub const MAX_FILENAME_CHARS: usize = 200;

fn invalid_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s-]").expect("valid regex"))
}

fn whitespace_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// Ensure directory exists
pub fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| anyhow!("Failed to create directory {}: {}", path.display(), e))?;
    }
    Ok(())
}

/// Sanitize a title for use as a download file name.
///
/// Anything that is not a word character, whitespace, or `-` becomes `_`,
/// whitespace runs collapse to a single `_`, and the result is capped at
/// [`MAX_FILENAME_CHARS`]. The output is also safe inside a quoted
/// `Content-Disposition` header value.
pub fn sanitize_filename(filename: &str) -> String {
    let replaced = invalid_chars().replace_all(filename, "_");
    let collapsed = whitespace_runs().replace_all(&replaced, "_");
    collapsed.chars().take(MAX_FILENAME_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_punctuation() {
        assert_eq!(sanitize_filename("a/b\\c:d\"e"), "a_b_c_d_e");
        assert_eq!(sanitize_filename("Hello   World"), "Hello_World");
        assert_eq!(sanitize_filename("keep-dash_and_underscore"), "keep-dash_and_underscore");
    }

    #[test]
    fn test_sanitize_keeps_unicode_words() {
        assert_eq!(sanitize_filename("视频 标题"), "视频_标题");
    }

    #[test]
    fn test_sanitize_limits_length() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_filename(&long).chars().count(), MAX_FILENAME_CHARS);
    }

    #[test]
    fn test_ensure_dir_exists() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_dir_exists(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
