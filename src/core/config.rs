//! Application configuration management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Prefix for environment overrides, e.g. `MEDIA_FETCH__SERVER__PORT=9000`
pub const ENV_PREFIX: &str = "MEDIA_FETCH";

/// Main application configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub extractor: ExtractorConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

/// yt-dlp process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Binary name or absolute path
    pub binary: String,
    /// Bytes read from the child's stdout per chunk
    pub chunk_size: usize,
    pub max_concurrent_processes: usize,
    pub info_timeout_secs: u64,
    /// Descriptions longer than this are cut and suffixed with "..."
    pub description_limit: usize,
}

/// Retry settings for metadata lookups
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String, // "error", "warn", "info", "debug", "trace"
    pub json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec!["https://all-video-downloader-two.vercel.app".to_string()],
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            chunk_size: 8192,
            max_concurrent_processes: 4,
            info_timeout_secs: 60,
            description_limit: 500,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional file, and the environment.
    ///
    /// When `path` is `None` the platform config file is used if it exists.
    /// A bare `PORT` variable wins over everything else so that hosting
    /// platforms that inject it keep working.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::get_config_path().ok().filter(|p| p.exists()),
        };

        let mut builder = config::Config::builder();
        if let Some(ref file) = file {
            builder = builder.add_source(config::File::from(file.as_path()).required(path.is_some()));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut cfg: AppConfig = builder
            .build()
            .context("Failed to assemble configuration sources")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        if let Ok(port) = std::env::var("PORT") {
            cfg.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT value: {port}"))?;
        }

        match file {
            Some(f) => tracing::info!("Loaded configuration from: {:?}", f),
            None => tracing::debug!("No configuration file found, using defaults and environment"),
        }
        Ok(cfg)
    }

    /// Save configuration to the given file as pretty JSON
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        std::fs::write(path, self.export()?)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        tracing::info!("Saved configuration to: {:?}", path);
        Ok(())
    }

    /// Get the path to the platform configuration file
    pub fn get_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("com", "videodownloader", "media-fetch-api")
            .with_context(|| "Failed to get project directories")?;

        Ok(project_dirs.config_dir().join("config.json"))
    }

    /// Export configuration as JSON string
    pub fn export(&self) -> Result<String> {
        serde_json::to_string_pretty(self).with_context(|| "Failed to export configuration")
    }

    /// Parse and validate configuration from a JSON string
    pub fn import(json: &str) -> Result<Self> {
        let config: AppConfig =
            serde_json::from_str(json).with_context(|| "Failed to parse imported configuration")?;

        config
            .validate()
            .with_context(|| "Imported configuration is invalid")?;

        Ok(config)
    }

    /// Socket address string for the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Get configuration as environment variables (for debugging)
    pub fn to_env_vars(&self) -> HashMap<String, String> {
        let mut env_vars = HashMap::new();
        let key = |section: &str, field: &str| {
            format!("{ENV_PREFIX}__{}__{}", section.to_uppercase(), field.to_uppercase())
        };

        env_vars.insert(key("server", "host"), self.server.host.clone());
        env_vars.insert(key("server", "port"), self.server.port.to_string());
        env_vars.insert(key("extractor", "binary"), self.extractor.binary.clone());
        env_vars.insert(
            key("extractor", "chunk_size"),
            self.extractor.chunk_size.to_string(),
        );
        env_vars.insert(
            key("extractor", "max_concurrent_processes"),
            self.extractor.max_concurrent_processes.to_string(),
        );
        env_vars.insert(
            key("extractor", "info_timeout_secs"),
            self.extractor.info_timeout_secs.to_string(),
        );
        env_vars.insert(
            key("retry", "max_attempts"),
            self.retry.max_attempts.to_string(),
        );
        env_vars.insert(key("logging", "level"), self.logging.level.clone());
        env_vars.insert(key("logging", "json"), self.logging.json.to_string());

        env_vars
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            anyhow::bail!("Server host must not be empty");
        }

        if self.server.port == 0 {
            anyhow::bail!("Server port must be between 1 and 65535");
        }

        for origin in &self.server.cors_origins {
            if origin != "*" && url::Url::parse(origin).is_err() {
                anyhow::bail!("Invalid CORS origin: {}", origin);
            }
        }

        if self.extractor.binary.trim().is_empty() {
            anyhow::bail!("Extractor binary must not be empty");
        }

        if !(1024..=1024 * 1024).contains(&self.extractor.chunk_size) {
            anyhow::bail!("Chunk size should be between 1KB and 1MB");
        }

        if self.extractor.max_concurrent_processes == 0
            || self.extractor.max_concurrent_processes > 64
        {
            anyhow::bail!("Concurrent processes should be between 1 and 64");
        }

        if self.extractor.info_timeout_secs == 0 || self.extractor.info_timeout_secs > 600 {
            anyhow::bail!("Info timeout should be between 1 and 600 seconds");
        }

        if self.retry.max_attempts == 0 || self.retry.max_attempts > 10 {
            anyhow::bail!("Retry attempts should be between 1 and 10");
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            anyhow::bail!("Retry base delay must not exceed the maximum delay");
        }

        if !["error", "warn", "info", "debug", "trace"].contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Invalid log level: must be 'error', 'warn', 'info', 'debug', or 'trace'"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let json = config.export().unwrap();
        let parsed_config = AppConfig::import(&json).unwrap();

        assert_eq!(config.export().unwrap(), parsed_config.export().unwrap());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = AppConfig::import(r#"{"server":{"port":9000}}"#).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.extractor.binary, "yt-dlp");
    }

    #[test]
    fn test_invalid_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.extractor.max_concurrent_processes = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.extractor.chunk_size = 16;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.server.cors_origins = vec!["not a url".to_string()];
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.retry.base_delay_ms = 20_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.extractor.chunk_size = 16 * 1024;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.extractor.chunk_size, 16 * 1024);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert!(AppConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_env_vars_generation() {
        let config = AppConfig::default();
        let env_vars = config.to_env_vars();

        assert_eq!(
            env_vars.get("MEDIA_FETCH__SERVER__PORT").map(String::as_str),
            Some("8080")
        );
        assert!(env_vars.contains_key("MEDIA_FETCH__EXTRACTOR__BINARY"));
        assert!(env_vars.contains_key("MEDIA_FETCH__LOGGING__LEVEL"));
    }
}
