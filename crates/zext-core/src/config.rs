//! Configuration module

use crate::executor::ExecutorSettings;
use crate::paging::DEFAULT_PAGE_SIZE;
use crate::{Error, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Default source and destination
    #[serde(default)]
    pub paths: PathsConfig,
    /// Task queue settings
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Extraction behaviour
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

/// Stored default paths, empty when unset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub destination: String,
}

/// Executor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum number of waiting tasks (<= 0 means unbounded)
    pub max_queue_size: i64,
    /// Upper bound of worker threads
    pub max_pool_size: i64,
    /// Block on shutdown until queued work has finished
    pub wait_on_shutdown: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 3,
            max_pool_size: 1,
            wait_on_shutdown: true,
        }
    }
}

/// Extraction configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Refuse to overwrite existing files until the request is confirmed
    pub warn_on_conflicts: bool,
    /// Log every file written
    pub log_files: bool,
    /// Entries per page of a conflict report
    pub page_size: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            warn_on_conflicts: true,
            log_files: true,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Normalise path separators for storage
pub fn format_path(path: &str) -> String {
    path.replace("\\\\", "/").replace('\\', "/")
}

impl Config {
    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = config_dir()
            .ok_or_else(|| Error::Config("Unable to determine config directory".to_string()))?;

        let zext_dir = config_dir.join("zext");
        if !zext_dir.exists() {
            fs::create_dir_all(&zext_dir)?;
        }

        Ok(zext_dir.join("config.toml"))
    }

    /// Get default configuration content with comments
    pub fn default_config_content() -> String {
        r#"# zext configuration file

[paths]
# Default archive or directory to process
source = ""
# Default output location
destination = ""

[executor]
# Maximum number of tasks waiting in the queue (0 or less = unbounded)
max_queue_size = 3
# Maximum number of worker threads (at least 1)
max_pool_size = 1
# Wait for queued tasks to finish when shutting down
wait_on_shutdown = true

[extraction]
# Refuse to overwrite existing files until the request is repeated or --override is given
warn_on_conflicts = true
# Log each file as it is written
log_files = true
# Number of conflicting files shown per page
page_size = 4
"#
        .to_string()
    }

    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_or_create(&Self::config_path()?)
    }

    /// Load configuration from `path`, writing the commented defaults there first if missing
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(path, Self::default_config_content())?;
            return Ok(Self::default());
        }

        Self::load_from(path)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn source_path(&self) -> Option<PathBuf> {
        non_empty(&self.paths.source)
    }

    pub fn destination_path(&self) -> Option<PathBuf> {
        non_empty(&self.paths.destination)
    }

    pub fn set_source(&mut self, path: &str) {
        self.paths.source = format_path(path.trim());
    }

    pub fn set_destination(&mut self, path: &str) {
        self.paths.destination = format_path(path.trim());
    }

    /// Queue capacity with the "unbounded" sentinel resolved
    pub fn queue_capacity(&self) -> usize {
        if self.executor.max_queue_size <= 0 {
            usize::MAX
        } else {
            self.executor.max_queue_size as usize
        }
    }

    pub fn max_pool_size(&self) -> usize {
        self.executor.max_pool_size.max(1) as usize
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            queue_capacity: self.queue_capacity(),
            max_pool_size: self.max_pool_size(),
            keep_alive: Duration::from_secs(10),
            report_interval: Duration::from_secs(1),
        }
    }
}

fn non_empty(value: &str) -> Option<PathBuf> {
    if value.trim().is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.queue_capacity(), 3);
        assert_eq!(config.max_pool_size(), 1);
        assert!(config.executor.wait_on_shutdown);
        assert!(config.extraction.warn_on_conflicts);
        assert_eq!(config.extraction.page_size, 4);
        assert!(config.source_path().is_none());
    }

    #[test]
    fn test_default_content_matches_defaults() {
        let parsed: Config = toml::from_str(&Config::default_config_content()).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_sentinels() {
        let mut config = Config::default();
        config.executor.max_queue_size = 0;
        config.executor.max_pool_size = -2;
        assert_eq!(config.queue_capacity(), usize::MAX);
        assert_eq!(config.max_pool_size(), 1);
    }

    #[test]
    fn test_partial_file() {
        let config: Config = toml::from_str("[executor]\nmax_pool_size = 4\n").unwrap();
        assert_eq!(config.max_pool_size(), 4);
        assert_eq!(config.queue_capacity(), 3);
        assert!(config.extraction.log_files);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.set_source("C:\\worlds\\\\backup.tar.gz");
        config.set_destination(" /srv/out ");
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.paths.source, "C:/worlds/backup.tar.gz");
        assert_eq!(loaded.destination_path(), Some(PathBuf::from("/srv/out")));
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("zext/config.toml");

        let config = Config::load_or_create(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(fs::read_to_string(&path).unwrap().contains("# zext configuration file"));

        fs::write(&path, "[extraction]\npage_size = 10\n").unwrap();
        assert_eq!(Config::load_or_create(&path).unwrap().extraction.page_size, 10);
    }
}
