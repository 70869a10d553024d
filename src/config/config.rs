use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::core::history_manager::{HistoryConfig, DEFAULT_DEBOUNCE_MS, DEFAULT_MAX_HISTORY_SIZE};
use crate::core::undo_notice::DEFAULT_UNDO_NOTICE_MS;
use crate::data::query_engine::SearchMode;
use crate::data::sort::SortMode;
use crate::error::ConfigError;
use crate::utils::app_paths::AppPaths;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub history: HistorySettings,
    pub query: QuerySettings,
    pub pagination: PaginationSettings,
    pub virtualization: VirtualizationSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// Oldest entries are evicted beyond this many
    pub max_history_size: usize,

    /// Quiet period before a burst of edits becomes one history entry
    pub debounce_ms: u64,

    /// How long the "undo last delete" notice stays up
    pub undo_notice_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// "single" replaces the sort on each toggle, "multi" stacks criteria
    pub sort_mode: SortMode,

    /// "substring" or "fuzzy"
    pub search_mode: SearchMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Windowing {
    #[default]
    Paged,
    Virtual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationSettings {
    pub page_size: usize,
    pub windowing: Windowing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualizationSettings {
    /// Height assumed for rows that have not been measured yet
    pub estimated_row_height: f64,

    /// Extra rows materialized above and below the viewport
    pub overscan: usize,

    /// Initial viewport height until the host reports the real one
    pub viewport_height: f64,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            max_history_size: DEFAULT_MAX_HISTORY_SIZE,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            undo_notice_ms: DEFAULT_UNDO_NOTICE_MS,
        }
    }
}

impl HistorySettings {
    pub fn history_config(&self) -> HistoryConfig {
        HistoryConfig {
            max_history_size: self.max_history_size,
            debounce_ms: self.debounce_ms,
        }
    }
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            page_size: 50,
            windowing: Windowing::Paged,
        }
    }
}

impl Default for VirtualizationSettings {
    fn default() -> Self {
        Self {
            estimated_row_height: 32.0,
            overscan: 3,
            viewport_height: 600.0,
        }
    }
}

impl EngineConfig {
    /// Load config from the default location, creating it when missing
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            let default_config = Self::default();
            default_config.save_to(&config_path)?;
            info!("Created default config at {}", config_path.display());
            return Ok(default_config);
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::parse(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::from)?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    /// Parse and validate TOML text
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history.max_history_size == 0 {
            return Err(ConfigError::Invalid(
                "history.max_history_size must be at least 1".into(),
            ));
        }
        if self.pagination.page_size == 0 {
            return Err(ConfigError::Invalid(
                "pagination.page_size must be at least 1".into(),
            ));
        }
        let height = self.virtualization.estimated_row_height;
        if height.is_nan() || height <= 0.0 {
            return Err(ConfigError::Invalid(
                "virtualization.estimated_row_height must be positive".into(),
            ));
        }
        if self.virtualization.viewport_height < 0.0 {
            return Err(ConfigError::Invalid(
                "virtualization.viewport_height must not be negative".into(),
            ));
        }
        Ok(())
    }

    /// Get the default config file path
    pub fn get_config_path() -> Result<PathBuf> {
        AppPaths::config_file()
    }

    /// Create a default config file with comments
    pub fn create_default_with_comments() -> String {
        r#"# Grid engine configuration
# Location: ~/.config/grid-engine/config.toml (Linux)
#           ~/Library/Application Support/grid-engine/config.toml (macOS)
#           %APPDATA%\grid-engine\config.toml (Windows)

[history]
# Maximum number of undo steps kept
max_history_size = 50

# Rapid edits within this many milliseconds become one undo step
debounce_ms = 300

# How long the "undo last delete" notice stays visible
undo_notice_ms = 5000

[query]
# "single": clicking a column header replaces the sort
# "multi": clicking adds the column as another sort key
sort_mode = "single"

# "substring" or "fuzzy"
search_mode = "substring"

[pagination]
page_size = 50

# "paged" or "virtual"
windowing = "paged"

[virtualization]
estimated_row_height = 32.0
overscan = 3
viewport_height = 600.0
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.history.max_history_size, 50);
        assert_eq!(config.history.debounce_ms, 300);
        assert_eq!(config.history.undo_notice_ms, 5000);
        assert_eq!(config.pagination.page_size, 50);
        assert_eq!(config.query.sort_mode, SortMode::Single);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_commented_default_matches_default() {
        let parsed = EngineConfig::parse(&EngineConfig::create_default_with_comments()).unwrap();
        assert_eq!(parsed, EngineConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let parsed = EngineConfig::parse(
            r#"
[query]
sort_mode = "multi"
search_mode = "fuzzy"

[pagination]
windowing = "virtual"
"#,
        )
        .unwrap();
        assert_eq!(parsed.query.sort_mode, SortMode::Multi);
        assert_eq!(parsed.query.search_mode, SearchMode::Fuzzy);
        assert_eq!(parsed.pagination.windowing, Windowing::Virtual);
        assert_eq!(parsed.pagination.page_size, 50);
    }

    #[test]
    fn test_validation_rejects_zero_sizes() {
        assert!(matches!(
            EngineConfig::parse("[history]\nmax_history_size = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::parse("[pagination]\npage_size = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::parse("[history]\nmax_history_size = \"lots\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = EngineConfig::default();
        config.history.max_history_size = 7;
        config.save_to(&path).unwrap();

        let loaded = EngineConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
