use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

const APP_DIR: &str = "grid-engine";

pub struct AppPaths;

impl AppPaths {
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Cannot determine config directory")?
            .join(APP_DIR);

        fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create {}", config_dir.display()))?;
        Ok(config_dir)
    }

    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .context("Cannot determine data directory")?
            .join(APP_DIR);

        fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        Ok(data_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Saved view sessions (query, page, marks) keyed by storage key
    pub fn sessions_file() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("sessions.json"))
    }
}
