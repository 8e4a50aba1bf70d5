//! Engine configuration
//!
//! Stored as `easyscore.json` inside the data directory. A missing file means
//! defaults; relative store paths resolve against the data directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "easyscore.json";

/// Default metadata quota: 5 MiB
pub const DEFAULT_METADATA_QUOTA: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the config file and both stores
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Byte budget of the metadata store
    pub metadata_quota_bytes: u64,
    pub metadata_file: PathBuf,
    pub blob_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            metadata_quota_bytes: DEFAULT_METADATA_QUOTA,
            metadata_file: PathBuf::from("metadata.sqlite"),
            blob_dir: PathBuf::from("blobs"),
        }
    }
}

impl EngineConfig {
    /// Defaults rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load the config from a data directory, falling back to defaults
    pub fn load(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::new(data_dir));
        }
        let data = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        let mut config: EngineConfig =
            serde_json::from_str(&data).with_context(|| "Failed to parse config JSON")?;
        config.data_dir = data_dir.to_path_buf();
        Ok(config)
    }

    /// Write the config into its data directory
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", self.data_dir))?;
        let config_path = self.data_dir.join(CONFIG_FILE);
        let tmp_path = config_path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, &config_path)?;
        Ok(())
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join(&self.metadata_file)
    }

    pub fn blob_path(&self) -> PathBuf {
        self.data_dir.join(&self.blob_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(config.metadata_quota_bytes, DEFAULT_METADATA_QUOTA);
        assert_eq!(config.metadata_path(), dir.path().join("metadata.sqlite"));
        assert_eq!(config.blob_path(), dir.path().join("blobs"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let mut config = EngineConfig::new(dir.path());
        config.metadata_quota_bytes = 1024;
        config.blob_dir = PathBuf::from("images");
        config.save().unwrap();

        let loaded = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(loaded, config);
        assert!(!dir.path().join("easyscore.tmp").exists());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), r#"{"metadata_quota_bytes": 77}"#).unwrap();
        let loaded = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.metadata_quota_bytes, 77);
        assert_eq!(loaded.blob_dir, PathBuf::from("blobs"));
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "{ nope").unwrap();
        assert!(EngineConfig::load(dir.path()).is_err());
    }
}
