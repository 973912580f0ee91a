use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{
    fs::{read_to_string, write},
    path::PathBuf,
};

use crate::error::EngineError;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite file holding the dataset and the job queue.
    pub database: PathBuf,
    /// Items per committed chunk.
    pub batch_size: usize,
    /// Dependent identifiers fetched per resolver page.
    pub page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            database: PathBuf::from("netctrl.db"),
            batch_size: DEFAULT_BATCH_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.batch_size == 0 {
            return Err(EngineError::InvalidArgument(
                "batch_size must be positive".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(EngineError::InvalidArgument(
                "page_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

pub trait EngineConfigProvider: Send + Sync {
    fn load(&self) -> Result<EngineConfig, EngineError>;
    fn store(&self, config: &EngineConfig) -> Result<(), EngineError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }
}

impl EngineConfigProvider for TomlConfigProvider {
    /// Reads the `[engine]` table, falling back to defaults when the file does not exist.
    fn load(&self) -> Result<EngineConfig, EngineError> {
        tracing::debug!("Attempting to read engine config from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(EngineConfig::default());
        }
        let content = read_to_string(&self.path)?;
        let mut config: BTreeMap<String, EngineConfig> = toml::from_str(&content)?;
        let engine = config.remove("engine").unwrap_or_default();
        engine.validate()?;
        Ok(engine)
    }

    fn store(&self, config: &EngineConfig) -> Result<(), EngineError> {
        tracing::debug!("Attempting to write engine config to: {:?}", &self.path);
        config.validate()?;
        let mut tables = BTreeMap::new();
        tables.insert("engine".to_string(), config);
        let toml_string = toml::to_string(&tables)?;
        write(&self.path, toml_string)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let provider = TomlConfigProvider::new(dir.path().join("netctrl.toml"));
        assert_eq!(provider.load().unwrap(), EngineConfig::default());
    }

    #[test]
    fn stored_config_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let provider = TomlConfigProvider::new(dir.path().join("netctrl.toml"));
        let config = EngineConfig {
            database: dir.path().join("data.db"),
            batch_size: 7,
            page_size: 3,
        };
        provider.store(&config).unwrap();
        assert_eq!(provider.load().unwrap(), config);
    }

    #[test]
    fn partial_table_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netctrl.toml");
        std::fs::write(&path, "[engine]\nbatch_size = 25\n").unwrap();
        let config = TomlConfigProvider::new(path).load().unwrap();
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let config = EngineConfig {
            batch_size: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidArgument(_))
        ));
    }
}
