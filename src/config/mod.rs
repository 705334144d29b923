//! Configuration management for Kiln

pub mod schema;

pub use schema::{BuildConfig, CacheConfig, Config, FailurePolicy, GeneralConfig, RuntimeConfig};

use crate::error::{KilnError, KilnResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// File name of the project-local configuration
pub const LOCAL_CONFIG_FILE: &str = "kiln.toml";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kiln")
            .join("config.toml")
    }

    /// Get the state directory path
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kiln")
    }

    /// Get the build journal path
    pub fn journal_path() -> PathBuf {
        Self::state_dir().join("journal.log")
    }

    /// Walk up from `start` looking for a project-local `kiln.toml`
    pub fn find_local_config(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(LOCAL_CONFIG_FILE))
            .find(|candidate| candidate.is_file())
    }

    /// Load configuration, creating default if not exists
    pub async fn load(&self) -> KilnResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> KilnResult<Config> {
        let table = read_table(path).await?;
        into_config(table, path)
    }

    /// Load the global config with a local file layered on top
    ///
    /// Tables merge key by key; any value set locally wins.
    pub async fn load_merged(&self, local: Option<&Path>) -> KilnResult<Config> {
        let Some(local) = local else {
            return self.load().await;
        };

        let mut merged = if self.config_path.exists() {
            read_table(&self.config_path).await?
        } else {
            toml::Table::new()
        };
        merge_tables(&mut merged, read_table(local).await?);
        debug!("Merged local config from {}", local.display());

        into_config(merged, local)
    }

    /// Ensure the state directory exists
    pub async fn ensure_state_dirs() -> KilnResult<()> {
        let dir = Self::state_dir();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| KilnError::io(format!("creating directory {}", dir.display()), e))
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_table(path: &Path) -> KilnResult<toml::Table> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| KilnError::io(format!("reading config from {}", path.display()), e))?;

    content
        .parse::<toml::Table>()
        .map_err(|e| KilnError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn into_config(table: toml::Table, path: &Path) -> KilnResult<Config> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| KilnError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Recursively overlay `overlay` onto `base`
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.toml");
        let manager = ConfigManager::with_path(path);

        let config = manager.load().await.unwrap();
        assert_eq!(config.runtime.engine, "podman");
    }

    #[tokio::test]
    async fn shown_config_loads_back() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        let manager = ConfigManager::with_path(path.clone());

        let mut config = Config::default();
        config.build.jobs = 4;

        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();
        let loaded = manager.load().await.unwrap();

        assert_eq!(loaded.build.jobs, 4);
    }

    #[tokio::test]
    async fn local_overrides_global_per_key() {
        let temp = TempDir::new().unwrap();
        let global = temp.path().join("config.toml");
        std::fs::write(&global, "[runtime]\nengine = \"docker\"\nnetwork = \"host\"\n").unwrap();
        let local = temp.path().join("kiln.toml");
        std::fs::write(&local, "[runtime]\nnetwork = \"none\"\n[build]\njobs = 3\n").unwrap();

        let manager = ConfigManager::with_path(global);
        let config = manager.load_merged(Some(&local)).await.unwrap();

        assert_eq!(config.runtime.engine, "docker");
        assert_eq!(config.runtime.network, "none");
        assert_eq!(config.build.jobs, 3);
    }

    #[tokio::test]
    async fn invalid_config_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[build]\njobs = \"many\"\n").unwrap();

        let err = ConfigManager::with_path(path.clone()).load().await.unwrap_err();
        match err {
            KilnError::ConfigInvalid { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn local_config_found_in_ancestor() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(LOCAL_CONFIG_FILE), "").unwrap();
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = ConfigManager::find_local_config(&nested).unwrap();
        assert_eq!(found, temp.path().join(LOCAL_CONFIG_FILE));
    }
}
