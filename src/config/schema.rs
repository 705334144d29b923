//! Configuration schema for Kiln
//!
//! Global configuration is stored at `~/.config/kiln/config.toml`; a
//! project may override any section in a `kiln.toml` next to its build file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Build settings
    pub build: BuildConfig,

    /// Artifact cache settings
    pub cache: CacheConfig,

    /// Container runtime settings
    pub runtime: RuntimeConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Append build events to the journal
    pub journal: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            journal: true,
        }
    }
}

/// Build settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Build file, relative to the project root
    pub build_file: PathBuf,

    /// Maximum number of build steps running at once
    pub jobs: usize,

    /// Fail a step whose dependency has no cached artifact
    pub strict_staging: bool,

    /// Where the requested artifact is written (default: project root)
    pub output_dir: Option<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            build_file: PathBuf::from("build.json"),
            jobs: 1,
            strict_staging: true,
            output_dir: None,
        }
    }
}

/// What happens to the cache when a build aborts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Delete the whole cache directory
    Purge,
    /// Remove only entries written during the failed run
    #[default]
    Invalidate,
    /// Leave the cache as it is
    Keep,
}

impl FailurePolicy {
    /// Config value as written in TOML
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purge => "purge",
            Self::Invalidate => "invalidate",
            Self::Keep => "keep",
        }
    }
}

/// Artifact cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory, relative paths resolve under the project root
    pub dir: PathBuf,

    /// Cache handling after a failed build
    pub on_failure: FailurePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".kiln/cache"),
            on_failure: FailurePolicy::default(),
        }
    }
}

/// Container runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Container CLI binary ("podman" or "docker")
    pub engine: String,

    /// Working directory inside the container
    pub workdir: String,

    /// Network mode for build containers
    pub network: String,

    /// Run commands as `<shell> -c <command>` instead of splitting on whitespace
    pub shell: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine: "podman".to_string(),
            workdir: "/build".to_string(),
            network: "none".to_string(),
            shell: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[build]"));
        assert!(toml.contains("[runtime]"));
        assert!(toml.contains("on_failure = \"invalidate\""));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.build.jobs, 1);
        assert!(config.build.strict_staging);
        assert_eq!(config.runtime.engine, "podman");
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [cache]
            on_failure = "purge"

            [runtime]
            shell = "/bin/sh"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.cache.on_failure, FailurePolicy::Purge);
        assert_eq!(config.cache.dir, PathBuf::from(".kiln/cache")); // default preserved
        assert_eq!(config.runtime.shell.as_deref(), Some("/bin/sh"));
        assert_eq!(config.runtime.workdir, "/build");
    }

    #[test]
    fn unknown_policy_rejected() {
        assert!(toml::from_str::<Config>("[cache]\non_failure = \"nuke\"").is_err());
    }
}
