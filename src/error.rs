//! Error types for Kiln
//!
//! All modules use `KilnResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Kiln operations
pub type KilnResult<T> = Result<T, KilnError>;

/// All errors that can occur in Kiln
#[derive(Error, Debug)]
pub enum KilnError {
    // Cache errors
    #[error("Cache storage error: {context}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache entry for {requested} records a different target: {stored}")]
    CacheConsistency { requested: String, stored: String },

    #[error("Corrupt cache record {path}: {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },

    // Graph errors
    #[error("Target not found in dependency graph: {0}")]
    TargetNotFound(String),

    #[error("Build graph inconsistency: expected {expected}, got {actual}")]
    GraphConsistency { expected: String, actual: String },

    #[error("Target declared more than once: {0}")]
    DuplicateTarget(String),

    #[error("Target {target} depends on unknown target {dependency}")]
    UnknownDependency { target: String, dependency: String },

    #[error("Dependency cycle detected involving {0}")]
    DependencyCycle(String),

    // Build errors
    #[error("Failed to read source file {target}: {source}")]
    SourceRead {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Execution environment unavailable: {env}: {reason}")]
    EnvironmentUnavailable { env: String, reason: String },

    #[error("Build step for {target} failed to execute: {reason}")]
    Execution { target: String, reason: String },

    #[error("Build step for {target} exited with code {code}")]
    BuildStepFailed {
        target: String,
        code: i32,
        output: String,
    },

    #[error("Failed to extract {path} for {target}: {reason}")]
    OutputExtraction {
        target: String,
        path: String,
        reason: String,
    },

    #[error("No cached artifact for {dependency} (needed by {target})")]
    MissingDependencyArtifact { target: String, dependency: String },

    #[error("Build of {0} cancelled after a sibling failure")]
    Cancelled(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Invalid build file {path}: {reason}")]
    BuildFileInvalid { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KilnError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a cache storage error with context
    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }

    /// Create an execution error for a target
    pub fn execution(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Execution {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// The target whose build step produced this error, if known
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::TargetNotFound(t) | Self::Cancelled(t) => Some(t),
            Self::SourceRead { target, .. }
            | Self::Execution { target, .. }
            | Self::BuildStepFailed { target, .. }
            | Self::OutputExtraction { target, .. }
            | Self::MissingDependencyArtifact { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Whether this error came from a sibling failure rather than its own step
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::TargetNotFound(_) => Some("Run: kiln graph  to list known targets"),
            Self::EnvironmentUnavailable { .. } => {
                Some("Check that the container engine is installed and the image name is correct")
            }
            Self::CacheConsistency { .. } | Self::CacheCorrupt { .. } => {
                Some("Run: kiln cache clear --yes")
            }
            Self::MissingDependencyArtifact { .. } => {
                Some("Set build.strict_staging = false to build against missing inputs")
            }
            _ => None,
        }
    }
}
