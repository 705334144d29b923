//! Build journal
//!
//! Appends one JSON line per build event to `<state dir>/journal.log`.
//! Journal IO problems are logged and never fail a build.

use crate::config::{schema::Config, ConfigManager};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

/// Something that happened during a build run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    RunStarted { target: String, steps: usize },
    StepDone { target: String, hash: String },
    RunFinished { target: String, built: usize },
    RunFailed { target: String, error: String },
}

/// One journal line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    #[serde(flatten)]
    pub event: JournalEvent,
}

/// File-based journal that appends JSON lines
pub struct BuildJournal {
    enabled: bool,
    path: PathBuf,
}

impl BuildJournal {
    /// Create a journal from config
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.general.journal,
            path: ConfigManager::journal_path(),
        }
    }

    /// Journal writing to an explicit file
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            path: path.into(),
        }
    }

    /// Journal that records nothing
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            path: PathBuf::new(),
        }
    }

    /// Journal file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event for `run_id`
    pub async fn record(&self, run_id: Uuid, event: JournalEvent) {
        if !self.enabled {
            return;
        }

        let entry = JournalEntry {
            timestamp: Utc::now(),
            run_id,
            event,
        };

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize journal entry: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write build journal {}: {}", self.path.display(), e);
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
