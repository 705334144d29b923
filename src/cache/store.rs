//! Persistent artifact store keyed by target path
//!
//! Each target path maps to one record file named by the SHA-256 of the
//! path. Writes go to a temporary file and are renamed into place, so a
//! concurrent reader sees either the old or the new record. Writers to the
//! same key are serialized through a per-key lock.

use crate::cache::entry::{split_record, CacheEntry, ContentHash};
use crate::error::{KilnError, KilnResult};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

/// Suffix used for in-progress writes
const TMP_SUFFIX: &str = ".tmp";

/// Summary of one stored record, without its content
#[derive(Debug, Clone)]
pub struct CacheRecordInfo {
    /// Target path the record belongs to
    pub target_path: String,
    /// Content hash
    pub hash: ContentHash,
    /// Content size in bytes
    pub size: u64,
}

/// Content-addressed artifact cache backed by a directory
pub struct Cache {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Cache {
    /// Open (and create if needed) a cache rooted at `dir`
    pub async fn open(dir: impl Into<PathBuf>) -> KilnResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| {
            KilnError::storage(format!("creating cache directory {}", dir.display()), e)
        })?;

        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persistent key for a target path
    ///
    /// Hex SHA-256 of the path bytes: fixed width and filesystem-safe
    /// regardless of path length or characters.
    pub fn key_for(path: &str) -> String {
        hex::encode(Sha256::digest(path.as_bytes()))
    }

    fn record_path(&self, path: &str) -> PathBuf {
        self.dir.join(Self::key_for(path))
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Look up the entry for `path`
    ///
    /// Returns `Ok(None)` when nothing is stored. Fails with
    /// `CacheConsistency` when the stored record belongs to another path.
    pub async fn get(&self, path: &str) -> KilnResult<Option<CacheEntry>> {
        let record = self.record_path(path);

        let raw = match fs::read(&record).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Cache miss: {}", path);
                return Ok(None);
            }
            Err(e) => {
                return Err(KilnError::storage(
                    format!("reading cache record {}", record.display()),
                    e,
                ))
            }
        };

        let entry = CacheEntry::decode(&raw).map_err(|reason| KilnError::CacheCorrupt {
            path: record.clone(),
            reason,
        })?;

        if entry.target_path() != path {
            return Err(KilnError::CacheConsistency {
                requested: path.to_string(),
                stored: entry.target_path().to_string(),
            });
        }

        debug!("Cache hit: {} ({})", path, entry.hash());
        Ok(Some(entry))
    }

    /// Whether an entry exists for `path`
    pub async fn contains(&self, path: &str) -> KilnResult<bool> {
        fs::try_exists(self.record_path(path))
            .await
            .map_err(|e| KilnError::storage(format!("checking cache record for {}", path), e))
    }

    /// Store `entry` for `path`, replacing any prior entry
    pub async fn set(&self, path: &str, entry: &CacheEntry) -> KilnResult<()> {
        let key = Self::key_for(path);
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let encoded = entry.encode()?;
        let record = self.dir.join(&key);
        let tmp = self
            .dir
            .join(format!(".{}.{}{}", key, Uuid::new_v4().simple(), TMP_SUFFIX));

        fs::write(&tmp, &encoded)
            .await
            .map_err(|e| KilnError::storage(format!("writing cache record for {}", path), e))?;

        if let Err(e) = fs::rename(&tmp, &record).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(KilnError::storage(
                format!("committing cache record for {}", path),
                e,
            ));
        }

        debug!(
            "Cached {} ({} bytes, {})",
            path,
            entry.content().len(),
            entry.hash()
        );
        Ok(())
    }

    /// Remove the entry for `path`, returning whether one existed
    pub async fn remove(&self, path: &str) -> KilnResult<bool> {
        let key = Self::key_for(path);
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        match fs::remove_file(self.dir.join(&key)).await {
            Ok(()) => {
                debug!("Invalidated cache entry: {}", path);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(KilnError::storage(
                format!("removing cache record for {}", path),
                e,
            )),
        }
    }

    /// Discard the whole store
    pub async fn purge(&self) -> KilnResult<()> {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(KilnError::storage(
                    format!("removing cache directory {}", self.dir.display()),
                    e,
                ))
            }
        }

        fs::create_dir_all(&self.dir).await.map_err(|e| {
            KilnError::storage(format!("recreating cache directory {}", self.dir.display()), e)
        })?;

        info!("Cache cleared: {}", self.dir.display());
        Ok(())
    }

    /// List stored records, sorted by target path
    pub async fn list(&self) -> KilnResult<Vec<CacheRecordInfo>> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| KilnError::storage("reading cache directory", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| KilnError::storage("reading cache directory entry", e))?
        {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }

            let raw = match fs::read(entry.path()).await {
                Ok(raw) => raw,
                Err(e) => {
                    debug!("Skipping unreadable record {}: {}", entry.path().display(), e);
                    continue;
                }
            };

            if let Ok((header, body)) = split_record(&raw) {
                if let Some(hash) = ContentHash::from_hex(&header.hash) {
                    records.push(CacheRecordInfo {
                        target_path: header.target_path,
                        hash,
                        size: body.len() as u64,
                    });
                }
            }
        }

        records.sort_by(|a, b| a.target_path.cmp(&b.target_path));
        Ok(records)
    }
}
