//! Cache entries and their on-disk record format
//!
//! A record is a single JSON header line followed by the raw content bytes:
//!
//! ```text
//! {"target_path":"out/main.o","hash":"<32 hex chars>","len":1234}\n
//! <1234 bytes of content>
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Width of a content hash in bytes
pub const CONTENT_HASH_LEN: usize = 16;

/// Fixed-width digest of a target's bytes
///
/// The first 16 bytes of the SHA-256 of the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; CONTENT_HASH_LEN]);

impl ContentHash {
    /// Hash a byte slice
    pub fn of(content: &[u8]) -> Self {
        let digest = Sha256::digest(content);
        let mut out = [0u8; CONTENT_HASH_LEN];
        out.copy_from_slice(&digest[..CONTENT_HASH_LEN]);
        Self(out)
    }

    /// Parse from a hex string
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; CONTENT_HASH_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Hex representation
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A cached artifact for one target path
///
/// The hash is computed at construction and never set independently,
/// so it always matches the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    target_path: String,
    hash: ContentHash,
    content: Vec<u8>,
}

impl CacheEntry {
    /// Create an entry, hashing the content
    pub fn new(target_path: impl Into<String>, content: Vec<u8>) -> Self {
        let hash = ContentHash::of(&content);
        Self {
            target_path: target_path.into(),
            hash,
            content,
        }
    }

    /// The target path this entry was recorded for
    pub fn target_path(&self) -> &str {
        &self.target_path
    }

    /// Content hash of the stored bytes
    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    /// Stored bytes
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Consume the entry, returning the stored bytes
    pub fn into_content(self) -> Vec<u8> {
        self.content
    }

    /// Serialize to the on-disk record format
    pub(crate) fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let header = RecordHeader {
            target_path: self.target_path.clone(),
            hash: self.hash.to_hex(),
            len: self.content.len() as u64,
        };
        let mut out = serde_json::to_vec(&header)?;
        out.push(b'\n');
        out.extend_from_slice(&self.content);
        Ok(out)
    }

    /// Parse an on-disk record, verifying length and hash
    pub(crate) fn decode(raw: &[u8]) -> Result<Self, String> {
        let (header, body) = split_record(raw)?;

        if body.len() as u64 != header.len {
            return Err(format!(
                "content length {} does not match header length {}",
                body.len(),
                header.len
            ));
        }

        let recorded = ContentHash::from_hex(&header.hash)
            .ok_or_else(|| format!("malformed content hash '{}'", header.hash))?;
        let entry = Self::new(header.target_path, body.to_vec());
        if entry.hash != recorded {
            return Err(format!(
                "content hash {} does not match recorded hash {}",
                entry.hash, recorded
            ));
        }

        Ok(entry)
    }
}

/// Header line of a cache record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RecordHeader {
    pub target_path: String,
    pub hash: String,
    pub len: u64,
}

/// Split a raw record into its parsed header and body
pub(crate) fn split_record(raw: &[u8]) -> Result<(RecordHeader, &[u8]), String> {
    let newline = raw
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| "missing record header".to_string())?;
    let header: RecordHeader =
        serde_json::from_slice(&raw[..newline]).map_err(|e| format!("bad header: {}", e))?;
    Ok((header, &raw[newline + 1..]))
}
