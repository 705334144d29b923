//! Persistent artifact cache
//!
//! Maps a target path to its last built (or ingested) content and the
//! content hash of those bytes. Staleness decisions compare live source
//! hashes against these entries; build steps read their inputs from here
//! and write their outputs back.
//!
//! # Layout
//!
//! | File | Description |
//! |------|-------------|
//! | `<sha256(path)>` | Committed record: JSON header line + raw bytes |
//! | `.<key>.<uuid>.tmp` | In-progress write, renamed into place on commit |

pub mod entry;
pub mod store;

pub use entry::{CacheEntry, ContentHash, CONTENT_HASH_LEN};
pub use store::{Cache, CacheRecordInfo};
