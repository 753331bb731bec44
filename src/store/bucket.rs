//! Large-object bucket: the document store's chunked file facility.
//!
//! Objects are two collections, chunk documents keyed by `(object, n)` and
//! one record per object. A record is written only after every chunk, so
//! readers never observe a half-written object.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Published metadata for one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Object id
    pub id: u64,
    /// Total stored length in bytes
    pub length: u64,
    /// Chunk size used at upload time
    pub chunk_size: usize,
    /// Number of chunks
    pub chunk_count: usize,
    /// Publish timestamp
    pub uploaded_at: DateTime<Utc>,
}

/// Chunked object storage provided by the document store.
pub trait LargeObjectBucket: Send + Sync + fmt::Debug {
    /// Reserve a fresh object id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the bucket is unavailable.
    fn allocate(&self) -> Result<u64>;

    /// Write chunk `n` of object `id` (not yet visible).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    fn write_chunk(&self, id: u64, n: usize, bytes: Vec<u8>) -> Result<()>;

    /// Make an object visible to readers.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be written.
    fn publish(&self, record: ObjectRecord) -> Result<()>;

    /// Published record for `id`, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the bucket is unavailable.
    fn record(&self, id: u64) -> Result<Option<ObjectRecord>>;

    /// Chunk `n` of object `id`, if present.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the bucket is unavailable.
    fn read_chunk(&self, id: u64, n: usize) -> Result<Option<Vec<u8>>>;

    /// Remove an object's record and chunks. Returns whether a record existed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the bucket is unavailable.
    fn remove(&self, id: u64) -> Result<bool>;
}

/// In-memory bucket using lock-free concurrent hashmaps.
#[derive(Debug, Default)]
pub struct MemoryBucket {
    next_id: AtomicU64,
    records: DashMap<u64, ObjectRecord>,
    chunks: DashMap<(u64, usize), Vec<u8>>,
}

impl MemoryBucket {
    /// Create an empty bucket.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of published objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.records.len()
    }

    /// Number of stored chunks (published or not).
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

impl LargeObjectBucket for MemoryBucket {
    fn allocate(&self) -> Result<u64> {
        Ok(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn write_chunk(&self, id: u64, n: usize, bytes: Vec<u8>) -> Result<()> {
        self.chunks.insert((id, n), bytes);
        Ok(())
    }

    fn publish(&self, record: ObjectRecord) -> Result<()> {
        self.records.insert(record.id, record);
        Ok(())
    }

    fn record(&self, id: u64) -> Result<Option<ObjectRecord>> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    fn read_chunk(&self, id: u64, n: usize) -> Result<Option<Vec<u8>>> {
        Ok(self.chunks.get(&(id, n)).map(|c| c.value().clone()))
    }

    fn remove(&self, id: u64) -> Result<bool> {
        let existed = self.records.remove(&id).is_some();
        self.chunks.retain(|(object, _), _| *object != id);
        Ok(existed)
    }
}
