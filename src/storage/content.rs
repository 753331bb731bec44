//! Content-store backend: chunked objects in the document store's bucket.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::compression::{self, Compression};
use super::{BlobStore, BlobToken, StorageKind};
use crate::store::{LargeObjectBucket, ObjectRecord};
use crate::{Error, Result};

/// Default chunk size (255 KiB, matching the document store's bucket layout)
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;

/// Large-object backend built on a [`LargeObjectBucket`].
///
/// Chunks are written under a freshly allocated object id and the object
/// record is published last, so a failed upload is never visible to `get`.
/// No deduplication: identical payloads are stored twice.
#[derive(Debug, Clone)]
pub struct ContentStore {
    bucket: Arc<dyn LargeObjectBucket>,
    chunk_size: usize,
    compression: Compression,
}

impl ContentStore {
    /// Create a content store with default chunk size and LZ4 compression.
    #[must_use]
    pub fn new(bucket: Arc<dyn LargeObjectBucket>) -> Self {
        Self {
            bucket,
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression: Compression::default(),
        }
    }

    /// Override the chunk size (clamped to at least 1 byte).
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Override the compression algorithm used when `compress` is requested.
    #[must_use]
    pub const fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Chunk size in bytes.
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Underlying bucket (for inspection/testing).
    #[must_use]
    pub fn bucket(&self) -> &Arc<dyn LargeObjectBucket> {
        &self.bucket
    }

    fn parse_key(token: &BlobToken) -> Result<u64> {
        token.key().parse::<u64>().map_err(|_| {
            Error::StorageError(format!("malformed content-store object key {:?}", token.key()))
        })
    }

    fn upload(&self, id: u64, payload: &[u8]) -> Result<usize> {
        let mut chunk_count = 0;
        for (n, chunk) in payload.chunks(self.chunk_size).enumerate() {
            self.bucket.write_chunk(id, n, chunk.to_vec())?;
            chunk_count = n + 1;
        }
        Ok(chunk_count)
    }
}

impl BlobStore for ContentStore {
    fn put(&self, bytes: &[u8], compress: bool) -> Result<BlobToken> {
        let algo = compress.then_some(self.compression);
        let payload = compression::encode(bytes, algo)?;
        let id = self.bucket.allocate()?;

        let published = self.upload(id, &payload).and_then(|chunk_count| {
            self.bucket.publish(ObjectRecord {
                id,
                length: payload.len() as u64,
                chunk_size: self.chunk_size,
                chunk_count,
                uploaded_at: Utc::now(),
            })?;
            Ok(chunk_count)
        });
        let chunk_count = match published {
            Ok(count) => count,
            Err(e) => {
                if let Err(cleanup) = self.bucket.remove(id) {
                    warn!(object = id, error = %cleanup, "failed to discard partial upload");
                }
                return Err(e);
            }
        };
        debug!(object = id, bytes = bytes.len(), chunks = chunk_count, "stored large object");

        Ok(BlobToken::new(
            StorageKind::Content,
            id.to_string(),
            algo,
            bytes.len() as u64,
        ))
    }

    fn get(&self, token: &BlobToken) -> Result<Vec<u8>> {
        let id = Self::parse_key(token)?;
        let record = self
            .bucket
            .record(id)?
            .ok_or_else(|| Error::StorageError(format!("large object {token} not found")))?;

        let mut payload = Vec::with_capacity(usize::try_from(record.length).unwrap_or(0));
        for n in 0..record.chunk_count {
            let chunk = self.bucket.read_chunk(id, n)?.ok_or_else(|| {
                Error::StorageError(format!("large object {token} is missing chunk {n}"))
            })?;
            payload.extend_from_slice(&chunk);
        }
        if payload.len() as u64 != record.length {
            return Err(Error::StorageError(format!(
                "large object {token} is truncated: expected {} bytes, read {}",
                record.length,
                payload.len()
            )));
        }
        compression::decode(payload, token.compression())
    }

    fn delete(&self, token: &BlobToken) -> Result<()> {
        let id = Self::parse_key(token)?;
        let existed = self.bucket.remove(id)?;
        debug!(object = id, existed, "deleted large object");
        Ok(())
    }
}
