//! Storage abstraction layer for EasyScore
//!
//! Two tiers with different capacity and durability:
//! - the metadata store keeps `{id, name, bpm, zoom, rank}` plus session state,
//!   is small and fast, and is bounded by a quota
//! - the blob store keeps one opaque image payload per entry id and may be slow
//!
//! Neither tier offers cross-store atomicity. A missing blob for a known id is
//! a normal state.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::entry::EntryId;
use crate::error::{StorageError, StorageResult};

/// Metadata-only projection of an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRecord {
    pub id: EntryId,
    pub name: String,
    pub bpm: i64,
    /// `None` for records written before zoom existed
    pub zoom: Option<i64>,
    /// Explicit position in the library sequence
    pub rank: u32,
}

impl MetadataRecord {
    /// Size charged against the metadata quota
    pub fn estimated_size(&self) -> u64 {
        (self.id.as_str().len() + self.name.len() + 16) as u64
    }
}

/// Session pointers persisted alongside the entry records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub source_label: Option<String>,
    pub active_index: u64,
}

/// Per-item result of a batched blob write
#[derive(Debug)]
pub struct PutOutcome {
    pub id: EntryId,
    pub result: StorageResult<()>,
}

impl PutOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Small, capacity-bounded store for entry metadata
///
/// Reads return records in no guaranteed order; callers sort by `rank`.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Upsert records, last write per id wins
    async fn put(&self, records: Vec<MetadataRecord>) -> StorageResult<()>;

    /// Read every stored record
    async fn get_all(&self) -> StorageResult<Vec<MetadataRecord>>;

    /// Delete records by id; unknown ids are ignored
    async fn remove(&self, ids: Vec<EntryId>) -> StorageResult<()>;

    /// Store session pointers
    async fn put_session(&self, session: SessionRecord) -> StorageResult<()>;

    /// Read session pointers, `None` if never written
    async fn get_session(&self) -> StorageResult<Option<SessionRecord>>;

    /// Drop all records and session state
    async fn clear(&self) -> StorageResult<()>;

    /// Replace the whole record set
    ///
    /// The default is not atomic. Backends with transactions should override.
    async fn replace_all(&self, records: Vec<MetadataRecord>) -> StorageResult<()> {
        let existing = self.get_all().await?;
        let stale: Vec<EntryId> = {
            let keep: std::collections::HashSet<&EntryId> =
                records.iter().map(|r| &r.id).collect();
            existing
                .into_iter()
                .filter(|r| !keep.contains(&r.id))
                .map(|r| r.id)
                .collect()
        };
        if !stale.is_empty() {
            self.remove(stale).await?;
        }
        self.put(records).await
    }
}

/// Large, asynchronous store for image payloads keyed by entry id
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write one payload
    async fn put(&self, id: &EntryId, payload: Bytes) -> StorageResult<()>;

    /// Read one payload; `Ok(None)` if absent
    async fn get(&self, id: &EntryId) -> StorageResult<Option<Bytes>>;

    /// Delete one payload; deleting an absent id succeeds
    async fn delete(&self, id: &EntryId) -> StorageResult<()>;

    /// Drop every payload
    async fn clear(&self) -> StorageResult<()>;

    /// Write many payloads concurrently
    ///
    /// Each item succeeds or fails on its own; nothing is rolled back.
    async fn put_many(&self, items: Vec<(EntryId, Bytes)>) -> Vec<PutOutcome> {
        let writes = items.into_iter().map(|(id, payload)| async move {
            let result = self.put(&id, payload).await;
            PutOutcome { id, result }
        });
        join_all(writes).await
    }
}

/// Check a projected size against a quota
pub(crate) fn check_quota(needed: u64, quota: u64) -> StorageResult<()> {
    if needed > quota {
        Err(StorageError::QuotaExceeded { needed, quota })
    } else {
        Ok(())
    }
}
