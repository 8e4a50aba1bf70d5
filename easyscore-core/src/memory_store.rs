//! In-memory store backends
//!
//! HashMap-based implementations of both storage tiers for tests and
//! embedding. Both support failure injection so degraded paths can be
//! exercised without a real disk.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{watch, RwLock};

use crate::entry::EntryId;
use crate::error::{StorageError, StorageResult};
use crate::storage::{check_quota, BlobStore, MetadataRecord, MetadataStore, SessionRecord};

/// In-memory metadata store with a byte quota
pub struct MemoryMetadataStore {
    records: RwLock<HashMap<EntryId, MetadataRecord>>,
    session: RwLock<Option<SessionRecord>>,
    quota_bytes: u64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::with_quota(u64::MAX)
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            session: RwLock::new(None),
            quota_bytes,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every read fail until reset
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every write fail until reset
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn record(&self, id: &EntryId) -> Option<MetadataRecord> {
        self.records.read().await.get(id).cloned()
    }

    fn check_reads(&self) -> StorageResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("metadata reads disabled".to_string()));
        }
        Ok(())
    }

    fn check_writes(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("metadata writes disabled".to_string()));
        }
        Ok(())
    }

    fn projected_size(map: &HashMap<EntryId, MetadataRecord>) -> u64 {
        map.values().map(MetadataRecord::estimated_size).sum()
    }
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn put(&self, records: Vec<MetadataRecord>) -> StorageResult<()> {
        self.check_writes()?;
        let mut map = self.records.write().await;
        let mut next = map.clone();
        for record in records {
            next.insert(record.id.clone(), record);
        }
        check_quota(Self::projected_size(&next), self.quota_bytes)?;
        *map = next;
        Ok(())
    }

    async fn get_all(&self) -> StorageResult<Vec<MetadataRecord>> {
        self.check_reads()?;
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn remove(&self, ids: Vec<EntryId>) -> StorageResult<()> {
        self.check_writes()?;
        let mut map = self.records.write().await;
        for id in &ids {
            map.remove(id);
        }
        Ok(())
    }

    async fn put_session(&self, session: SessionRecord) -> StorageResult<()> {
        self.check_writes()?;
        *self.session.write().await = Some(session);
        Ok(())
    }

    async fn get_session(&self) -> StorageResult<Option<SessionRecord>> {
        self.check_reads()?;
        Ok(self.session.read().await.clone())
    }

    async fn clear(&self) -> StorageResult<()> {
        self.check_writes()?;
        self.records.write().await.clear();
        *self.session.write().await = None;
        Ok(())
    }

    async fn replace_all(&self, records: Vec<MetadataRecord>) -> StorageResult<()> {
        self.check_writes()?;
        let next: HashMap<EntryId, MetadataRecord> =
            records.into_iter().map(|r| (r.id.clone(), r)).collect();
        check_quota(Self::projected_size(&next), self.quota_bytes)?;
        *self.records.write().await = next;
        Ok(())
    }
}

/// In-memory blob store
///
/// Writes can be paused to hold them in flight, which lets tests interleave
/// concurrent operations deterministically.
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<EntryId, Bytes>>,
    fail_all: AtomicBool,
    failing_ids: RwLock<HashSet<EntryId>>,
    paused: watch::Sender<bool>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            blobs: RwLock::new(HashMap::new()),
            fail_all: AtomicBool::new(false),
            failing_ids: RwLock::new(HashSet::new()),
            paused,
        }
    }

    /// Make every operation fail until reset
    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Make operations on a single id fail
    pub async fn fail_id(&self, id: &EntryId) {
        self.failing_ids.write().await.insert(id.clone());
    }

    /// Hold all subsequent writes until `resume_writes`
    pub fn pause_writes(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume_writes(&self) {
        self.paused.send_replace(false);
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    pub async fn contains(&self, id: &EntryId) -> bool {
        self.blobs.read().await.contains_key(id)
    }

    async fn check(&self, id: Option<&EntryId>) -> StorageResult<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("blob store disabled".to_string()));
        }
        if let Some(id) = id {
            if self.failing_ids.read().await.contains(id) {
                return Err(StorageError::Backend(format!("injected failure for {}", id)));
            }
        }
        Ok(())
    }

    async fn wait_until_resumed(&self) {
        let mut rx = self.paused.subscribe();
        // A closed channel cannot happen while `self` is alive.
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, id: &EntryId, payload: Bytes) -> StorageResult<()> {
        self.wait_until_resumed().await;
        self.check(Some(id)).await?;
        self.blobs.write().await.insert(id.clone(), payload);
        Ok(())
    }

    async fn get(&self, id: &EntryId) -> StorageResult<Option<Bytes>> {
        self.check(Some(id)).await?;
        Ok(self.blobs.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &EntryId) -> StorageResult<()> {
        self.check(Some(id)).await?;
        self.blobs.write().await.remove(id);
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        self.check(None).await?;
        self.blobs.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PutOutcome;

    fn record(id: &str, rank: u32) -> MetadataRecord {
        MetadataRecord {
            id: EntryId::from(id),
            name: format!("score {}", id),
            bpm: 120,
            zoom: Some(100),
            rank,
        }
    }

    #[tokio::test]
    async fn test_metadata_put_is_last_write_wins() {
        let store = MemoryMetadataStore::new();
        store.put(vec![record("a", 0)]).await.unwrap();
        let mut updated = record("a", 3);
        updated.bpm = 90;
        store.put(vec![updated]).await.unwrap();

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].bpm, 90);
        assert_eq!(all[0].rank, 3);
    }

    #[tokio::test]
    async fn test_metadata_quota_rejects_without_partial_write() {
        let store = MemoryMetadataStore::with_quota(40);
        store.put(vec![record("a", 0)]).await.unwrap();
        let err = store
            .put(vec![record("b", 1), record("c", 2)])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { .. }));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_metadata_replace_all_drops_missing_ids() {
        let store = MemoryMetadataStore::new();
        store.put(vec![record("a", 0), record("b", 1)]).await.unwrap();
        store.replace_all(vec![record("b", 0)]).await.unwrap();
        assert!(store.record(&EntryId::from("a")).await.is_none());
        assert_eq!(store.record(&EntryId::from("b")).await.unwrap().rank, 0);
    }

    #[tokio::test]
    async fn test_metadata_failure_injection() {
        let store = MemoryMetadataStore::new();
        store.set_fail_reads(true);
        assert!(store.get_all().await.is_err());
        store.set_fail_reads(false);
        store.set_fail_writes(true);
        assert!(store.put(vec![record("a", 0)]).await.is_err());
    }

    #[tokio::test]
    async fn test_blob_absent_is_not_an_error() {
        let store = MemoryBlobStore::new();
        assert!(store.get(&EntryId::from("missing")).await.unwrap().is_none());
        store.delete(&EntryId::from("missing")).await.unwrap();
    }

    #[tokio::test]
    async fn test_put_many_failures_are_independent() {
        let store = MemoryBlobStore::new();
        store.fail_id(&EntryId::from("b")).await;

        let outcomes = store
            .put_many(vec![
                (EntryId::from("a"), Bytes::from_static(b"aa")),
                (EntryId::from("b"), Bytes::from_static(b"bb")),
                (EntryId::from("c"), Bytes::from_static(b"cc")),
            ])
            .await;

        let ok: Vec<bool> = outcomes.iter().map(PutOutcome::is_ok).collect();
        assert_eq!(ok, vec![true, false, true]);
        assert!(store.contains(&EntryId::from("a")).await);
        assert!(!store.contains(&EntryId::from("b")).await);
        assert!(store.contains(&EntryId::from("c")).await);
    }
}
