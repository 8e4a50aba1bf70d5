//! Disk-backed blob store
//!
//! One file per entry id. Ids are opaque strings, so file names are derived
//! from `sha256(id)` and sharded by the first two hex characters. Writes land
//! in a temporary file first and are renamed into place. Every write gets
//! its own temporary name so concurrent puts of one id never share a file.

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::entry::EntryId;
use crate::error::StorageResult;
use crate::storage::BlobStore;

/// Blob store rooted at a directory
pub struct DiskBlobStore {
    root: PathBuf,
    tmp_seq: AtomicU64,
}

impl DiskBlobStore {
    /// Open or create the store directory
    pub fn open(root: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(root)?;
        tracing::debug!("Opened blob store at {:?}", root);
        Ok(Self {
            root: root.to_path_buf(),
            tmp_seq: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn id_hash(id: &EntryId) -> String {
        hex::encode(Sha256::digest(id.as_str().as_bytes()))
    }

    fn blob_path(&self, id: &EntryId) -> PathBuf {
        let hash = Self::id_hash(id);
        self.root.join(&hash[..2]).join(&hash[2..])
    }
}

#[async_trait]
impl BlobStore for DiskBlobStore {
    async fn put(&self, id: &EntryId, payload: Bytes) -> StorageResult<()> {
        let path = self.blob_path(id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{}.{}.tmp", std::process::id(), seq));
        tokio::fs::write(&tmp, &payload).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn get(&self, id: &EntryId) -> StorageResult<Option<Bytes>> {
        match tokio::fs::read(self.blob_path(id)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: &EntryId) -> StorageResult<()> {
        match tokio::fs::remove_file(self.blob_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> StorageResult<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_blob_put_get() {
        let dir = TempDir::new().unwrap();
        let store = DiskBlobStore::open(dir.path()).unwrap();
        let id = EntryId::from("1700000000000-0");
        let data = Bytes::from_static(b"\x89PNG\r\n\x1a\nsheet");
        store.put(&id, data.clone()).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), Some(data));
    }

    #[tokio::test]
    async fn test_blob_get_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = DiskBlobStore::open(dir.path()).unwrap();
        assert!(store.get(&EntryId::from("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blob_ids_with_path_characters() {
        let dir = TempDir::new().unwrap();
        let store = DiskBlobStore::open(&dir.path().join("blobs")).unwrap();
        let id = EntryId::from("../../etc/passwd");
        store.put(&id, Bytes::from_static(b"x")).await.unwrap();
        assert!(store.blob_path(&id).starts_with(store.root()));
        assert_eq!(store.get(&id).await.unwrap().unwrap().as_ref(), b"x");
    }

    #[tokio::test]
    async fn test_blob_delete_and_clear() {
        let dir = TempDir::new().unwrap();
        let store = DiskBlobStore::open(dir.path()).unwrap();
        let a = EntryId::from("a");
        let b = EntryId::from("b");
        store.put(&a, Bytes::from_static(b"a")).await.unwrap();
        store.put(&b, Bytes::from_static(b"b")).await.unwrap();

        store.delete(&a).await.unwrap();
        store.delete(&a).await.unwrap();
        assert!(store.get(&a).await.unwrap().is_none());

        store.clear().await.unwrap();
        assert!(store.get(&b).await.unwrap().is_none());
        store.put(&a, Bytes::from_static(b"again")).await.unwrap();
        assert!(store.get(&a).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_blob_persistence() {
        let dir = TempDir::new().unwrap();
        let id = EntryId::from("persist");
        {
            let store = DiskBlobStore::open(dir.path()).unwrap();
            store.put(&id, Bytes::from_static(b"kept")).await.unwrap();
        }
        let store = DiskBlobStore::open(dir.path()).unwrap();
        assert_eq!(store.get(&id).await.unwrap().unwrap().as_ref(), b"kept");
    }

    #[tokio::test]
    async fn test_blob_concurrent_puts_of_one_id() {
        let dir = TempDir::new().unwrap();
        let store = DiskBlobStore::open(dir.path()).unwrap();
        let id = EntryId::from("contended");
        let items: Vec<(EntryId, Bytes)> = (0..16u8)
            .map(|i| (id.clone(), Bytes::from(vec![i; 64 * 1024])))
            .collect();
        let outcomes = store.put_many(items).await;
        assert!(outcomes.iter().all(|o| o.is_ok()));

        let got = store.get(&id).await.unwrap().unwrap();
        assert_eq!(got.len(), 64 * 1024);
        assert!(got.iter().all(|b| *b == got[0]));

        let shard = store.blob_path(&id).parent().unwrap().to_path_buf();
        let leftovers: Vec<_> = std::fs::read_dir(shard)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_blob_put_many() {
        let dir = TempDir::new().unwrap();
        let store = DiskBlobStore::open(dir.path()).unwrap();
        let items: Vec<(EntryId, Bytes)> = (0..20)
            .map(|i| (EntryId::new(format!("id-{}", i)), Bytes::from(vec![i as u8; 64])))
            .collect();
        let outcomes = store.put_many(items).await;
        assert!(outcomes.iter().all(|o| o.is_ok()));
        let got = store.get(&EntryId::from("id-7")).await.unwrap().unwrap();
        assert_eq!(got.as_ref(), &[7u8; 64][..]);
    }
}
