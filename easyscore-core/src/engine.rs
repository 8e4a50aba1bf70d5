//! Library engine
//!
//! Owns the in-memory library and fans every mutation out to the two stores.
//! Each mutation is a single write-lock critical section; storage I/O always
//! happens after the lock is released. Storage failures degrade durability,
//! never the in-memory state, and are logged rather than returned (except for
//! `attach_image`, whose only effect is durable).
//!
//! Two counters guard against interleaving:
//! - `generation` moves on every bulk replace and on `clear`; a bulk job that
//!   finds it moved discards what it wrote
//! - `revision` moves on every change to the entry sequence; a pending import
//!   computed against an older revision is refused

use bytes::Bytes;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::blob_store::DiskBlobStore;
use crate::config::EngineConfig;
use crate::entry::{EntryId, EntryPatch, Library, ScoreEntry};
use crate::error::{EngineError, Result};
use crate::reconcile::{plan_import, ImportPlan, ReconciliationReport};
use crate::rehydrate::{rehydrate, Rehydrated, RehydrationReport};
use crate::snapshot::{self, suggested_file_name};
use crate::sqlite_store::SqliteMetadataStore;
use crate::storage::{BlobStore, MetadataStore};

/// File extensions accepted by `load_library`
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

const EVENT_CAPACITY: usize = 64;

/// A named image handed over by the host for bulk loading
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub name: String,
    pub bytes: Bytes,
}

impl ImageFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Whether the file name carries a supported image extension
    pub fn is_supported(&self) -> bool {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
    }
}

/// Change notification sent to subscribers after each mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryEvent {
    Replaced { revision: u64, entries: usize },
    Updated { revision: u64, id: EntryId },
    Removed { revision: u64, id: EntryId },
    Reordered { revision: u64 },
    Merged { revision: u64, matched: usize },
    Navigated { revision: u64, active_index: usize },
    PerformanceMode { revision: u64, enabled: bool },
    Cleared { revision: u64 },
}

/// Result of `export_snapshot`
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub document: String,
    /// Names of entries left out for lack of an image
    pub skipped: Vec<String>,
    pub file_name: String,
}

/// An import plan waiting for confirmation
#[derive(Debug, Clone)]
pub struct PendingImport {
    plan: ImportPlan,
    revision: u64,
}

impl PendingImport {
    pub fn plan(&self) -> &ImportPlan {
        &self.plan
    }

    /// Library revision the plan was computed against
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// What `apply_import` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportApplied {
    Replaced { entries: usize },
    Merged(ReconciliationReport),
}

struct State {
    library: Library,
    generation: u64,
    revision: u64,
}

/// Bookkeeping for one bulk replace in flight
struct BulkJob {
    generation: u64,
    images: Vec<(EntryId, Bytes)>,
    previous_ids: Vec<EntryId>,
}

pub struct LibraryEngine {
    state: RwLock<State>,
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    /// Serializes metadata writes
    write_gate: Mutex<()>,
    /// Serializes blob writes against the library state they were made for
    blob_gate: Mutex<()>,
    events: broadcast::Sender<LibraryEvent>,
    rehydration: RehydrationReport,
}

impl LibraryEngine {
    /// Rehydrate from the given stores and return a ready engine
    pub async fn start(metadata: Arc<dyn MetadataStore>, blobs: Arc<dyn BlobStore>) -> Self {
        let Rehydrated { library, report } = rehydrate(metadata.as_ref(), blobs.as_ref()).await;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(State {
                library,
                generation: 0,
                revision: 0,
            }),
            metadata,
            blobs,
            write_gate: Mutex::new(()),
            blob_gate: Mutex::new(()),
            events,
            rehydration: report,
        }
    }

    /// Open the SQLite and disk stores described by `config`
    pub async fn open(config: &EngineConfig) -> Result<Self> {
        let metadata =
            SqliteMetadataStore::open(&config.metadata_path(), config.metadata_quota_bytes)?;
        let blobs = DiskBlobStore::open(&config.blob_path())?;
        tracing::info!("Opening library in {:?}", config.data_dir);
        Ok(Self::start(Arc::new(metadata), Arc::new(blobs)).await)
    }

    /// Snapshot of the current library
    pub async fn library(&self) -> Library {
        self.state.read().await.library.clone()
    }

    pub async fn revision(&self) -> u64 {
        self.state.read().await.revision
    }

    pub fn rehydration_report(&self) -> &RehydrationReport {
        &self.rehydration
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: LibraryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // ==================== Bulk replace ====================

    /// Replace the library with images from a folder
    ///
    /// Unsupported and empty files are skipped. Entries are ordered by file
    /// name, case-insensitively.
    pub async fn load_library(
        &self,
        files: Vec<ImageFile>,
        source_label: impl Into<String>,
    ) -> Result<usize> {
        let mut files: Vec<ImageFile> = files
            .into_iter()
            .filter(|f| {
                if !f.is_supported() {
                    tracing::debug!("Skipping non-image file {}", f.name);
                    return false;
                }
                if f.bytes.is_empty() {
                    tracing::warn!("Skipping empty image file {}", f.name);
                    return false;
                }
                true
            })
            .collect();
        files.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name))
        });

        let entries: Vec<ScoreEntry> = files
            .into_iter()
            .map(|f| ScoreEntry::new(f.name, Some(f.bytes)))
            .collect();
        let count = entries.len();
        self.replace_library(entries, Some(source_label.into()), None)
            .await?;
        Ok(count)
    }

    /// Replace the library with caller-built entries
    pub async fn set_library(&self, entries: Vec<ScoreEntry>) -> Result<()> {
        self.replace_library(entries, None, None).await
    }

    async fn replace_library(
        &self,
        entries: Vec<ScoreEntry>,
        source_label: Option<String>,
        expected_revision: Option<u64>,
    ) -> Result<()> {
        Library::ensure_unique_ids(&entries)?;
        if let Some(entry) = entries
            .iter()
            .find(|e| e.image.as_ref().is_some_and(|img| img.is_empty()))
        {
            return Err(EngineError::validation(format!(
                "image for entry {} ({}) is empty",
                entry.id, entry.name
            )));
        }

        let (job, revision, len) = {
            let mut state = self.state.write().await;
            if let Some(expected) = expected_revision {
                if state.revision != expected {
                    return Err(stale_import());
                }
            }
            let previous_ids = state.library.ids();
            let images = entries
                .iter()
                .filter_map(|e| e.image.clone().map(|img| (e.id.clone(), img)))
                .collect();
            let len = entries.len();

            state.library.entries = entries;
            if source_label.is_some() {
                state.library.source_label = source_label;
            }
            state.library.active_index = 0;
            state.generation += 1;
            state.revision += 1;
            let job = BulkJob {
                generation: state.generation,
                images,
                previous_ids,
            };
            (job, state.revision, len)
        };

        tracing::info!("Library replaced with {} entries", len);
        self.emit(LibraryEvent::Replaced {
            revision,
            entries: len,
        });
        self.persist_bulk(job).await;
        Ok(())
    }

    /// Write the blobs of a bulk replace, then its metadata
    ///
    /// Blob writes hold `blob_gate`, so a newer job only writes after an
    /// older one has settled and its payloads always land last. A job that
    /// is already superseded when it gets the gate writes nothing.
    async fn persist_bulk(&self, job: BulkJob) {
        {
            let _blobs = self.blob_gate.lock().await;
            if self.state.read().await.generation != job.generation {
                tracing::debug!(
                    "Bulk write of generation {} superseded before it started",
                    job.generation
                );
                return;
            }

            let written: Vec<EntryId> = job.images.iter().map(|(id, _)| id.clone()).collect();
            let outcomes = self.blobs.put_many(job.images).await;
            for outcome in &outcomes {
                if let Err(e) = &outcome.result {
                    tracing::warn!("Failed to store image for {}: {}", outcome.id, e);
                }
            }

            // Entries removed or replaced while the writes were in flight.
            let (superseded, current) = {
                let state = self.state.read().await;
                let current: HashSet<EntryId> = state.library.ids().into_iter().collect();
                (state.generation != job.generation, current)
            };
            self.delete_blobs_not_in(&written, &current).await;
            if superseded {
                tracing::debug!(
                    "Bulk write of generation {} superseded, discarded its blobs",
                    job.generation
                );
                return;
            }
        }

        self.persist_library_metadata().await;

        let _blobs = self.blob_gate.lock().await;
        let current: HashSet<EntryId> = self.state.read().await.library.ids().into_iter().collect();
        self.delete_blobs_not_in(&job.previous_ids, &current).await;
    }

    async fn delete_blobs_not_in(&self, ids: &[EntryId], keep: &HashSet<EntryId>) {
        for id in ids.iter().filter(|id| !keep.contains(*id)) {
            if let Err(e) = self.blobs.delete(id).await {
                tracing::warn!("Failed to delete image for {}: {}", id, e);
            }
        }
    }

    // ==================== Incremental edits ====================

    /// Apply a partial update to one entry
    pub async fn update_entry(&self, id: &EntryId, patch: EntryPatch) -> Result<ScoreEntry> {
        let (updated, revision) = {
            let mut state = self.state.write().await;
            let entry = state
                .library
                .find_mut(id)
                .ok_or_else(|| EngineError::UnknownEntry(id.clone()))?;
            patch.apply_to(entry);
            let updated = entry.clone();
            state.revision += 1;
            (updated, state.revision)
        };

        tracing::debug!("Updated entry {}", id);
        self.emit(LibraryEvent::Updated {
            revision,
            id: id.clone(),
        });
        self.persist_records(std::slice::from_ref(id)).await;
        Ok(updated)
    }

    /// Store an image for an existing entry
    ///
    /// The write reaches the blob store before the entry is marked loaded,
    /// and a storage failure is returned.
    pub async fn attach_image(&self, id: &EntryId, image: Bytes) -> Result<()> {
        if image.is_empty() {
            return Err(EngineError::validation(format!(
                "image for entry {} is empty",
                id
            )));
        }
        if self.state.read().await.library.find(id).is_none() {
            return Err(EngineError::UnknownEntry(id.clone()));
        }

        let _blobs = self.blob_gate.lock().await;
        self.blobs.put(id, image.clone()).await?;

        let revision = {
            let mut state = self.state.write().await;
            match state.library.find_mut(id) {
                Some(entry) => {
                    entry.image = Some(image);
                    state.revision += 1;
                    Some(state.revision)
                }
                None => None,
            }
        };
        let Some(revision) = revision else {
            // Removed while the write was in flight.
            if let Err(e) = self.blobs.delete(id).await {
                tracing::warn!("Failed to delete image for {}: {}", id, e);
            }
            return Err(EngineError::UnknownEntry(id.clone()));
        };

        self.emit(LibraryEvent::Updated {
            revision,
            id: id.clone(),
        });
        Ok(())
    }

    /// Remove one entry and its image
    pub async fn remove_entry(&self, id: &EntryId) -> Result<ScoreEntry> {
        let (removed, revision) = {
            let mut state = self.state.write().await;
            let position = state
                .library
                .position_of(id)
                .ok_or_else(|| EngineError::UnknownEntry(id.clone()))?;
            let removed = state.library.entries.remove(position);
            state.library.clamp_active_index();
            state.revision += 1;
            (removed, state.revision)
        };

        tracing::debug!("Removed entry {}", id);
        self.emit(LibraryEvent::Removed {
            revision,
            id: id.clone(),
        });

        {
            let _gate = self.write_gate.lock().await;
            if let Err(e) = self.metadata.remove(vec![id.clone()]).await {
                tracing::warn!("Failed to remove metadata for {}: {}", id, e);
            }
            let session = self.state.read().await.library.session();
            if let Err(e) = self.metadata.put_session(session).await {
                tracing::warn!("Failed to persist session: {}", e);
            }
        }
        let _blobs = self.blob_gate.lock().await;
        if let Err(e) = self.blobs.delete(id).await {
            tracing::warn!("Failed to delete image for {}: {}", id, e);
        }
        Ok(removed)
    }

    /// Reorder the library to exactly the given id sequence
    pub async fn reorder(&self, order: Vec<EntryId>) -> Result<()> {
        let revision = {
            let mut state = self.state.write().await;
            let library = &mut state.library;
            if order.len() != library.len() {
                return Err(EngineError::validation(format!(
                    "reorder lists {} ids, library has {}",
                    order.len(),
                    library.len()
                )));
            }
            let positions = {
                let index: HashMap<&EntryId, usize> = library
                    .entries
                    .iter()
                    .enumerate()
                    .map(|(i, e)| (&e.id, i))
                    .collect();
                let mut positions = Vec::with_capacity(order.len());
                let mut seen = HashSet::with_capacity(order.len());
                for id in &order {
                    let Some(&position) = index.get(id) else {
                        return Err(EngineError::validation(format!(
                            "reorder names unknown id {}",
                            id
                        )));
                    };
                    if !seen.insert(position) {
                        return Err(EngineError::validation(format!(
                            "reorder names id {} twice",
                            id
                        )));
                    }
                    positions.push(position);
                }
                positions
            };

            let mut slots: Vec<Option<ScoreEntry>> =
                std::mem::take(&mut library.entries).into_iter().map(Some).collect();
            library.entries = positions
                .into_iter()
                .filter_map(|p| slots[p].take())
                .collect();
            state.revision += 1;
            state.revision
        };

        self.emit(LibraryEvent::Reordered { revision });
        self.persist_library_metadata().await;
        Ok(())
    }

    /// Move the entry at `from` so that it ends up at `to`
    pub async fn move_entry(&self, from: usize, to: usize) -> Result<()> {
        let revision = {
            let mut state = self.state.write().await;
            let len = state.library.len();
            if from >= len || to >= len {
                return Err(EngineError::validation(format!(
                    "move {} -> {} out of range for {} entries",
                    from, to, len
                )));
            }
            let entry = state.library.entries.remove(from);
            state.library.entries.insert(to, entry);
            state.revision += 1;
            state.revision
        };

        self.emit(LibraryEvent::Reordered { revision });
        self.persist_library_metadata().await;
        Ok(())
    }

    /// Drop every entry and wipe both stores
    pub async fn clear(&self) {
        let revision = {
            let mut state = self.state.write().await;
            state.library = Library::new();
            state.generation += 1;
            state.revision += 1;
            state.revision
        };

        tracing::info!("Library cleared");
        self.emit(LibraryEvent::Cleared { revision });

        let _gate = self.write_gate.lock().await;
        if let Err(e) = self.metadata.clear().await {
            tracing::warn!("Failed to clear metadata store: {}", e);
        }
        let _blobs = self.blob_gate.lock().await;
        if let Err(e) = self.blobs.clear().await {
            tracing::warn!("Failed to clear blob store: {}", e);
        }
    }

    // ==================== Session ====================

    /// Point the session at entry `index`
    pub async fn set_active_index(&self, index: usize) -> Result<usize> {
        {
            let mut state = self.state.write().await;
            let len = state.library.len();
            if index >= len && !(len == 0 && index == 0) {
                return Err(EngineError::validation(format!(
                    "index {} out of range for {} entries",
                    index, len
                )));
            }
            state.library.active_index = index;
        }
        Ok(self.navigated().await)
    }

    /// Advance to the next entry, staying put at the end
    pub async fn next(&self) -> usize {
        {
            let mut state = self.state.write().await;
            if state.library.active_index + 1 < state.library.len() {
                state.library.active_index += 1;
            }
        }
        self.navigated().await
    }

    /// Step back to the previous entry, staying put at the start
    pub async fn previous(&self) -> usize {
        {
            let mut state = self.state.write().await;
            state.library.active_index = state.library.active_index.saturating_sub(1);
        }
        self.navigated().await
    }

    async fn navigated(&self) -> usize {
        let (revision, active_index) = {
            let state = self.state.read().await;
            (state.revision, state.library.active_index)
        };
        self.emit(LibraryEvent::Navigated {
            revision,
            active_index,
        });
        self.persist_session().await;
        active_index
    }

    /// Toggle performance mode; never persisted
    pub async fn set_performance_mode(&self, enabled: bool) {
        let revision = {
            let mut state = self.state.write().await;
            state.library.performance_mode = enabled;
            state.revision
        };
        self.emit(LibraryEvent::PerformanceMode { revision, enabled });
    }

    // ==================== Snapshots ====================

    /// Encode the current library as a self-contained snapshot
    pub async fn export_snapshot(&self) -> Result<ExportOutcome> {
        let library = self.library().await;
        let now = Utc::now();
        let encoded = snapshot::encode(&library, now)?;
        if !encoded.skipped.is_empty() {
            tracing::warn!(
                "Export skipped {} entries without an image: {}",
                encoded.skipped.len(),
                encoded.skipped.join(", ")
            );
        }
        Ok(ExportOutcome {
            document: encoded.json,
            skipped: encoded.skipped,
            file_name: suggested_file_name(now),
        })
    }

    /// Decode a snapshot and plan its import without applying anything
    pub async fn import_snapshot(&self, bytes: &[u8]) -> Result<PendingImport> {
        let decoded = snapshot::decode(bytes)?;
        let state = self.state.read().await;
        let plan = plan_import(&state.library, decoded)?;
        Ok(PendingImport {
            plan,
            revision: state.revision,
        })
    }

    /// Apply a confirmed import plan
    ///
    /// Fails without changing anything if the library moved on since the
    /// plan was computed.
    pub async fn apply_import(&self, pending: PendingImport) -> Result<ImportApplied> {
        match pending.plan {
            ImportPlan::Replace { entries, .. } => {
                let count = entries.len();
                self.replace_library(entries, None, Some(pending.revision))
                    .await?;
                Ok(ImportApplied::Replaced { entries: count })
            }
            ImportPlan::Merge { entries, report } => {
                let revision = {
                    let mut state = self.state.write().await;
                    if state.revision != pending.revision {
                        return Err(stale_import());
                    }
                    state.library.entries = entries;
                    state.library.clamp_active_index();
                    state.revision += 1;
                    state.revision
                };

                tracing::info!(
                    "Merged legacy metadata: {} of {} matched",
                    report.matched,
                    report.total
                );
                self.emit(LibraryEvent::Merged {
                    revision,
                    matched: report.matched,
                });
                self.persist_library_metadata().await;
                Ok(ImportApplied::Merged(report))
            }
        }
    }

    // ==================== Metadata persistence ====================

    /// Rewrite every record with its current rank, plus the session
    async fn persist_library_metadata(&self) {
        let _gate = self.write_gate.lock().await;
        let (records, session) = {
            let state = self.state.read().await;
            (state.library.records(), state.library.session())
        };
        if let Err(e) = self.metadata.replace_all(records).await {
            tracing::warn!("Failed to persist library metadata: {}", e);
        }
        if let Err(e) = self.metadata.put_session(session).await {
            tracing::warn!("Failed to persist session: {}", e);
        }
    }

    /// Upsert the current records of the given ids
    async fn persist_records(&self, ids: &[EntryId]) {
        let _gate = self.write_gate.lock().await;
        let records = {
            let state = self.state.read().await;
            ids.iter()
                .filter_map(|id| {
                    let rank = state.library.position_of(id)?;
                    state.library.find(id).map(|e| e.record(rank as u32))
                })
                .collect::<Vec<_>>()
        };
        if records.is_empty() {
            return;
        }
        if let Err(e) = self.metadata.put(records).await {
            tracing::warn!("Failed to persist entry metadata: {}", e);
        }
    }

    async fn persist_session(&self) {
        let _gate = self.write_gate.lock().await;
        let session = self.state.read().await.library.session();
        if let Err(e) = self.metadata.put_session(session).await {
            tracing::warn!("Failed to persist session: {}", e);
        }
    }
}

fn stale_import() -> EngineError {
    EngineError::precondition("library changed since the import was planned; plan it again")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::{MemoryBlobStore, MemoryMetadataStore};

    struct Harness {
        meta: Arc<MemoryMetadataStore>,
        blobs: Arc<MemoryBlobStore>,
        engine: LibraryEngine,
    }

    async fn harness() -> Harness {
        let meta = Arc::new(MemoryMetadataStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let engine = LibraryEngine::start(meta.clone(), blobs.clone()).await;
        Harness {
            meta,
            blobs,
            engine,
        }
    }

    fn files(names: &[&str]) -> Vec<ImageFile> {
        names
            .iter()
            .map(|n| ImageFile::new(*n, n.as_bytes().to_vec()))
            .collect()
    }

    fn names(library: &Library) -> Vec<String> {
        library.entries.iter().map(|e| e.name.clone()).collect()
    }

    #[tokio::test]
    async fn test_load_filters_and_sorts() {
        let h = harness().await;
        let n = h
            .engine
            .load_library(
                files(&["b.PNG", "notes.txt", "A.jpg", "c.webp", "d.gif"]),
                "Recital",
            )
            .await
            .unwrap();
        assert_eq!(n, 3);

        let lib = h.engine.library().await;
        assert_eq!(names(&lib), vec!["A.jpg", "b.PNG", "c.webp"]);
        assert_eq!(lib.source_label.as_deref(), Some("Recital"));
        assert!(lib.entries.iter().all(|e| e.bpm.get() == 120 && e.zoom.get() == 100));
        assert_eq!(h.meta.len().await, 3);
        assert_eq!(h.blobs.len().await, 3);
    }

    #[tokio::test]
    async fn test_bulk_replace_deletes_orphaned_blobs() {
        let h = harness().await;
        h.engine.load_library(files(&["a.png"]), "one").await.unwrap();
        let old = h.engine.library().await.entries[0].id.clone();

        h.engine.load_library(files(&["b.png"]), "two").await.unwrap();
        assert!(!h.blobs.contains(&old).await);
        assert!(h.meta.record(&old).await.is_none());
        assert_eq!(h.blobs.len().await, 1);
    }

    #[tokio::test]
    async fn test_set_library_rejects_duplicate_ids() {
        let h = harness().await;
        let a = ScoreEntry::new("a", None);
        let mut b = ScoreEntry::new("b", None);
        b.id = a.id.clone();
        let err = h.engine.set_library(vec![a, b]).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(h.engine.library().await.is_empty());
    }

    #[tokio::test]
    async fn test_set_library_rejects_empty_image() {
        let h = harness().await;
        h.engine.load_library(files(&["keep.png"]), "x").await.unwrap();
        let before = h.engine.library().await;

        let err = h
            .engine
            .set_library(vec![
                ScoreEntry::new("fine", Some(Bytes::from_static(b"img"))),
                ScoreEntry::new("blank", Some(Bytes::new())),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(ref m) if m.contains("blank")));
        assert_eq!(h.engine.library().await, before);
        assert_eq!(h.blobs.len().await, 1);
        assert_eq!(h.meta.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_entry_clamps_and_persists() {
        let h = harness().await;
        h.engine.load_library(files(&["a.png"]), "x").await.unwrap();
        let id = h.engine.library().await.entries[0].id.clone();

        let updated = h
            .engine
            .update_entry(&id, EntryPatch::bpm(500))
            .await
            .unwrap();
        assert_eq!(updated.bpm.get(), 300);
        assert_eq!(h.meta.record(&id).await.unwrap().bpm, 300);
    }

    #[tokio::test]
    async fn test_unknown_id_is_reported() {
        let h = harness().await;
        let ghost = EntryId::from("ghost");
        assert!(matches!(
            h.engine.update_entry(&ghost, EntryPatch::zoom(50)).await,
            Err(EngineError::UnknownEntry(_))
        ));
        assert!(matches!(
            h.engine.remove_entry(&ghost).await,
            Err(EngineError::UnknownEntry(_))
        ));
        assert!(matches!(
            h.engine.attach_image(&ghost, Bytes::from_static(b"x")).await,
            Err(EngineError::UnknownEntry(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_clamps_active_index() {
        let h = harness().await;
        h.engine
            .load_library(files(&["a.png", "b.png"]), "x")
            .await
            .unwrap();
        h.engine.set_active_index(1).await.unwrap();
        let last = h.engine.library().await.entries[1].id.clone();

        h.engine.remove_entry(&last).await.unwrap();
        let lib = h.engine.library().await;
        assert_eq!(lib.active_index, 0);
        assert!(!h.blobs.contains(&last).await);
        assert_eq!(h.meta.len().await, 1);
    }

    #[tokio::test]
    async fn test_reorder_requires_permutation() {
        let h = harness().await;
        h.engine
            .load_library(files(&["a.png", "b.png", "c.png"]), "x")
            .await
            .unwrap();
        let ids = h.engine.library().await.ids();

        let err = h
            .engine
            .reorder(vec![ids[0].clone(), ids[0].clone(), ids[1].clone()])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        let err = h.engine.reorder(vec![ids[0].clone()]).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        h.engine
            .reorder(vec![ids[2].clone(), ids[0].clone(), ids[1].clone()])
            .await
            .unwrap();
        assert_eq!(names(&h.engine.library().await), vec!["c.png", "a.png", "b.png"]);
        assert_eq!(h.meta.record(&ids[2]).await.unwrap().rank, 0);
    }

    #[tokio::test]
    async fn test_move_entry() {
        let h = harness().await;
        h.engine
            .load_library(files(&["a.png", "b.png", "c.png"]), "x")
            .await
            .unwrap();
        h.engine.move_entry(0, 2).await.unwrap();
        assert_eq!(names(&h.engine.library().await), vec!["b.png", "c.png", "a.png"]);
        assert!(h.engine.move_entry(0, 3).await.is_err());
    }

    #[tokio::test]
    async fn test_navigation_stays_in_bounds() {
        let h = harness().await;
        assert_eq!(h.engine.next().await, 0);
        h.engine
            .load_library(files(&["a.png", "b.png"]), "x")
            .await
            .unwrap();
        assert_eq!(h.engine.previous().await, 0);
        assert_eq!(h.engine.next().await, 1);
        assert_eq!(h.engine.next().await, 1);
        assert!(h.engine.set_active_index(2).await.is_err());

        h.engine.set_performance_mode(true).await;
        assert!(h.engine.library().await.performance_mode);
    }

    #[tokio::test]
    async fn test_attach_image_surfaces_storage_errors() {
        let h = harness().await;
        h.engine
            .set_library(vec![ScoreEntry::new("meta only", None)])
            .await
            .unwrap();
        let id = h.engine.library().await.entries[0].id.clone();

        h.blobs.set_fail_all(true);
        let err = h
            .engine
            .attach_image(&id, Bytes::from_static(b"img"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
        assert!(!h.engine.library().await.entries[0].is_loaded());

        h.blobs.set_fail_all(false);
        h.engine
            .attach_image(&id, Bytes::from_static(b"img"))
            .await
            .unwrap();
        assert!(h.engine.library().await.entries[0].is_loaded());
        assert!(h.blobs.contains(&id).await);
    }

    #[tokio::test]
    async fn test_storage_failures_keep_memory_state() {
        let h = harness().await;
        h.meta.set_fail_writes(true);
        h.blobs.set_fail_all(true);
        h.engine
            .load_library(files(&["a.png", "b.png"]), "x")
            .await
            .unwrap();
        assert_eq!(h.engine.library().await.len(), 2);
        assert!(h.meta.is_empty().await);
    }

    #[tokio::test]
    async fn test_clear_wipes_everything() {
        let h = harness().await;
        h.engine.load_library(files(&["a.png"]), "x").await.unwrap();
        h.engine.clear().await;
        assert!(h.engine.library().await.is_empty());
        assert!(h.meta.is_empty().await);
        assert!(h.blobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let h = harness().await;
        let mut rx = h.engine.subscribe();
        h.engine.load_library(files(&["a.png"]), "x").await.unwrap();
        h.engine.clear().await;

        assert_eq!(
            rx.recv().await.unwrap(),
            LibraryEvent::Replaced {
                revision: 1,
                entries: 1
            }
        );
        assert_eq!(rx.recv().await.unwrap(), LibraryEvent::Cleared { revision: 2 });
    }

    #[tokio::test]
    async fn test_stale_pending_import_is_refused() {
        let h = harness().await;
        h.engine
            .load_library(files(&["Nocturne.png"]), "x")
            .await
            .unwrap();
        let doc = br#"{"version":"1.0","scores":[{"name":"nocturne.png","bpm":60}]}"#;
        let pending = h.engine.import_snapshot(doc).await.unwrap();

        let id = h.engine.library().await.entries[0].id.clone();
        h.engine.update_entry(&id, EntryPatch::zoom(200)).await.unwrap();

        let err = h.engine.apply_import(pending).await.unwrap_err();
        assert!(matches!(err, EngineError::Precondition(_)));
        assert_eq!(h.engine.library().await.entries[0].bpm.get(), 120);
    }

    #[tokio::test]
    async fn test_export_reports_skipped_entries() {
        let h = harness().await;
        h.engine
            .set_library(vec![
                ScoreEntry::new("with", Some(Bytes::from_static(b"img"))),
                ScoreEntry::new("without", None),
            ])
            .await
            .unwrap();
        let out = h.engine.export_snapshot().await.unwrap();
        assert_eq!(out.skipped, vec!["without".to_string()]);
        assert!(out.file_name.starts_with("easyscore-config-"));
        assert!(out.file_name.ends_with(".json"));
    }
}
