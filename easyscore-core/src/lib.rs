//! EasyScore Core Library
//!
//! Persistence and reconciliation engine for an ordered library of score
//! images:
//! - Entity model (ScoreEntry, Library, Bpm, Zoom)
//! - Two-tier storage abstraction (metadata store, blob store)
//! - SQLite metadata store (WAL mode) and disk blob store
//! - In-memory stores with failure injection
//! - Startup rehydration
//! - Snapshot codec and import reconciliation
//! - Library engine with change notifications

pub mod blob_store;
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod memory_store;
pub mod reconcile;
pub mod rehydrate;
pub mod snapshot;
pub mod sqlite_store;
pub mod storage;

pub use blob_store::DiskBlobStore;
pub use config::EngineConfig;
pub use engine::{
    ExportOutcome, ImageFile, ImportApplied, LibraryEngine, LibraryEvent, PendingImport,
    IMAGE_EXTENSIONS,
};
pub use entry::{Bpm, EntryId, EntryPatch, Library, ScoreEntry, Zoom};
pub use error::{EngineError, Result, StorageError, StorageResult};
pub use memory_store::{MemoryBlobStore, MemoryMetadataStore};
pub use reconcile::{plan_import, ImportPlan, ReconciliationReport, ReplaceSummary};
pub use rehydrate::{rehydrate, Rehydrated, RehydrationReport};
pub use snapshot::{DecodedSnapshot, Encoded, CURRENT_VERSION};
pub use sqlite_store::SqliteMetadataStore;
pub use storage::{BlobStore, MetadataRecord, MetadataStore, PutOutcome, SessionRecord};
