//! Startup rehydration
//!
//! Rebuilds the in-memory library from both tiers. The metadata store decides
//! which entries exist and in what order; the blob store only decorates them
//! with images. Any failure degrades the result instead of aborting.

use futures::future::join_all;

use crate::entry::{Bpm, Library, ScoreEntry, Zoom};
use crate::storage::{BlobStore, MetadataRecord, MetadataStore};

/// Outcome counters of one rehydration pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RehydrationReport {
    /// Whether the metadata read succeeded
    pub metadata_available: bool,
    pub entries: usize,
    pub with_image: usize,
    pub missing_image: usize,
    /// Blob reads that failed rather than returned absent
    pub blob_failures: usize,
}

#[derive(Debug, Clone)]
pub struct Rehydrated {
    pub library: Library,
    pub report: RehydrationReport,
}

/// Rebuild a library from a metadata store and a blob store
pub async fn rehydrate(metadata: &dyn MetadataStore, blobs: &dyn BlobStore) -> Rehydrated {
    let mut report = RehydrationReport::default();

    let mut records = match metadata.get_all().await {
        Ok(records) => {
            report.metadata_available = true;
            records
        }
        Err(e) => {
            tracing::warn!("Metadata store unreadable, starting with an empty library: {}", e);
            return Rehydrated {
                library: Library::new(),
                report,
            };
        }
    };
    records.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.id.cmp(&b.id)));

    let fetches = records.iter().map(|r| blobs.get(&r.id));
    let images = join_all(fetches).await;

    let mut entries = Vec::with_capacity(records.len());
    for (record, image) in records.into_iter().zip(images) {
        let image = match image {
            Ok(Some(bytes)) => {
                report.with_image += 1;
                Some(bytes)
            }
            Ok(None) => {
                report.missing_image += 1;
                None
            }
            Err(e) => {
                tracing::debug!("Blob read failed for {}: {}", record.id, e);
                report.blob_failures += 1;
                report.missing_image += 1;
                None
            }
        };
        entries.push(entry_from_record(record, image));
    }
    report.entries = entries.len();

    let mut library = Library::with_entries(entries);
    match metadata.get_session().await {
        Ok(Some(session)) => {
            library.source_label = session.source_label;
            library.active_index = usize::try_from(session.active_index).unwrap_or(usize::MAX);
        }
        Ok(None) => {}
        Err(e) => tracing::warn!("Session state unreadable, using defaults: {}", e),
    }
    library.clamp_active_index();

    if report.blob_failures > 0 {
        tracing::warn!(
            "Rehydrated {} entries, {} blob reads failed",
            report.entries,
            report.blob_failures
        );
    } else {
        tracing::info!(
            "Rehydrated {} entries ({} with images)",
            report.entries,
            report.with_image
        );
    }

    Rehydrated { library, report }
}

fn entry_from_record(record: MetadataRecord, image: Option<bytes::Bytes>) -> ScoreEntry {
    let zoom = record.zoom.map(Zoom::clamped).unwrap_or_default();
    ScoreEntry::from_parts(record.id, record.name, Bpm::clamped(record.bpm), zoom, image)
}
