//! Import reconciliation
//!
//! Turns a decoded snapshot into an inert plan against the current library.
//! Self-contained snapshots replace the library outright. Legacy snapshots
//! carry no images, so their records are matched by case-insensitive name
//! onto entries that already exist and only tempo/zoom are merged in.

use std::collections::{HashMap, HashSet};

use crate::entry::{Bpm, EntryId, Library, ScoreEntry, Zoom};
use crate::error::{EngineError, Result};
use crate::snapshot::{DecodedSnapshot, ImportedScore, LegacyRecord};

/// Outcome of a legacy merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    /// Import records that found an entry
    pub matched: usize,
    /// Import records considered
    pub total: usize,
    /// Names of import records with no matching entry
    pub unmatched: Vec<String>,
}

/// What a replacement import would do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceSummary {
    pub incoming: usize,
    pub current: usize,
}

/// A computed, not yet applied, import
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportPlan {
    Replace {
        entries: Vec<ScoreEntry>,
        summary: ReplaceSummary,
    },
    Merge {
        entries: Vec<ScoreEntry>,
        report: ReconciliationReport,
    },
}

impl ImportPlan {
    /// Entry sequence the library would hold after applying
    pub fn entries(&self) -> &[ScoreEntry] {
        match self {
            ImportPlan::Replace { entries, .. } | ImportPlan::Merge { entries, .. } => entries,
        }
    }

    pub fn is_replace(&self) -> bool {
        matches!(self, ImportPlan::Replace { .. })
    }
}

/// Plan an import of `decoded` into `current`
pub fn plan_import(current: &Library, decoded: DecodedSnapshot) -> Result<ImportPlan> {
    match decoded {
        DecodedSnapshot::SelfContained(scores) => {
            let entries = replacement_entries(scores)?;
            let summary = ReplaceSummary {
                incoming: entries.len(),
                current: current.len(),
            };
            Ok(ImportPlan::Replace { entries, summary })
        }
        DecodedSnapshot::Legacy(records) => {
            if current.is_empty() {
                return Err(EngineError::precondition(
                    "cannot apply legacy metadata without an existing, image-backed library",
                ));
            }
            let (entries, report) = merge_legacy(&current.entries, &records);
            Ok(ImportPlan::Merge { entries, report })
        }
    }
}

fn replacement_entries(mut scores: Vec<ImportedScore>) -> Result<Vec<ScoreEntry>> {
    scores.sort_by_key(|s| s.order);

    // Ids repeated inside one document are regenerated rather than rejected.
    let mut seen = HashSet::with_capacity(scores.len());
    scores
        .into_iter()
        .map(|s| {
            let id = match s.id {
                Some(id) if seen.insert(id.clone()) => id,
                _ => EntryId::generate(),
            };
            ScoreEntry::with_claimed_image(id, s.name, s.bpm, s.zoom, s.image)
        })
        .collect()
}

/// Merge legacy records into `current` by case-insensitive name
///
/// The first current entry with a given name wins. Matched entries move to
/// the front in document order, the rest keep their relative order.
pub fn merge_legacy(
    current: &[ScoreEntry],
    records: &[LegacyRecord],
) -> (Vec<ScoreEntry>, ReconciliationReport) {
    let mut by_name: HashMap<String, usize> = HashMap::with_capacity(current.len());
    for (index, entry) in current.iter().enumerate() {
        by_name.entry(entry.name.to_lowercase()).or_insert(index);
    }

    let mut working: Vec<ScoreEntry> = current.to_vec();
    let mut report = ReconciliationReport {
        total: records.len(),
        ..Default::default()
    };
    let mut matched_order: Vec<usize> = Vec::new();

    for record in records {
        let Some(&index) = by_name.get(&record.name.to_lowercase()) else {
            report.unmatched.push(record.name.clone());
            continue;
        };
        let entry = &mut working[index];
        if let Some(bpm) = record.bpm {
            entry.bpm = Bpm::clamped(bpm);
        }
        if let Some(zoom) = record.zoom {
            entry.zoom = Zoom::clamped(zoom);
        }
        report.matched += 1;
        if !matched_order.contains(&index) {
            matched_order.push(index);
        }
    }

    let mut taken = vec![false; working.len()];
    let mut entries = Vec::with_capacity(working.len());
    for &index in &matched_order {
        taken[index] = true;
        entries.push(working[index].clone());
    }
    for (index, entry) in working.into_iter().enumerate() {
        if !taken[index] {
            entries.push(entry);
        }
    }

    (entries, report)
}
