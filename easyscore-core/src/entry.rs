//! Entity model: score entries and the ordered library
//!
//! A `Library` is an ordered sequence of `ScoreEntry` values. Position in the
//! sequence is the entry's rank; it is never stored on the entry itself.

use bytes::Bytes;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{EngineError, Result};
use crate::storage::{MetadataRecord, SessionRecord};

/// Process-wide sequence appended to time-based ids
static ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Opaque, immutable identifier of an entry
///
/// Primary key in both the metadata store and the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(String);

impl EntryId {
    /// Wrap an existing id string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh id of the form `<unix-millis>-<sequence>`
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let seq = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("{}-{}", millis, seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for EntryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Tempo in beats per minute, always within [30, 300]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bpm(u16);

impl Bpm {
    pub const MIN: u16 = 30;
    pub const MAX: u16 = 300;
    pub const DEFAULT: Bpm = Bpm(120);

    /// Clamp any integer into the tempo domain
    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(Self::MIN as i64, Self::MAX as i64) as u16)
    }

    /// Strict constructor: out-of-domain values are rejected
    pub fn new(value: i64) -> Result<Self> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&value) {
            Ok(Self(value as u16))
        } else {
            Err(EngineError::validation(format!(
                "bpm {} outside [{}, {}]",
                value,
                Self::MIN,
                Self::MAX
            )))
        }
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

impl Default for Bpm {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Bpm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display scale in percent, always within [25, 500]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Zoom(u16);

impl Zoom {
    pub const MIN: u16 = 25;
    pub const MAX: u16 = 500;
    pub const DEFAULT: Zoom = Zoom(100);

    /// Clamp any integer into the zoom domain
    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(Self::MIN as i64, Self::MAX as i64) as u16)
    }

    /// Strict constructor: out-of-domain values are rejected
    pub fn new(value: i64) -> Result<Self> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&value) {
            Ok(Self(value as u16))
        } else {
            Err(EngineError::validation(format!(
                "zoom {} outside [{}, {}]",
                value,
                Self::MIN,
                Self::MAX
            )))
        }
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

impl Default for Zoom {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Zoom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// One sheet image with its playback metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreEntry {
    pub id: EntryId,
    pub name: String,
    pub bpm: Bpm,
    pub zoom: Zoom,
    /// Opaque image payload. `None` means metadata only.
    pub image: Option<Bytes>,
}

impl ScoreEntry {
    /// Create a new entry with a fresh id and default tempo/zoom
    pub fn new(name: impl Into<String>, image: Option<Bytes>) -> Self {
        Self {
            id: EntryId::generate(),
            name: name.into(),
            bpm: Bpm::default(),
            zoom: Zoom::default(),
            image,
        }
    }

    /// Assemble an entry from existing parts without inventing anything
    pub fn from_parts(
        id: EntryId,
        name: impl Into<String>,
        bpm: Bpm,
        zoom: Zoom,
        image: Option<Bytes>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            bpm,
            zoom,
            image,
        }
    }

    /// Register an entry that claims to carry an image.
    ///
    /// An empty payload contradicts the claim and is rejected.
    pub fn with_claimed_image(
        id: EntryId,
        name: impl Into<String>,
        bpm: Bpm,
        zoom: Zoom,
        image: Bytes,
    ) -> Result<Self> {
        let name = name.into();
        if image.is_empty() {
            return Err(EngineError::validation(format!(
                "entry \"{}\" claims an image but the payload is empty",
                name
            )));
        }
        Ok(Self::from_parts(id, name, bpm, zoom, Some(image)))
    }

    /// Whether the image payload is attached
    pub fn is_loaded(&self) -> bool {
        self.image.is_some()
    }

    /// Metadata-only projection for the metadata store
    pub fn record(&self, rank: u32) -> MetadataRecord {
        MetadataRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            bpm: self.bpm.get() as i64,
            zoom: Some(self.zoom.get() as i64),
            rank,
        }
    }
}

/// Partial update of an entry's editable fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPatch {
    pub name: Option<String>,
    pub bpm: Option<i64>,
    pub zoom: Option<i64>,
}

impl EntryPatch {
    pub fn bpm(value: i64) -> Self {
        Self {
            bpm: Some(value),
            ..Default::default()
        }
    }

    pub fn zoom(value: i64) -> Self {
        Self {
            zoom: Some(value),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.bpm.is_none() && self.zoom.is_none()
    }

    /// Apply present fields, clamping tempo and zoom
    pub fn apply_to(&self, entry: &mut ScoreEntry) {
        if let Some(name) = &self.name {
            entry.name = name.clone();
        }
        if let Some(bpm) = self.bpm {
            entry.bpm = Bpm::clamped(bpm);
        }
        if let Some(zoom) = self.zoom {
            entry.zoom = Zoom::clamped(zoom);
        }
    }
}

/// The ordered collection of entries plus session pointers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Library {
    pub entries: Vec<ScoreEntry>,
    /// Label of the last bulk-load origin, display only
    pub source_label: Option<String>,
    /// Index of the entry being performed; 0 when empty
    pub active_index: usize,
    /// UI mode flag, never persisted
    pub performance_mode: bool,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<ScoreEntry>) -> Self {
        Self {
            entries,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, id: &EntryId) -> Option<&ScoreEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn find_mut(&mut self, id: &EntryId) -> Option<&mut ScoreEntry> {
        self.entries.iter_mut().find(|e| &e.id == id)
    }

    pub fn position_of(&self, id: &EntryId) -> Option<usize> {
        self.entries.iter().position(|e| &e.id == id)
    }

    pub fn ids(&self) -> Vec<EntryId> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    /// The entry under `active_index`, if any
    pub fn active(&self) -> Option<&ScoreEntry> {
        self.entries.get(self.active_index)
    }

    /// Pull `active_index` back into range after the sequence shrank
    pub fn clamp_active_index(&mut self) {
        if self.entries.is_empty() {
            self.active_index = 0;
        } else if self.active_index >= self.entries.len() {
            self.active_index = self.entries.len() - 1;
        }
    }

    /// Metadata projection with explicit ranks
    pub fn records(&self) -> Vec<MetadataRecord> {
        self.entries
            .iter()
            .enumerate()
            .map(|(rank, e)| e.record(rank as u32))
            .collect()
    }

    pub fn session(&self) -> SessionRecord {
        SessionRecord {
            source_label: self.source_label.clone(),
            active_index: self.active_index as u64,
        }
    }

    /// Reject a sequence that repeats an id
    pub fn ensure_unique_ids(entries: &[ScoreEntry]) -> Result<()> {
        let mut seen = HashSet::with_capacity(entries.len());
        for e in entries {
            if !seen.insert(&e.id) {
                return Err(EngineError::validation(format!(
                    "duplicate entry id {}",
                    e.id
                )));
            }
        }
        Ok(())
    }
}
