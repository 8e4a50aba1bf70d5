//! Snapshot codec
//!
//! A snapshot is a portable JSON document:
//!
//! ```text
//! { "version": "2.0.0", "exportDate": "...",
//!   "scores": [ { "id", "name", "bpm", "zoom", "image", "order" }, ... ] }
//! ```
//!
//! Two generations are recognised on decode. Self-contained snapshots
//! (version >= 2.0, or any score carrying an image) embed every image as a
//! base64 data URI. Legacy snapshots carry only names and tempo/zoom, and can
//! only be merged into a library that already holds the images.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::{Bpm, EntryId, Library, Zoom};
use crate::error::{EngineError, Result};

/// Version written by this codec
pub const CURRENT_VERSION: &str = "2.0.0";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentOut<'a> {
    version: &'a str,
    export_date: String,
    scores: Vec<ScoreOut>,
}

#[derive(Serialize)]
struct ScoreOut {
    id: String,
    name: String,
    bpm: u16,
    zoom: u16,
    image: String,
    order: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentIn {
    #[serde(default)]
    version: Option<serde_json::Value>,
    scores: Vec<ScoreIn>,
}

#[derive(Deserialize)]
struct ScoreIn {
    #[serde(default)]
    id: Option<serde_json::Value>,
    name: String,
    #[serde(default)]
    bpm: Option<f64>,
    #[serde(default)]
    zoom: Option<f64>,
    /// Older writers named this field `base64`
    #[serde(default, alias = "base64")]
    image: Option<String>,
    #[serde(default)]
    order: Option<f64>,
}

impl ScoreIn {
    fn has_image(&self) -> bool {
        self.image.as_deref().is_some_and(|i| !i.is_empty())
    }

    fn id(&self) -> Option<EntryId> {
        match &self.id {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Some(EntryId::new(s.clone())),
            Some(serde_json::Value::Number(n)) => Some(EntryId::new(n.to_string())),
            _ => None,
        }
    }
}

/// Result of encoding a library
#[derive(Debug, Clone)]
pub struct Encoded {
    pub json: String,
    /// Names of entries left out because they had no image
    pub skipped: Vec<String>,
}

/// One score from a self-contained snapshot, image already decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedScore {
    pub id: Option<EntryId>,
    pub name: String,
    pub bpm: Bpm,
    pub zoom: Zoom,
    pub image: Bytes,
    pub order: i64,
}

/// One record from a legacy snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyRecord {
    pub id: Option<EntryId>,
    pub name: String,
    pub bpm: Option<i64>,
    pub zoom: Option<i64>,
    pub order: Option<i64>,
}

/// A decoded snapshot, tagged by generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedSnapshot {
    SelfContained(Vec<ImportedScore>),
    Legacy(Vec<LegacyRecord>),
}

impl DecodedSnapshot {
    pub fn len(&self) -> usize {
        match self {
            DecodedSnapshot::SelfContained(s) => s.len(),
            DecodedSnapshot::Legacy(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Serialize every image-backed entry of `library`
pub fn encode(library: &Library, export_date: DateTime<Utc>) -> Result<Encoded> {
    let mut skipped = Vec::new();
    let mut scores = Vec::with_capacity(library.len());

    for entry in &library.entries {
        // An empty payload would not decode back, so it counts as missing.
        let Some(image) = entry.image.as_ref().filter(|img| !img.is_empty()) else {
            skipped.push(entry.name.clone());
            continue;
        };
        scores.push(ScoreOut {
            id: entry.id.to_string(),
            name: entry.name.clone(),
            bpm: entry.bpm.get(),
            zoom: entry.zoom.get(),
            image: encode_image(image),
            order: scores.len(),
        });
    }

    let doc = DocumentOut {
        version: CURRENT_VERSION,
        export_date: export_date.to_rfc3339_opts(SecondsFormat::Millis, true),
        scores,
    };
    let json = serde_json::to_string_pretty(&doc)
        .map_err(|e| EngineError::parse(format!("failed to serialize snapshot: {}", e)))?;

    Ok(Encoded { json, skipped })
}

/// Parse and validate a snapshot document
pub fn decode(bytes: &[u8]) -> Result<DecodedSnapshot> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| EngineError::parse(format!("snapshot is not valid UTF-8: {}", e)))?;
    let doc: DocumentIn = serde_json::from_str(text)
        .map_err(|e| EngineError::parse(format!("invalid snapshot document: {}", e)))?;

    let version = doc.version.as_ref().and_then(version_number);
    let self_contained =
        version.is_some_and(|v| v >= 2.0) || doc.scores.iter().any(ScoreIn::has_image);

    if self_contained {
        decode_self_contained(doc.scores).map(DecodedSnapshot::SelfContained)
    } else {
        Ok(DecodedSnapshot::Legacy(
            doc.scores
                .into_iter()
                .map(|s| LegacyRecord {
                    id: s.id(),
                    bpm: s.bpm.map(round),
                    zoom: s.zoom.map(round),
                    order: s.order.map(round),
                    name: s.name,
                })
                .collect(),
        ))
    }
}

fn decode_self_contained(scores: Vec<ScoreIn>) -> Result<Vec<ImportedScore>> {
    scores
        .into_iter()
        .enumerate()
        .map(|(index, s)| {
            let id = s.id();
            let Some(raw) = s.image.as_deref().filter(|i| !i.is_empty()) else {
                return Err(EngineError::validation(format!(
                    "score \"{}\" has no image; the snapshot is incomplete",
                    s.name
                )));
            };
            let image = decode_image(raw).map_err(|e| {
                EngineError::validation(format!("score \"{}\" has an unreadable image: {}", s.name, e))
            })?;
            if image.is_empty() {
                return Err(EngineError::validation(format!(
                    "score \"{}\" claims an image but the payload is empty",
                    s.name
                )));
            }
            Ok(ImportedScore {
                id,
                bpm: s.bpm.map(|b| Bpm::clamped(round(b))).unwrap_or_default(),
                zoom: s.zoom.map(|z| Zoom::clamped(round(z))).unwrap_or_default(),
                order: s.order.map(round).unwrap_or(index as i64),
                name: s.name,
                image,
            })
        })
        .collect()
}

/// Default file name for an export made on `date`
pub fn suggested_file_name(date: DateTime<Utc>) -> String {
    format!("easyscore-config-{}.json", date.format("%Y-%m-%d"))
}

/// Leading `major.minor` of a version, read the way a float parser would
fn version_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => {
            let s = s.trim_start();
            let mut seen_dot = false;
            let end = s
                .char_indices()
                .find(|&(_, c)| {
                    if c == '.' && !seen_dot {
                        seen_dot = true;
                        false
                    } else {
                        !c.is_ascii_digit()
                    }
                })
                .map(|(i, _)| i)
                .unwrap_or(s.len());
            s[..end].trim_end_matches('.').parse().ok()
        }
        _ => None,
    }
}

fn round(v: f64) -> i64 {
    v.round() as i64
}

/// Encode an image as a base64 data URI
pub fn encode_image(image: &[u8]) -> String {
    format!("data:{};base64,{}", sniff_mime(image), STANDARD.encode(image))
}

/// Decode a data URI or bare base64 string
pub fn decode_image(raw: &str) -> std::result::Result<Bytes, String> {
    let payload = match raw.strip_prefix("data:") {
        Some(rest) => {
            let (header, data) = rest
                .split_once(',')
                .ok_or_else(|| "data URI without payload".to_string())?;
            if !header.ends_with(";base64") {
                return Err(format!("unsupported data URI encoding: {}", header));
            }
            data
        }
        None => raw,
    };
    STANDARD
        .decode(payload.trim())
        .map(Bytes::from)
        .map_err(|e| e.to_string())
}

fn sniff_mime(image: &[u8]) -> &'static str {
    if image.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if image.starts_with(&[0xff, 0xd8, 0xff]) {
        "image/jpeg"
    } else if image.len() >= 12 && &image[..4] == b"RIFF" && &image[8..12] == b"WEBP" {
        "image/webp"
    } else if image.starts_with(b"GIF8") {
        "image/gif"
    } else {
        "application/octet-stream"
    }
}
