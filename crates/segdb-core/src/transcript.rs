//! Transcript files produced by the transcription pipeline, turned into `Document`s.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::{Document, TenantKey};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    #[serde(default)]
    pub segments: Vec<Segment>,
}

impl Transcript {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => String::from_utf8_lossy(&fs::read(path).map_err(|e| Error::io(path, e))?).to_string(),
        };
        let transcript: Transcript = serde_json::from_str(&raw)?;
        debug!(path = %path.display(), segments = transcript.segments.len(), "loaded transcript");
        Ok(transcript)
    }

    /// Documents for `key`, one per non-blank segment, in transcript order.
    pub fn documents(&self, key: &TenantKey) -> Vec<Document> {
        self.segments
            .iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|s| Document::new(key, s.text.trim(), s.start, s.end))
            .collect()
    }
}

/// A transcript discovered on disk and the collection it will be indexed as.
#[derive(Debug, Clone)]
pub struct TranscriptFile {
    pub collection_id: String,
    pub path: PathBuf,
}

/// All `*.json` transcripts under `root`, sorted; the collection id is the file stem.
///
/// Collection ids must be unique: when two files map to the same id, the first path
/// in sort order wins and the others are skipped with a warning.
pub fn discover_transcripts(root: &Path) -> Vec<TranscriptFile> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()).filter(|e| e.file_type().is_file()) {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else { continue };
        let collection_id = stem.strip_suffix("_transcript").unwrap_or(&stem).to_string();
        files.push(TranscriptFile { collection_id, path: path.to_path_buf() });
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    let mut claimed: HashMap<String, PathBuf> = HashMap::new();
    files.retain(|f| match claimed.get(&f.collection_id) {
        Some(first) => {
            warn!(collection = %f.collection_id, path = %f.path.display(), kept = %first.display(), "duplicate collection id, skipping transcript");
            false
        }
        None => {
            claimed.insert(f.collection_id.clone(), f.path.clone());
            true
        }
    });
    info!(root = %root.display(), found = files.len(), "discovered transcripts");
    files
}
