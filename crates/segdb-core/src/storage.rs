//! Artifact file format and atomic file helpers.
//!
//! Every artifact is a JSON header line followed by a JSON body. The header
//! carries the key, document count and generation so readiness can be checked
//! without deserializing the body.
//!
//! Writes go to a temp file in the destination directory, are fsynced, then
//! renamed over the canonical path. Siblings named `<file>.staged-<gen>`,
//! `<file>.retired-<gen>` and `.<file>.tmp-*` belong to in-flight or aborted
//! generation swaps and are removed by [`sweep_siblings`].

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{ArtifactKind, TenantKey};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    pub format: u32,
    pub kind: ArtifactKind,
    pub tenant_id: String,
    pub collection_id: String,
    pub document_count: usize,
    pub generation: u64,
}

impl ArtifactHeader {
    pub fn new(kind: ArtifactKind, key: &TenantKey, document_count: usize, generation: u64) -> Self {
        Self {
            format: FORMAT_VERSION,
            kind,
            tenant_id: key.tenant_id().to_string(),
            collection_id: key.collection_id().to_string(),
            document_count,
            generation,
        }
    }

    pub fn belongs_to(&self, key: &TenantKey) -> bool {
        self.tenant_id == key.tenant_id() && self.collection_id == key.collection_id()
    }
}

/// Atomically write `header` + `body` to `path`.
pub fn write_artifact<T: Serialize>(path: &Path, header: &ArtifactHeader, body: &T) -> Result<()> {
    let dir = parent_dir(path);
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    let prefix = format!(".{}.tmp-", file_name(path));
    let tmp = tempfile::Builder::new().prefix(&prefix).tempfile_in(dir).map_err(|e| Error::io(dir, e))?;
    {
        let mut w = BufWriter::new(tmp.as_file());
        serde_json::to_writer(&mut w, header)?;
        w.write_all(b"\n").map_err(|e| Error::io(tmp.path(), e))?;
        serde_json::to_writer(&mut w, body)?;
        w.flush().map_err(|e| Error::io(tmp.path(), e))?;
    }
    tmp.as_file().sync_all().map_err(|e| Error::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}

pub fn read_header(path: &Path) -> Result<ArtifactHeader> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut reader = BufReader::new(file);
    read_header_line(path, &mut reader)
}

pub fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<(ArtifactHeader, T)> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut reader = BufReader::new(file);
    let header = read_header_line(path, &mut reader)?;
    let mut body = Vec::new();
    reader.read_to_end(&mut body).map_err(|e| Error::io(path, e))?;
    let body = serde_json::from_slice(&body)?;
    Ok((header, body))
}

fn read_header_line<R: BufRead>(path: &Path, reader: &mut R) -> Result<ArtifactHeader> {
    let mut line = String::new();
    reader.read_line(&mut line).map_err(|e| Error::io(path, e))?;
    let header: ArtifactHeader = serde_json::from_str(line.trim_end())?;
    if header.format != FORMAT_VERSION {
        return Err(Error::Serialization(format!(
            "{}: unsupported artifact format {}",
            path.display(),
            header.format
        )));
    }
    Ok(header)
}

/// Remove a file; returns whether it existed. Missing files are not an error.
pub fn remove_artifact(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(path, e)),
    }
}

pub fn staged_path(path: &Path, generation: u64) -> PathBuf {
    sibling(path, &format!("{}.staged-{generation}", file_name(path)))
}

pub fn retired_path(path: &Path, generation: u64) -> PathBuf {
    sibling(path, &format!("{}.retired-{generation}", file_name(path)))
}

/// Rename `from` over `to` (same directory, so atomic on POSIX filesystems).
pub fn promote(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| Error::io(to, e))
}

/// Generations of the `<file>.retired-<gen>` siblings of `path`.
pub fn retired_generations(path: &Path) -> Result<Vec<u64>> {
    let dir = parent_dir(path);
    let prefix = format!("{}.retired-", file_name(path));
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(dir, e)),
    };
    Ok(entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().and_then(|n| n.strip_prefix(prefix.as_str())).and_then(|g| g.parse::<u64>().ok()))
        .collect())
}

/// Delete staged, retired and temp siblings left next to `path` by aborted swaps.
pub fn sweep_siblings(path: &Path) -> Result<usize> {
    let dir = parent_dir(path);
    let name = file_name(path);
    let staged = format!("{name}.staged-");
    let retired = format!("{name}.retired-");
    let tmp = format!(".{name}.tmp-");
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(Error::io(dir, e)),
    };
    let mut removed = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let entry_name = entry.file_name();
        let Some(entry_name) = entry_name.to_str() else { continue };
        if entry_name.starts_with(&staged) || entry_name.starts_with(&retired) || entry_name.starts_with(&tmp) {
            if remove_artifact(&entry.path())? {
                removed += 1;
            }
        }
    }
    Ok(removed)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

fn sibling(path: &Path, name: &str) -> PathBuf {
    parent_dir(path).join(name)
}
