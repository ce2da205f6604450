//! Directory-per-key artifact layout.
//!
//! `<root>/tenants/<enc(tenant)>/<enc(collection)>/<artifact file>`
//!
//! `enc` keeps `[A-Za-z0-9_-]` and writes every other byte as `%XX`, so it is
//! injective, never produces `.`/`..` or separators, and distinct keys get
//! distinct directories.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::traits::PathResolver;
use crate::types::{ArtifactKind, TenantKey};

#[derive(Debug, Clone)]
pub struct DirPathResolver {
    root: PathBuf,
}

impl DirPathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tenant_dir(&self, tenant_id: &str) -> PathBuf {
        self.root.join("tenants").join(encode_component(tenant_id))
    }

    pub fn key_dir(&self, key: &TenantKey) -> PathBuf {
        self.tenant_dir(key.tenant_id()).join(encode_component(key.collection_id()))
    }
}

impl PathResolver for DirPathResolver {
    fn resolve_path(&self, key: &TenantKey, kind: ArtifactKind) -> PathBuf {
        self.key_dir(key).join(kind.file_name())
    }

    fn list_collections(&self, tenant_id: &str) -> Result<Vec<String>> {
        decoded_subdirs(&self.tenant_dir(tenant_id))
    }

    fn list_tenants(&self) -> Result<Vec<String>> {
        decoded_subdirs(&self.root.join("tenants"))
    }
}

/// Decoded names of the subdirectories of `dir`, sorted; empty when `dir` is missing.
fn decoded_subdirs(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(dir, e)),
    };
    let mut names = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        if let Some(name) = entry.file_name().to_str().and_then(decode_component) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

pub fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Inverse of [`encode_component`]; `None` for names it could not have produced.
pub fn decode_component(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
