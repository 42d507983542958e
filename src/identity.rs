//! Folder identity derivation and composite slot naming
//!
//! A folder's identity is the decimal token appended to its display name on
//! the server (`reports_7`). Re-uploading the same local directory must land
//! in the same slot, so the identity is derived from the directory's storage
//! identity when the platform exposes one and memoized per path.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::fs_enum::folder_size;

/// Derives and caches folder identities.
///
/// Each resolver owns its cache, so tests and embedders can hold isolated
/// instances. The cache is never invalidated: a folder mutated after its
/// first lookup keeps the identity it was first given.
#[derive(Debug, Default)]
pub struct FolderIdentityResolver {
    cache: RwLock<HashMap<PathBuf, String>>,
}

impl FolderIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of `path`. Never fails; filesystem errors degrade to the
    /// next strategy and are logged.
    pub fn identity(&self, path: &Path) -> String {
        let key = cache_key(path);
        if let Some(id) = self.cache.read().get(&key) {
            return id.clone();
        }

        let computed = derive_identity(&key);
        // Two sessions may race on the first lookup; whoever inserts first wins.
        self.cache.write().entry(key).or_insert(computed).clone()
    }

    /// Number of memoized paths
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }
}

/// A local directory selected for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderHandle {
    pub local_path: PathBuf,
    pub display_name: String,
    pub identity: String,
}

impl FolderHandle {
    pub fn resolve(path: &Path, resolver: &FolderIdentityResolver) -> Self {
        // `.` and `..` have no file name of their own
        let display_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .or_else(|| {
                std::fs::canonicalize(path)
                    .ok()
                    .and_then(|p| p.file_name().map(|n| n.to_os_string()))
            })
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "folder".to_string());
        Self {
            local_path: path.to_path_buf(),
            display_name,
            identity: resolver.identity(path),
        }
    }

    pub fn composite_name(&self) -> String {
        composite_name(&self.display_name, &self.identity)
    }
}

/// `<display name>_<identity>`
pub fn composite_name(display_name: &str, identity: &str) -> String {
    format!("{display_name}_{identity}")
}

/// Byte offset of the `_` starting a trailing all-digit identity suffix
fn identity_suffix_start(name: &str) -> Option<usize> {
    let idx = name.rfind('_')?;
    let digits = &name[idx + 1..];
    if idx == 0 || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(idx)
}

/// Display name of a slot. Only a trailing `_<digits>` is stripped, so
/// `notes_v2` stays intact.
pub fn extract_original_name(name: &str) -> &str {
    match identity_suffix_start(name) {
        Some(idx) => &name[..idx],
        None => name,
    }
}

/// Identity suffix of a slot, if it has one
pub fn extract_identity(name: &str) -> Option<&str> {
    identity_suffix_start(name).map(|idx| &name[idx + 1..])
}

fn cache_key(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn derive_identity(path: &Path) -> String {
    match object_identity(path) {
        Ok(Some(id)) => return id,
        Ok(None) => debug!(path = %path.display(), "no storage object id on this platform"),
        Err(e) => warn!(path = %path.display(), error = %e, "cannot read folder object id, using fingerprint"),
    }
    match fingerprint_identity(path) {
        Ok(id) => id,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "cannot fingerprint folder, identity falls back to the clock and will not be stable"
            );
            clock_identity()
        }
    }
}

fn short_hash(bytes: &[u8]) -> String {
    let digest = blake3::hash(bytes);
    let mut head = [0u8; 4];
    head.copy_from_slice(&digest.as_bytes()[..4]);
    u32::from_le_bytes(head).to_string()
}

/// Device + inode, hashed. `Ok(None)` where the platform has no such key.
#[cfg(unix)]
fn object_identity(path: &Path) -> io::Result<Option<String>> {
    use std::os::unix::fs::MetadataExt;
    let md = std::fs::metadata(path)?;
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&md.dev().to_le_bytes());
    key.extend_from_slice(&md.ino().to_le_bytes());
    Ok(Some(short_hash(&key)))
}

#[cfg(not(unix))]
fn object_identity(path: &Path) -> io::Result<Option<String>> {
    std::fs::metadata(path)?;
    Ok(None)
}

/// Hash of (absolute path, mtime, recursive size)
pub(crate) fn fingerprint_identity(path: &Path) -> io::Result<String> {
    let md = std::fs::metadata(path)?;
    let mtime_ms = md
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let size = folder_size(path)?;
    let material = format!("{}|{}|{}", path.display(), mtime_ms, size);
    Ok(short_hash(material.as_bytes()))
}

pub(crate) fn clock_identity() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
        .to_string()
}
