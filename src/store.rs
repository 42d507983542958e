//! Server-side slot storage under a single root directory
//!
//! Every immediate subdirectory of the root is one stored folder, named
//! `<display name>_<identity>`. There is no other metadata on disk.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::fs_enum::folder_size;
use crate::identity::{extract_identity, extract_original_name};
use crate::protocol_core::{validate_folder_name, RemoteFolder};

#[derive(Debug, Clone)]
pub struct FolderStore {
    root: PathBuf,
}

impl FolderStore {
    /// Create the root if needed. Failure here is fatal for the server.
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|source| SyncError::Startup {
            context: format!("create root directory {}", root.display()),
            source,
        })?;
        let root = std::fs::canonicalize(root).map_err(|source| SyncError::Startup {
            context: format!("resolve root directory {}", root.display()),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory backing `name`. The name is validated so it can only ever
    /// address a direct child of the root.
    pub fn slot_path(&self, name: &str) -> Result<PathBuf> {
        validate_folder_name(name)?;
        Ok(self.root.join(name))
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.slot_path(name)?;
        Ok(fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false))
    }

    /// Delete any previous contents and recreate the slot empty.
    /// Uploads always replace, never merge.
    pub async fn replace_slot(&self, name: &str) -> Result<PathBuf> {
        let path = self.slot_path(name)?;
        match fs::symlink_metadata(&path).await {
            Ok(md) if md.is_dir() => {
                info!(slot = name, "replacing existing folder");
                fs::remove_dir_all(&path)
                    .await
                    .map_err(|e| SyncError::io(&path, e))?;
            }
            Ok(_) => {
                fs::remove_file(&path)
                    .await
                    .map_err(|e| SyncError::io(&path, e))?;
            }
            Err(_) => {}
        }
        fs::create_dir_all(&path)
            .await
            .map_err(|e| SyncError::io(&path, e))?;
        Ok(path)
    }

    /// First-level directories only, sorted by name, with recursive sizes.
    pub async fn list(&self) -> Result<Vec<RemoteFolder>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || list_blocking(&root))
            .await
            .map_err(|e| SyncError::io(&self.root, std::io::Error::other(e)))?
    }
}

fn list_blocking(root: &Path) -> Result<Vec<RemoteFolder>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(root).map_err(|e| SyncError::io(root, e))? {
        let entry = entry.map_err(|e| SyncError::io(root, e))?;
        let is_dir = entry
            .file_type()
            .map_err(|e| SyncError::io(entry.path(), e))?
            .is_dir();
        if is_dir {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    let mut folders = Vec::with_capacity(names.len());
    for name in names {
        let path = root.join(&name);
        let size_bytes = folder_size(&path).map_err(|e| SyncError::io(&path, e))?;
        debug!(slot = %name, size_bytes, "listed folder");
        folders.push(RemoteFolder {
            identity: extract_identity(&name).unwrap_or_default().to_string(),
            display_name: extract_original_name(&name).to_string(),
            size_bytes,
        });
    }
    Ok(folders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("nested/root");
        let store = FolderStore::open(&root).unwrap();
        assert!(store.root().is_dir());
    }

    #[test]
    fn test_open_fails_when_root_is_a_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("occupied");
        stdfs::write(&file, b"x").unwrap();
        assert!(matches!(
            FolderStore::open(&file),
            Err(SyncError::Startup { .. })
        ));
    }

    #[test]
    fn test_slot_path_rejects_traversal() {
        let tmp = TempDir::new().unwrap();
        let store = FolderStore::open(tmp.path()).unwrap();
        assert!(store.slot_path("../outside").is_err());
        assert!(store.slot_path("a/b").is_err());
        assert_eq!(
            store.slot_path("reports_7").unwrap(),
            store.root().join("reports_7")
        );
    }

    #[tokio::test]
    async fn test_list_splits_names_and_sums_sizes() {
        let tmp = TempDir::new().unwrap();
        let store = FolderStore::open(tmp.path()).unwrap();
        stdfs::create_dir_all(tmp.path().join("reports_7/sub")).unwrap();
        stdfs::write(tmp.path().join("reports_7/a.txt"), vec![0u8; 10]).unwrap();
        stdfs::write(tmp.path().join("reports_7/sub/b.txt"), vec![0u8; 5]).unwrap();
        stdfs::create_dir(tmp.path().join("notes_v2")).unwrap();
        stdfs::write(tmp.path().join("stray.txt"), b"not a folder").unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(
            listed,
            vec![
                RemoteFolder {
                    identity: String::new(),
                    display_name: "notes_v2".into(),
                    size_bytes: 0,
                },
                RemoteFolder {
                    identity: "7".into(),
                    display_name: "reports".into(),
                    size_bytes: 15,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_replace_slot_discards_old_contents() {
        let tmp = TempDir::new().unwrap();
        let store = FolderStore::open(tmp.path()).unwrap();
        stdfs::create_dir_all(tmp.path().join("docs_1/old")).unwrap();
        stdfs::write(tmp.path().join("docs_1/old/stale.txt"), b"stale").unwrap();

        let slot = store.replace_slot("docs_1").await.unwrap();
        assert!(slot.is_dir());
        assert_eq!(stdfs::read_dir(&slot).unwrap().count(), 0);
        assert!(store.exists("docs_1").await.unwrap());
        assert!(!store.exists("docs_2").await.unwrap());
    }
}
