use std::cmp::Ordering;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};
// Filesystem enumeration in wire order

/// A regular file scheduled for transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    /// Path relative to the transfer root, `/` separated
    pub relative: String,
    pub size: u64,
}

/// Files before directories, then by name. WalkDir descends into a directory
/// as soon as it yields it, so this puts every file of a directory ahead of
/// anything in its subdirectories.
fn wire_order(a: &DirEntry, b: &DirEntry) -> Ordering {
    let a_dir = a.file_type().is_dir();
    let b_dir = b.file_type().is_dir();
    a_dir
        .cmp(&b_dir)
        .then_with(|| a.file_name().cmp(b.file_name()))
}

fn unsendable(path: &Path, why: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{}: {why}", path.display()),
    )
}

/// `/`-separated form of `path` relative to `root`.
///
/// Every name must be UTF-8 and fit on one control line, so the receiver
/// recreates exactly the same path. Backslashes are refused as well since the
/// receiver treats them as unsafe.
pub fn wire_relative_path(root: &Path, path: &Path) -> io::Result<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| unsendable(path, "outside the transfer root"))?;
    let mut parts = Vec::new();
    for component in rel.components() {
        let name = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| unsendable(path, "file name is not valid UTF-8"))?;
        if name.contains(&['\n', '\r', '\0', '\\'][..]) {
            return Err(unsendable(
                path,
                "file name contains a line break, NUL or backslash",
            ));
        }
        parts.push(name);
    }
    if parts.is_empty() {
        return Err(unsendable(path, "no relative path"));
    }
    Ok(parts.join("/"))
}

/// Every regular file under `root`, in deterministic transfer order.
///
/// Symlinks are neither followed nor listed. Unreadable entries and names
/// that cannot be sent unchanged are an error rather than silently skipped,
/// since a partial upload would replace the complete remote copy.
pub fn enumerate_transfer_order(root: &Path) -> io::Result<Vec<FileEntry>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by(wire_order)
    {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry.metadata().map_err(io::Error::from)?.len();
        let relative = wire_relative_path(root, entry.path())?;
        entries.push(FileEntry {
            path: entry.path().to_path_buf(),
            relative,
            size,
        });
    }

    Ok(entries)
}

/// Sum of all regular file sizes under `root`, descending into subdirectories
pub fn folder_size(root: &Path) -> io::Result<u64> {
    let mut total = 0u64;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(io::Error::from)?.len();
        }
    }
    Ok(total)
}
