//! File table module
//!
//! The file table maps every name listed in the metadata to its status and
//! content. The key set is fixed at construction; entries only ever move from
//! `Missing` to `Present`. All access goes through one mutex owned by the
//! table, and callers never hold it across network or disk I/O.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::error::TorrentError;

/// Whether a file's content is held locally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Missing,
    Present,
}

impl FileStatus {
    pub fn is_present(&self) -> bool {
        matches!(self, FileStatus::Present)
    }
}

/// One file named in the metadata
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub status: FileStatus,
    /// Empty while `Missing`
    pub content: Bytes,
}

impl FileEntry {
    /// Create an entry that has not been downloaded yet
    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: FileStatus::Missing,
            content: Bytes::new(),
        }
    }

    /// Create an entry whose content is held locally
    pub fn present(name: impl Into<String>, content: Bytes) -> Self {
        Self {
            name: name.into(),
            status: FileStatus::Present,
            content,
        }
    }
}

/// Shared status/content map for one node
#[derive(Debug)]
pub struct FileTable {
    /// Names in metadata order
    order: Vec<String>,
    entries: Mutex<HashMap<String, FileEntry>>,
}

impl FileTable {
    fn from_entries(entries: Vec<FileEntry>) -> Self {
        let mut order = Vec::with_capacity(entries.len());
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            if map.contains_key(&entry.name) {
                warn!("Duplicate file name in metadata: {}", entry.name);
                continue;
            }
            order.push(entry.name.clone());
            map.insert(entry.name.clone(), entry);
        }
        Self {
            order,
            entries: Mutex::new(map),
        }
    }

    /// Table for a client: every file `Missing` with empty content
    pub fn new_missing(names: &[String]) -> Self {
        debug!("Initializing {} files as missing", names.len());
        Self::from_entries(names.iter().map(FileEntry::missing).collect())
    }

    /// Table for a seeder: read every file from `seed_dir` and mark it `Present`
    ///
    /// Any file that cannot be read aborts the whole load.
    pub async fn load_seed(names: &[String], seed_dir: &Path) -> Result<Self> {
        info!("Loading {} seed files from {}", names.len(), seed_dir.display());

        if !seed_dir.is_dir() {
            return Err(TorrentError::config_error_with_field(
                format!("Seed directory not found: {}", seed_dir.display()),
                "seed_dir",
            )
            .into());
        }

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            if !is_safe_name(name) {
                return Err(TorrentError::config_error_with_field(
                    format!("Refusing to seed unsafe file name: {:?}", name),
                    "seed_dir",
                )
                .into());
            }
            let path = seed_dir.join(name);
            let content = fs::read(&path).await.map_err(|e| {
                error!("Seed file not readable at {}: {}", path.display(), e);
                TorrentError::config_error_with_field(
                    format!("Seed file not found at {}: {}", path.display(), e),
                    "seed_dir",
                )
            })?;
            debug!("Loaded seed file {} ({} bytes)", name, content.len());
            entries.push(FileEntry::present(name.clone(), Bytes::from(content)));
        }

        Ok(Self::from_entries(entries))
    }

    /// Names in metadata order
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Number of files tracked
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Content of a file if it is `Present`
    ///
    /// Returns a cheap clone of the bytes so the lock is released before the
    /// caller writes them to a socket.
    pub async fn present_content(&self, name: &str) -> Option<Bytes> {
        let entries = self.entries.lock().await;
        match entries.get(name) {
            Some(entry) if entry.status.is_present() => Some(entry.content.clone()),
            Some(_) => {
                trace!("File {} is known but not present", name);
                None
            }
            None => {
                trace!("File {} is not part of the metadata", name);
                None
            }
        }
    }

    /// Status of a file, `None` if the name is unknown
    pub async fn status(&self, name: &str) -> Option<FileStatus> {
        self.entries.lock().await.get(name).map(|e| e.status)
    }

    /// Snapshot of one entry
    pub async fn entry(&self, name: &str) -> Option<FileEntry> {
        self.entries.lock().await.get(name).cloned()
    }

    /// Names still `Missing`, in metadata order
    pub async fn missing_files(&self) -> Vec<String> {
        let entries = self.entries.lock().await;
        self.order
            .iter()
            .filter(|name| entries.get(*name).map_or(false, |e| !e.status.is_present()))
            .cloned()
            .collect()
    }

    /// Whether every file is `Present`
    pub async fn all_present(&self) -> bool {
        self.entries.lock().await.values().all(|e| e.status.is_present())
    }

    /// (present, missing) counts
    pub async fn counts(&self) -> (usize, usize) {
        let entries = self.entries.lock().await;
        let present = entries.values().filter(|e| e.status.is_present()).count();
        (present, entries.len() - present)
    }

    /// Flip a file to `Present` and attach its content
    ///
    /// Returns `Ok(false)` without touching the entry when it is already
    /// present, so the first completed transfer wins.
    pub async fn mark_present(&self, name: &str, content: Bytes) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(name).ok_or_else(|| {
            TorrentError::protocol_violation(format!("File {} is not part of the metadata", name))
        })?;

        if entry.status.is_present() {
            debug!("File {} already present; keeping existing content", name);
            return Ok(false);
        }

        entry.status = FileStatus::Present;
        entry.content = content;
        debug!("File {} marked present ({} bytes)", name, entry.content.len());
        Ok(true)
    }
}

/// Reject names that would escape the target directory
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

/// Write a completed file into `dir`
///
/// The bytes go to a temporary sibling first and are renamed into place, so
/// two sessions finishing the same file never interleave on disk.
pub async fn persist_file(dir: &Path, name: &str, content: &[u8]) -> Result<PathBuf> {
    if !is_safe_name(name) {
        return Err(TorrentError::storage_error_full(
            "Refusing to write unsafe file name",
            name.to_string(),
            "name escapes the download directory",
        )
        .into());
    }

    fs::create_dir_all(dir).await.map_err(|e| {
        error!("Failed to create directory '{}': {}", dir.display(), e);
        TorrentError::storage_error_full("Failed to create directory", dir.display().to_string(), e.to_string())
    })?;

    let final_path = dir.join(name);
    let temp_path = dir.join(format!(".{}.{:016x}.part", name, rand::random::<u64>()));

    let write_result = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(content).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, &final_path).await
    }
    .await;

    if let Err(e) = write_result {
        error!("Failed to write '{}': {}", final_path.display(), e);
        let _ = fs::remove_file(&temp_path).await;
        return Err(TorrentError::storage_error_full(
            "Failed to write file",
            final_path.display().to_string(),
            e.to_string(),
        )
        .into());
    }

    debug!("Wrote {} ({} bytes)", final_path.display(), content.len());
    Ok(final_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_new_missing() {
        let table = FileTable::new_missing(&names(&["a.txt", "b.txt"]));
        assert_eq!(table.len(), 2);
        assert_eq!(table.counts().await, (0, 2));
        assert!(!table.all_present().await);
        let entry = table.entry("a.txt").await.unwrap();
        assert_eq!(entry.status, FileStatus::Missing);
        assert!(entry.content.is_empty());
    }

    #[tokio::test]
    async fn test_load_seed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"0123456789").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"x".repeat(20)).unwrap();

        let table = FileTable::load_seed(&names(&["a.txt", "b.txt"]), dir.path()).await.unwrap();
        assert_eq!(table.counts().await, (2, 0));
        assert!(table.all_present().await);
        assert_eq!(table.present_content("a.txt").await.unwrap(), Bytes::from_static(b"0123456789"));
    }

    #[tokio::test]
    async fn test_load_seed_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"data").unwrap();

        let err = FileTable::load_seed(&names(&["a.txt", "b.txt"]), dir.path()).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<TorrentError>(), Some(TorrentError::ConfigError { .. })));
    }

    #[tokio::test]
    async fn test_load_seed_missing_dir_fails() {
        let err = FileTable::load_seed(&names(&["a.txt"]), Path::new("/nonexistent/seed")).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<TorrentError>(), Some(TorrentError::ConfigError { .. })));
    }

    #[tokio::test]
    async fn test_mark_present_is_monotonic() {
        let table = FileTable::new_missing(&names(&["a.txt"]));
        assert!(table.present_content("a.txt").await.is_none());

        assert!(table.mark_present("a.txt", Bytes::from_static(b"first")).await.unwrap());
        assert!(!table.mark_present("a.txt", Bytes::from_static(b"second")).await.unwrap());

        assert_eq!(table.status("a.txt").await, Some(FileStatus::Present));
        assert_eq!(table.present_content("a.txt").await.unwrap(), Bytes::from_static(b"first"));
    }

    #[tokio::test]
    async fn test_mark_present_unknown_name() {
        let table = FileTable::new_missing(&names(&["a.txt"]));
        assert!(table.mark_present("z.txt", Bytes::new()).await.is_err());
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_files_keep_metadata_order() {
        let table = FileTable::new_missing(&names(&["c", "a", "b"]));
        table.mark_present("a", Bytes::from_static(b"1")).await.unwrap();
        assert_eq!(table.missing_files().await, names(&["c", "b"]));
    }

    #[tokio::test]
    async fn test_duplicate_names_collapse() {
        let table = FileTable::new_missing(&names(&["a", "a", "b"]));
        assert_eq!(table.names(), &names(&["a", "b"])[..]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_interleaved_writers_do_not_corrupt_entries() {
        let all: Vec<String> = (0..64).map(|i| format!("file-{}", i)).collect();
        let table = Arc::new(FileTable::new_missing(&all));

        let mut handles = Vec::new();
        for (i, name) in all.iter().cloned().enumerate() {
            let table = table.clone();
            handles.push(tokio::spawn(async move {
                // Interleave reads of other entries with the write
                for other in 0..8 {
                    let _ = table.status(&format!("file-{}", (i + other) % 64)).await;
                    tokio::task::yield_now().await;
                }
                let content = Bytes::from(format!("content of {}", name).into_bytes());
                table.mark_present(&name, content).await.unwrap()
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap());
        }

        assert!(table.all_present().await);
        for name in &all {
            let entry = table.entry(name).await.unwrap();
            assert_eq!(entry.content, Bytes::from(format!("content of {}", name).into_bytes()));
        }
    }

    #[tokio::test]
    async fn test_persist_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("downloads");
        let path = persist_file(&target, "a.txt", b"hello").await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"hello");

        // Only the final file remains
        let leftovers: Vec<_> = std::fs::read_dir(&target).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_persist_file_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        assert!(persist_file(dir.path(), "../escape", b"x").await.is_err());
        assert!(persist_file(dir.path(), "..", b"x").await.is_err());
    }

    #[test]
    fn test_is_safe_name() {
        assert!(is_safe_name("a.txt"));
        assert!(!is_safe_name("dir/a.txt"));
        assert!(!is_safe_name(""));
    }
}
