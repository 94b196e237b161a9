//! Persistent record store
//!
//! A serialized, JSON-file-backed map from path to [`Download`]. Every call
//! takes the single inner lock, so the store's operations form a
//! linearizable sequence. Persisted mutations re-encode the whole array and
//! commit it atomically (temp sibling, fsync, rename); save failures are
//! logged and swallowed — in-memory state stays authoritative and the next
//! successful save resynchronizes the file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::types::Download;

/// JSON-array-backed store of download records.
#[derive(Debug)]
pub struct Store {
    inner: parking_lot::Mutex<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    downloads: Vec<Download>,
    path: PathBuf,
}

impl Store {
    /// Opens the store backed by the given file.
    ///
    /// A missing or corrupt file yields an empty store; corruption is
    /// logged, not surfaced.
    pub fn open(path: PathBuf) -> Self {
        let downloads = match fs::read(&path) {
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(items) => items,
                Err(e) => {
                    warn!(file = %path.display(), "Discarding unreadable store file: {}", e);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        Self {
            inner: parking_lot::Mutex::new(StoreInner { downloads, path }),
        }
    }

    /// Snapshot of all records, in insertion order.
    pub fn list(&self) -> Vec<Download> {
        self.inner.lock().downloads.clone()
    }

    /// Looks up the record for a path.
    pub fn find_by_path(&self, path: &str) -> Option<Download> {
        self.inner
            .lock()
            .downloads
            .iter()
            .find(|i| i.path == path)
            .cloned()
    }

    /// First record with the given source URL. Convenience only; URLs are
    /// not unique.
    pub fn find_by_url(&self, url: &str) -> Option<Download> {
        self.inner
            .lock()
            .downloads
            .iter()
            .find(|i| i.url == url)
            .cloned()
    }

    /// Appends a record and persists. Returns false (and changes nothing)
    /// when a record for the path already exists.
    pub fn append(&self, item: Download) -> bool {
        let mut inner = self.inner.lock();
        if inner.downloads.iter().any(|i| i.path == item.path) {
            return false;
        }
        inner.downloads.push(item);
        save(&inner);
        true
    }

    /// Replaces the record with the same path, if present.
    ///
    /// `persist = false` updates memory only — the escape hatch for
    /// progress ticks, which would otherwise rewrite the file up to a
    /// hundred times per download.
    pub fn update(&self, item: Download, persist: bool) {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.downloads.iter_mut().find(|i| i.path == item.path) {
            *existing = item;
        }
        if persist {
            save(&inner);
        }
    }

    /// Removes the record for a path and persists.
    pub fn remove(&self, path: &str) {
        let mut inner = self.inner.lock();
        inner.downloads.retain(|i| i.path != path);
        save(&inner);
    }
}

// Full-array commit: encode, write a temp sibling, fsync, rename over the
// target. The previous file survives any failure.
fn save(inner: &StoreInner) {
    if let Err(e) = try_save(inner) {
        warn!(file = %inner.path.display(), "Failed to save download store: {}", e);
    }
}

fn try_save(inner: &StoreInner) -> std::io::Result<()> {
    if let Some(parent) = inner.path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let data = serde_json::to_vec(&inner.downloads)?;
    let temp_path = temp_sibling(&inner.path);
    {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, &inner.path)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}
