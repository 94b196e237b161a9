//! Download engine - main coordinator
//!
//! The [`DownloadEngine`] is the entry point of the crate. It owns the
//! persistent [`Store`], the [`EventBus`] and the map of running transfer
//! workers, and enforces the lifecycle state machine: every mutating call
//! reads the record, checks the transition is legal, writes the store,
//! emits the changed record and only then spawns or signals a worker.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use once_cell::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EventBus, EventStream};
use crate::store::Store;
use crate::types::{ActionResponse, Download, DownloadStatus};
use crate::validate;
use crate::worker::{self, TransferWorker};

static GLOBAL: OnceCell<Arc<DownloadEngine>> = OnceCell::new();

/// Handle to a running transfer worker
struct WorkerHandle {
    id: u64,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

/// The download engine
pub struct DownloadEngine {
    /// Weak self-reference for handing spawned workers an owning `Arc`
    self_ref: Weak<Self>,

    /// Persistent record store
    pub(crate) store: Store,

    /// Record-changed event fanout
    pub(crate) events: EventBus,

    /// Shared HTTP client for all transfers
    pub(crate) client: reqwest::Client,

    /// Running workers, at most one per path
    workers: parking_lot::Mutex<HashMap<String, WorkerHandle>>,

    next_worker_id: AtomicU64,
}

impl DownloadEngine {
    /// Create an engine against the given configuration.
    ///
    /// Opens the store from `<data_dir>/downloads.json` and reconciles
    /// records left `InProgress` by an earlier process: a transfer that was
    /// mid-flight when the process ended cannot resume implicitly, so it is
    /// rewritten to `Idle` (nothing received) or `Paused` (partial data on
    /// disk). Reconciliation emits no events.
    pub fn new(config: EngineConfig) -> crate::Result<Arc<Self>> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .read_timeout(Duration::from_secs(config.read_timeout))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| EngineError::Http(format!("Failed to create HTTP client: {}", e)))?;

        let engine = Arc::new_cyclic(|weak| Self {
            self_ref: weak.clone(),
            store: Store::open(config.store_path()),
            events: EventBus::new(config.event_capacity),
            client,
            workers: parking_lot::Mutex::new(HashMap::new()),
            next_worker_id: AtomicU64::new(0),
        });

        engine.reconcile();

        Ok(engine)
    }

    /// Process-wide engine, initialized by the first caller.
    ///
    /// Later calls return the same instance and ignore their configuration.
    /// Tests construct engines directly with [`DownloadEngine::new`].
    pub fn global(config: EngineConfig) -> crate::Result<Arc<Self>> {
        GLOBAL.get_or_try_init(|| Self::new(config)).cloned()
    }

    /// The global engine, if one has been initialized.
    pub fn try_global() -> Option<Arc<Self>> {
        GLOBAL.get().cloned()
    }

    /// Obtain a strong `Arc<Self>` for spawning workers from `&self`.
    fn arc(&self) -> crate::Result<Arc<Self>> {
        self.self_ref.upgrade().ok_or(EngineError::Shutdown)
    }

    // Repair records stranded by a process that died mid-transfer.
    fn reconcile(&self) {
        for item in self.store.list() {
            if item.status != DownloadStatus::InProgress {
                continue;
            }

            let new_status = if item.progress == 0.0 {
                DownloadStatus::Idle
            } else {
                DownloadStatus::Paused
            };
            self.store.update(item.with_status(new_status.clone()), true);
            info!(file = %filename(&item.path), status = %new_status, "Repaired stale download");
        }
    }

    /// Snapshot of all records.
    pub fn list(&self) -> Vec<Download> {
        self.store.list()
    }

    /// The record for a path, or a synthetic `Pending` record when no
    /// download exists there. The synthetic record is never persisted; a
    /// later `create` turns it into a real `Idle` one.
    pub fn get(&self, path: &str) -> crate::Result<Download> {
        let path = validate::parse_path(path)?;
        match self.store.find_by_path(&path) {
            Some(item) => Ok(item),
            None => Ok(Download {
                url: String::new(),
                path,
                progress: 0.0,
                status: DownloadStatus::Pending,
                resume_data_path: None,
            }),
        }
    }

    /// Create a download record in `Idle` state.
    ///
    /// Creating over an existing path is a no-op response carrying the
    /// existing record; its URL is left unchanged.
    pub fn create(&self, path: &str, url: &str) -> crate::Result<ActionResponse> {
        let path = validate::parse_path(path)?;
        validate::validate_url(url)?;

        if let Some(existing) = self.store.find_by_path(&path) {
            return Ok(ActionResponse::with_expected_status(
                existing,
                DownloadStatus::Idle,
            ));
        }

        let item = Download {
            url: url.to_string(),
            path,
            progress: 0.0,
            status: DownloadStatus::Idle,
            resume_data_path: None,
        };
        if !self.store.append(item.clone()) {
            // Lost a race with a concurrent create for the same path.
            let existing = self.store.find_by_path(&item.path).unwrap_or(item);
            return Ok(ActionResponse::with_expected_status(
                existing,
                DownloadStatus::Idle,
            ));
        }
        self.events.emit(item.clone());
        debug!(file = %filename(&item.path), "Download created");

        Ok(ActionResponse::new(item))
    }

    /// Start an `Idle` download.
    pub fn start(&self, path: &str) -> crate::Result<ActionResponse> {
        self.begin(path, DownloadStatus::Idle)
    }

    /// Resume a `Paused` download. Resumption is `Range`-based: the size of
    /// the partial file is the resume point.
    pub fn resume(&self, path: &str) -> crate::Result<ActionResponse> {
        self.begin(path, DownloadStatus::Paused)
    }

    fn begin(&self, path: &str, from: DownloadStatus) -> crate::Result<ActionResponse> {
        let path = validate::parse_path(path)?;
        let item = self
            .store
            .find_by_path(&path)
            .ok_or_else(|| EngineError::NotFound(path.clone()))?;

        if item.status != from {
            return Ok(ActionResponse::with_expected_status(
                item,
                DownloadStatus::InProgress,
            ));
        }

        let started = item.with_status(DownloadStatus::InProgress);
        self.store.update(started.clone(), true);
        self.events.emit(started.clone());
        self.spawn_worker(started.clone())?;
        debug!(file = %filename(&path), "Transfer started");

        Ok(ActionResponse::new(started))
    }

    /// Pause an `InProgress` download, leaving the partial file on disk.
    pub fn pause(&self, path: &str) -> crate::Result<ActionResponse> {
        let path = validate::parse_path(path)?;
        let item = self
            .store
            .find_by_path(&path)
            .ok_or_else(|| EngineError::NotFound(path.clone()))?;

        if item.status != DownloadStatus::InProgress {
            return Ok(ActionResponse::with_expected_status(
                item,
                DownloadStatus::Paused,
            ));
        }

        let paused = item.with_status(DownloadStatus::Paused);
        // The status flips before the worker is signalled, so a worker that
        // polls the store first still classifies the stop as a pause.
        self.store.update(paused.clone(), true);
        self.events.emit(paused.clone());
        if let Some(handle) = self.workers.lock().remove(&path) {
            handle.cancel.cancel();
        }
        debug!(file = %filename(&path), "Download paused");

        Ok(ActionResponse::new(paused))
    }

    /// Cancel a download in any non-terminal state.
    ///
    /// Removes the record and the partial file; the emitted record carries
    /// `Cancelled` even though it is no longer stored.
    pub async fn cancel(&self, path: &str) -> crate::Result<ActionResponse> {
        let path = validate::parse_path(path)?;
        let item = self
            .store
            .find_by_path(&path)
            .ok_or_else(|| EngineError::NotFound(path.clone()))?;

        match item.status {
            DownloadStatus::Idle | DownloadStatus::InProgress | DownloadStatus::Paused => {
                if let Some(handle) = self.workers.lock().remove(&path) {
                    handle.cancel.cancel();
                }
                remove_temp_file(&path).await;
                self.store.remove(&path);

                let cancelled = item.with_status(DownloadStatus::Cancelled);
                self.events.emit(cancelled.clone());
                debug!(file = %filename(&path), "Download cancelled");

                Ok(ActionResponse::new(cancelled))
            }
            _ => Ok(ActionResponse::with_expected_status(
                item,
                DownloadStatus::Cancelled,
            )),
        }
    }

    /// Worker error handler: a failed transfer ends like a cancellation.
    ///
    /// The record is removed, the partial file deleted and a `Cancelled`
    /// event emitted; the failure reason lives in the logs only.
    pub(crate) async fn fail_transfer(&self, path: &str) {
        let item = match self.store.find_by_path(path) {
            Some(item) => item,
            // Already cancelled or completed concurrently.
            None => return,
        };

        self.store.remove(path);
        remove_temp_file(path).await;
        self.events.emit(item.with_status(DownloadStatus::Cancelled));
    }

    /// Subscribe to record-changed events.
    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    /// Cancel all running workers and wait for them to wind down.
    pub async fn shutdown(&self) {
        let handles: Vec<WorkerHandle> = {
            let mut workers = self.workers.lock();
            workers.drain().map(|(_, handle)| handle).collect()
        };

        for handle in &handles {
            handle.cancel.cancel();
        }
        for handle in handles {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle.task).await;
        }
    }

    // Spawn the transfer worker for a path, replacing any live one so at
    // most one worker exists per path.
    fn spawn_worker(&self, item: Download) -> crate::Result<()> {
        let engine = self.arc()?;
        let cancel = CancellationToken::new();
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let path = item.path.clone();

        if let Some(previous) = self.workers.lock().remove(&path) {
            previous.cancel.cancel();
        }

        let worker = TransferWorker::new(Arc::clone(&engine), item, cancel.clone());
        let task = tokio::spawn({
            let path = path.clone();
            async move {
                worker.run().await;
                engine.release_worker(&path, id);
            }
        });

        self.workers
            .lock()
            .insert(path, WorkerHandle { id, cancel, task });
        Ok(())
    }

    // Drop a worker's handle when its task ends, unless the slot has
    // already been taken over by a replacement.
    fn release_worker(&self, path: &str, id: u64) {
        let mut workers = self.workers.lock();
        if workers.get(path).map(|handle| handle.id) == Some(id) {
            workers.remove(path);
        }
    }
}

impl Drop for DownloadEngine {
    fn drop(&mut self) {
        for handle in self.workers.lock().values() {
            handle.cancel.cancel();
        }
    }
}

/// File name component for log fields; falls back to the whole path.
pub(crate) fn filename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
}

// Best-effort partial-file cleanup; a missing file is the common case.
async fn remove_temp_file(path: &str) {
    let temp = worker::temp_path(path);
    if tokio::fs::remove_file(&temp).await.is_err() {
        debug!(file = %filename(path), "No partial file to delete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_engine(dir: &TempDir) -> Arc<DownloadEngine> {
        let config = EngineConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        DownloadEngine::new(config).expect("engine should construct")
    }

    #[tokio::test]
    async fn get_unknown_path_is_pending() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);

        let item = engine.get("/t/nothing.bin").unwrap();
        assert_eq!(item.status, DownloadStatus::Pending);
        assert_eq!(item.path, "/t/nothing.bin");
        assert!(item.url.is_empty());
        // Synthetic records are not persisted.
        assert!(engine.list().is_empty());
    }

    #[tokio::test]
    async fn create_then_recreate_is_noop() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);

        let first = engine
            .create("/t/a.bin", "https://example.com/a.bin")
            .unwrap();
        assert!(first.is_expected_status);
        assert_eq!(first.download.status, DownloadStatus::Idle);

        let second = engine
            .create("/t/a.bin", "https://other.example.com/b.bin")
            .unwrap();
        assert!(second.is_expected_status);
        // The original URL survives the no-op.
        assert_eq!(second.download.url, "https://example.com/a.bin");
        assert_eq!(engine.list().len(), 1);
    }

    #[tokio::test]
    async fn create_rejects_bad_arguments() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);

        assert!(matches!(
            engine.create("relative.bin", "https://example.com/a"),
            Err(EngineError::InvalidPath(_))
        ));
        assert!(matches!(
            engine.create("/t/a.bin", "ftp://example.com/a"),
            Err(EngineError::InvalidUrl(_))
        ));
        assert!(engine.list().is_empty());
    }

    #[tokio::test]
    async fn file_url_paths_normalize_to_the_same_record() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);

        engine
            .create("file:///t/a.bin", "https://example.com/a.bin")
            .unwrap();
        let item = engine.get("/t/a.bin").unwrap();
        assert_eq!(item.status, DownloadStatus::Idle);
    }

    #[tokio::test]
    async fn start_missing_record_is_not_found() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);

        for result in [
            engine.start("/t/missing.bin"),
            engine.resume("/t/missing.bin"),
            engine.pause("/t/missing.bin"),
            engine.cancel("/t/missing.bin").await,
        ] {
            assert!(matches!(result, Err(EngineError::NotFound(_))));
        }
    }

    #[tokio::test]
    async fn illegal_transitions_are_noops() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        engine
            .create("/t/a.bin", "https://example.com/a.bin")
            .unwrap();

        // Pause while Idle.
        let response = engine.pause("/t/a.bin").unwrap();
        assert_eq!(response.expected_status, DownloadStatus::Paused);
        assert!(!response.is_expected_status);
        assert_eq!(response.download.status, DownloadStatus::Idle);

        // Resume while Idle.
        let response = engine.resume("/t/a.bin").unwrap();
        assert_eq!(response.expected_status, DownloadStatus::InProgress);
        assert!(!response.is_expected_status);

        // The record never moved.
        assert_eq!(
            engine.get("/t/a.bin").unwrap().status,
            DownloadStatus::Idle
        );
    }

    #[tokio::test]
    async fn cancel_idle_removes_record_and_emits_cancelled() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        engine
            .create("/t/a.bin", "https://example.com/a.bin")
            .unwrap();
        let mut events = engine.subscribe();
        // Drain nothing: subscription starts after create's emit.

        let response = engine.cancel("/t/a.bin").await.unwrap();
        assert!(response.is_expected_status);
        assert_eq!(response.download.status, DownloadStatus::Cancelled);

        assert!(engine.store.find_by_path("/t/a.bin").is_none());
        let event = events.recv().await.unwrap();
        assert_eq!(event.status, DownloadStatus::Cancelled);

        // A second cancel has nothing to act on.
        assert!(matches!(
            engine.cancel("/t/a.bin").await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn reconciliation_repairs_stale_records() {
        let dir = TempDir::new().unwrap();
        let store_file = dir.path().join("downloads.json");
        std::fs::write(
            &store_file,
            r#"[
                {"url":"https://example.com/a","path":"/t/a.bin","progress":0.0,"status":"inProgress"},
                {"url":"https://example.com/b","path":"/t/b.bin","progress":42.0,"status":"inProgress"},
                {"url":"https://example.com/c","path":"/t/c.bin","progress":10.0,"status":"paused"}
            ]"#,
        )
        .unwrap();

        let engine = test_engine(&dir);
        assert_eq!(
            engine.get("/t/a.bin").unwrap().status,
            DownloadStatus::Idle
        );
        let b = engine.get("/t/b.bin").unwrap();
        assert_eq!(b.status, DownloadStatus::Paused);
        assert_eq!(b.progress, 42.0);
        assert_eq!(
            engine.get("/t/c.bin").unwrap().status,
            DownloadStatus::Paused
        );

        // The repair is persisted for the next process.
        let reread = test_engine(&dir);
        assert_eq!(
            reread.get("/t/b.bin").unwrap().status,
            DownloadStatus::Paused
        );
    }

    #[tokio::test]
    async fn store_never_holds_terminal_statuses() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        engine
            .create("/t/a.bin", "https://example.com/a.bin")
            .unwrap();
        engine.cancel("/t/a.bin").await.unwrap();

        for item in engine.list() {
            assert!(matches!(
                item.status,
                DownloadStatus::Idle | DownloadStatus::InProgress | DownloadStatus::Paused
            ));
        }
    }
}
