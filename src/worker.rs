//! Transfer worker
//!
//! One worker performs one attempt at a transfer for one record: an HTTP
//! GET streamed into `<path>.download` in append mode, resumed with a
//! `Range` header when a partial file exists, then renamed over the final
//! path. Progress is throttled to 1 % increments, and every emit-worthy
//! tick re-reads the record so an engine-side pause or removal is observed
//! within one iteration. Failures route to the engine's error handler; the
//! worker itself never mutates state on the cancel path.

use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::RANGE;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::engine::{DownloadEngine, filename};
use crate::error::EngineError;
use crate::types::{Download, DownloadStatus};

/// Suffix of the partial file written during a transfer.
pub(crate) const DOWNLOAD_SUFFIX: &str = ".download";

// Skip progress emits below this increment.
const PROGRESS_THRESHOLD: f64 = 1.0;

/// Partial-file path for a destination path.
pub(crate) fn temp_path(path: &str) -> String {
    format!("{}{}", path, DOWNLOAD_SUFFIX)
}

/// Percent complete; 0 while the total is unknown.
pub(crate) fn percent(downloaded: u64, total: u64) -> f64 {
    if total > 0 {
        (downloaded as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

pub(crate) struct TransferWorker {
    engine: Arc<DownloadEngine>,
    item: Download,
    cancel: CancellationToken,
}

impl TransferWorker {
    pub(crate) fn new(engine: Arc<DownloadEngine>, item: Download, cancel: CancellationToken) -> Self {
        Self {
            engine,
            item,
            cancel,
        }
    }

    /// Runs the transfer to completion, routing any failure to the engine.
    pub(crate) async fn run(self) {
        if let Err(e) = self.transfer().await {
            error!(file = %filename(&self.item.path), "Transfer failed: {}", e);
            self.engine.fail_transfer(&self.item.path).await;
        }
    }

    async fn transfer(&self) -> crate::Result<()> {
        let temp = temp_path(&self.item.path);

        // Size of the already-downloaded part, if any.
        let have = match fs::metadata(&temp).await {
            Ok(metadata) => metadata.len(),
            Err(_) => 0,
        };

        let mut request = self.engine.client.get(&self.item.url);
        if have > 0 {
            request = request.header(RANGE, format!("bytes={}-", have));
        }

        // A cancel or pause that lands while the request is in flight must
        // not leave a freshly created partial file behind, so the send is
        // raced against the token too.
        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            response = request.send() => response?,
        };
        let status = response.status();

        if have > 0 && status != StatusCode::PARTIAL_CONTENT {
            return Err(EngineError::Http(
                "Server does not support partial downloads".to_string(),
            ));
        }
        if status == StatusCode::NO_CONTENT {
            return Err(EngineError::Http("Empty response body".to_string()));
        }
        if !status.is_success() {
            return Err(EngineError::Http(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("unknown")
            )));
        }

        // Total size counts what the partial file already holds; 0 means
        // unknown and progress stays at 0 until completion.
        let total = response.content_length().map(|len| len + have).unwrap_or(0);

        if let Some(parent) = Path::new(&temp).parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    EngineError::File(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&temp)
            .await
            .map_err(|e| EngineError::File(format!("Failed to open {}: {}", temp, e)))?;

        let mut stream = response.bytes_stream();
        let mut downloaded = have;
        let mut last_emitted = 0.0;

        loop {
            let chunk = tokio::select! {
                // Pause and cancel have already been recorded by the engine;
                // just stop reading.
                _ = self.cancel.cancelled() => {
                    file.flush().await.ok();
                    return Ok(());
                }
                chunk = stream.next() => match chunk {
                    Some(chunk) => chunk
                        .map_err(|e| EngineError::Http(format!("Failed to read body: {}", e)))?,
                    None => break,
                },
            };

            file.write_all(&chunk)
                .await
                .map_err(|e| EngineError::File(format!("Failed to write {}: {}", temp, e)))?;
            downloaded += chunk.len() as u64;

            let progress = percent(downloaded, total);
            if progress < 100.0 && progress - last_emitted <= PROGRESS_THRESHOLD {
                continue;
            }
            last_emitted = progress;

            match self.engine.store.find_by_path(&self.item.path) {
                Some(current) if current.status == DownloadStatus::InProgress => {
                    // At 100% the terminal Completed event is imminent;
                    // an InProgress emit here would claim full progress
                    // without being complete.
                    if progress < 100.0 {
                        let updated = current.with_progress(progress);
                        self.engine.store.update(updated.clone(), false);
                        self.engine.events.emit(updated);
                    }
                }
                Some(current) if current.status == DownloadStatus::Paused => {
                    // Leave the partial file for a later resume.
                    file.flush().await.ok();
                    return Ok(());
                }
                _ => {
                    // Record removed under us; the engine owns cleanup.
                    return Ok(());
                }
            }
        }

        file.flush()
            .await
            .map_err(|e| EngineError::File(format!("Failed to flush {}: {}", temp, e)))?;
        file.sync_all()
            .await
            .map_err(|e| EngineError::File(format!("Failed to sync {}: {}", temp, e)))?;
        drop(file);

        self.finish(&temp).await
    }

    /// Commits the finished transfer: the record leaves the store and the
    /// partial file becomes the final artifact.
    async fn finish(&self, temp: &str) -> crate::Result<()> {
        let current = match self.engine.store.find_by_path(&self.item.path) {
            Some(current) if current.status == DownloadStatus::InProgress => current,
            // Paused or removed in the last instants; keep the partial file
            // and let the recorded status stand.
            _ => return Ok(()),
        };

        let dest = Path::new(&self.item.path);
        if let Some(parent) = dest.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    EngineError::File(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }
        if fs::metadata(dest).await.is_ok() {
            fs::remove_file(dest).await.map_err(|e| {
                EngineError::File(format!("Failed to replace {}: {}", dest.display(), e))
            })?;
        }

        self.engine.store.remove(&self.item.path);
        fs::rename(temp, dest).await.map_err(|e| {
            EngineError::File(format!("Failed to move {} into place: {}", temp, e))
        })?;
        self.engine
            .events
            .emit(current.with_status(DownloadStatus::Completed));
        debug!(file = %filename(&self.item.path), "Download completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_path_appends_suffix() {
        assert_eq!(temp_path("/t/a.bin"), "/t/a.bin.download");
    }

    #[test]
    fn percent_of_known_total() {
        assert_eq!(percent(0, 1000), 0.0);
        assert_eq!(percent(500, 1000), 50.0);
        assert_eq!(percent(1000, 1000), 100.0);
    }

    #[test]
    fn percent_is_zero_while_total_unknown() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(123_456, 0), 0.0);
    }
}
