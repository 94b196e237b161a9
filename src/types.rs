//! Core types for otter-dl
//!
//! A [`Download`] describes one transfer, keyed by its absolute local path.
//! Transitions are pure: `with_progress` and `with_status` produce new
//! values and all persistence flows through the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A download record, keyed by `path`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Download {
    /// Absolute HTTP(S) source URL. Empty only on the synthetic `Pending`
    /// record returned for unknown paths.
    pub url: String,
    /// Absolute destination path; the record's primary key.
    pub path: String,
    /// Percent complete in `[0.0, 100.0]`.
    pub progress: f64,
    /// Current lifecycle state.
    pub status: DownloadStatus,
    /// Opaque platform resume hint. Never required: the size of
    /// `<path>.download` is the resume point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_data_path: Option<String>,
}

/// Lifecycle state of a download
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DownloadStatus {
    /// Status could not be determined.
    #[default]
    Unknown,
    /// No record exists for this path yet.
    Pending,
    /// Created and ready to start.
    Idle,
    /// Transfer is running.
    InProgress,
    /// Transfer was running and has been paused.
    Paused,
    /// Cancelled by the user or failed; never persisted.
    Cancelled,
    /// Finished successfully; never persisted.
    Completed,
}

impl Download {
    /// New record with updated progress; the status becomes `InProgress`.
    pub fn with_progress(&self, new_progress: f64) -> Download {
        Download {
            progress: new_progress,
            status: DownloadStatus::InProgress,
            ..self.clone()
        }
    }

    /// New record with the given status. `Completed` forces progress to 100.
    pub fn with_status(&self, new_status: DownloadStatus) -> Download {
        Download {
            progress: if new_status == DownloadStatus::Completed {
                100.0
            } else {
                self.progress
            },
            status: new_status,
            ..self.clone()
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            DownloadStatus::Unknown => "Unknown",
            DownloadStatus::Pending => "Pending",
            DownloadStatus::Idle => "Idle",
            DownloadStatus::InProgress => "InProgress",
            DownloadStatus::Paused => "Paused",
            DownloadStatus::Cancelled => "Cancelled",
            DownloadStatus::Completed => "Completed",
        };
        write!(f, "{}", text)
    }
}

/// Uniform result of every mutating engine call.
///
/// `expected_status` is the status a successful transition from the prior
/// state would produce; `is_expected_status` is true iff the returned
/// record actually carries it, letting callers detect no-op transitions
/// (e.g. pause while `Idle`) without another round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub download: Download,
    pub expected_status: DownloadStatus,
    pub is_expected_status: bool,
}

impl ActionResponse {
    /// Response for a transition that took effect.
    pub fn new(download: Download) -> Self {
        let expected_status = download.status.clone();
        Self {
            download,
            expected_status,
            is_expected_status: true,
        }
    }

    /// Response reporting the current record against the status the caller
    /// was aiming for.
    pub fn with_expected_status(download: Download, expected_status: DownloadStatus) -> Self {
        let is_expected_status = download.status == expected_status;
        Self {
            download,
            expected_status,
            is_expected_status,
        }
    }
}
