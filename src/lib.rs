//! # otter-dl
//!
//! A resumable, crash-safe multi-download engine.
//!
//! ## Features
//!
//! - **Path-keyed lifecycle**: create, start, pause, resume and cancel
//!   downloads to caller-chosen absolute paths
//! - **Resume over restarts**: `Range`-based resumption from the partial
//!   file, with startup reconciliation of records a dead process left behind
//! - **Crash-safe store**: a single JSON record file committed atomically
//! - **Lossy change events**: bounded per-subscriber buffers that never
//!   block the engine
//! - **Async**: built on Tokio, one streaming transfer task per download
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use otter_dl::{DownloadEngine, EngineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig {
//!         data_dir: "/tmp/my-app".into(),
//!         ..Default::default()
//!     };
//!     let engine = DownloadEngine::new(config)?;
//!
//!     let mut events = engine.subscribe();
//!     engine.create("/tmp/my-app/file.zip", "https://example.com/file.zip")?;
//!     engine.start("/tmp/my-app/file.zip")?;
//!
//!     while let Some(item) = events.recv().await {
//!         println!("{} {:.0}% ({})", item.path, item.progress, item.status);
//!     }
//!
//!     Ok(())
//! }
//! ```

// Modules
pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod store;
pub mod types;
pub mod validate;

mod worker;

// Re-exports for convenience
pub use config::EngineConfig;
pub use engine::DownloadEngine;
pub use error::{EngineError, Result};
pub use events::{EventBus, EventStream};
pub use store::Store;
pub use types::{ActionResponse, Download, DownloadStatus};
