//! Host-bridge boundary adapter
//!
//! Serializable command and reply types plus a thin dispatcher, so an
//! embedding runtime (IPC, RPC, plugin bridge) can drive the engine without
//! linking against its API directly. The event side is a forwarding task
//! draining the engine's subscription into a caller-supplied sink.

use serde::{Deserialize, Serialize};

use crate::engine::DownloadEngine;
use crate::types::{ActionResponse, Download};

/// A command arriving from the host bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum Command {
    List,
    Get { path: String },
    Create { path: String, url: String },
    Start { path: String },
    Pause { path: String },
    Resume { path: String },
    Cancel { path: String },
}

/// Reply to a bridge command
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Downloads(Vec<Download>),
    Download(Box<Download>),
    Action(Box<ActionResponse>),
}

/// Translate one bridge command into the matching engine call.
pub async fn dispatch(engine: &DownloadEngine, command: Command) -> crate::Result<Reply> {
    match command {
        Command::List => Ok(Reply::Downloads(engine.list())),
        Command::Get { path } => Ok(Reply::Download(Box::new(engine.get(&path)?))),
        Command::Create { path, url } => {
            Ok(Reply::Action(Box::new(engine.create(&path, &url)?)))
        }
        Command::Start { path } => Ok(Reply::Action(Box::new(engine.start(&path)?))),
        Command::Pause { path } => Ok(Reply::Action(Box::new(engine.pause(&path)?))),
        Command::Resume { path } => Ok(Reply::Action(Box::new(engine.resume(&path)?))),
        Command::Cancel { path } => Ok(Reply::Action(Box::new(engine.cancel(&path).await?))),
    }
}

/// Stream every record-changed event into the host's event channel.
///
/// The task ends when the engine is dropped; dropping the returned handle
/// aborts forwarding without touching the engine.
pub fn forward_events<F>(engine: &DownloadEngine, sink: F) -> tokio::task::JoinHandle<()>
where
    F: Fn(Download) + Send + 'static,
{
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Some(item) = events.recv().await {
            sink(item);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::DownloadStatus;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_engine(dir: &TempDir) -> Arc<DownloadEngine> {
        let config = EngineConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        DownloadEngine::new(config).unwrap()
    }

    #[test]
    fn commands_deserialize_from_tagged_json() {
        let command: Command =
            serde_json::from_str(r#"{"cmd":"create","path":"/t/a.bin","url":"https://example.com/a"}"#)
                .unwrap();
        assert!(matches!(command, Command::Create { .. }));

        let command: Command = serde_json::from_str(r#"{"cmd":"list"}"#).unwrap();
        assert!(matches!(command, Command::List));

        let command: Command =
            serde_json::from_str(r#"{"cmd":"pause","path":"/t/a.bin"}"#).unwrap();
        assert!(matches!(command, Command::Pause { .. }));
    }

    #[tokio::test]
    async fn dispatch_translates_to_engine_calls() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);

        let reply = dispatch(
            &engine,
            Command::Create {
                path: "/t/a.bin".to_string(),
                url: "https://example.com/a.bin".to_string(),
            },
        )
        .await
        .unwrap();
        match reply {
            Reply::Action(response) => {
                assert_eq!(response.download.status, DownloadStatus::Idle);
                assert!(response.is_expected_status);
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        let reply = dispatch(&engine, Command::List).await.unwrap();
        match reply {
            Reply::Downloads(items) => assert_eq!(items.len(), 1),
            other => panic!("unexpected reply: {:?}", other),
        }

        let reply = dispatch(
            &engine,
            Command::Get {
                path: "/t/unknown.bin".to_string(),
            },
        )
        .await
        .unwrap();
        match reply {
            Reply::Download(item) => assert_eq!(item.status, DownloadStatus::Pending),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn replies_serialize_in_wire_shape() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);

        let reply = dispatch(
            &engine,
            Command::Create {
                path: "/t/a.bin".to_string(),
                url: "https://example.com/a.bin".to_string(),
            },
        )
        .await
        .unwrap();

        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["download"]["path"], "/t/a.bin");
        assert_eq!(json["download"]["status"], "idle");
        assert_eq!(json["expectedStatus"], "idle");
        assert_eq!(json["isExpectedStatus"], true);
    }

    #[tokio::test]
    async fn forward_events_reaches_the_sink() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _forwarder = forward_events(&engine, move |item| {
            let _ = tx.send(item);
        });

        engine
            .create("/t/a.bin", "https://example.com/a.bin")
            .unwrap();

        let forwarded = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .expect("event should be forwarded")
            .unwrap();
        assert_eq!(forwarded.path, "/t/a.bin");
        assert_eq!(forwarded.status, DownloadStatus::Idle);
    }
}
