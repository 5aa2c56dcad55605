//! The upstream websocket consumer: a dedicated background task that owns
//! one firehose connection and fans `create`/`delete` commit events out to
//! every active feed, checkpointing a cursor through a pluggable store.

use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::SinkExt;
use futures_util::StreamExt;
use http::HeaderValue;
use http::Uri;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tokio_websockets::{ClientBuilder, Message};

use crate::post::PostRecord;
use crate::registry::Registry;

const MAX_MESSAGE_SIZE: usize = 25_000;
const CHECKPOINT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(120);
const POST_COLLECTION: &str = "app.bsky.feed.post";

/// Persists and restores the resume cursor (the upstream event stream's
/// `time_us`). A reconnect asks for the last checkpointed value.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, hostname: &str) -> Result<Option<i64>>;
    async fn save(&self, hostname: &str, time_us: i64) -> Result<()>;
}

/// Keeps the cursor in memory only; the default for local runs and tests.
#[derive(Default)]
pub struct InMemoryCursorStore {
    value: std::sync::Mutex<Option<i64>>,
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn load(&self, _hostname: &str) -> Result<Option<i64>> {
        Ok(*self.value.lock().unwrap())
    }

    async fn save(&self, _hostname: &str, time_us: i64) -> Result<()> {
        *self.value.lock().unwrap() = Some(time_us);
        Ok(())
    }
}

/// Checkpoints the cursor to a small JSON file on disk, one per hostname
/// (sanitized into the filename), so a process restart resumes near where
/// it left off without a database.
pub struct FileCursorStore {
    dir: std::path::PathBuf,
}

impl FileCursorStore {
    pub fn new(dir: impl Into<std::path::PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, hostname: &str) -> std::path::PathBuf {
        let safe: String = hostname.chars().map(|c| if c.is_alphanumeric() || c == '.' || c == '-' { c } else { '_' }).collect();
        self.dir.join(format!("cursor_{safe}.json"))
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Checkpoint {
    time_us: i64,
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self, hostname: &str) -> Result<Option<i64>> {
        let path = self.path_for(hostname);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let checkpoint: Checkpoint = serde_json::from_slice(&bytes).context("corrupt cursor checkpoint")?;
                Ok(Some(checkpoint.time_us))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).context("reading cursor checkpoint"),
        }
    }

    async fn save(&self, hostname: &str, time_us: i64) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.context("creating cursor checkpoint directory")?;
        let bytes = serde_json::to_vec(&Checkpoint { time_us })?;
        tokio::fs::write(self.path_for(hostname), bytes).await.context("writing cursor checkpoint")
    }
}

#[derive(Clone)]
pub struct ConsumerConfig {
    pub hostname: String,
    pub user_agent: String,
    pub collections: Vec<String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            user_agent: "feedpipe/0.1".to_string(),
            collections: vec![POST_COLLECTION.to_string()],
        }
    }
}

pub struct ConsumerTask {
    config: ConsumerConfig,
    registry: Arc<Registry>,
    cursor_store: Arc<dyn CursorStore>,
    cancel: CancellationToken,
}

impl ConsumerTask {
    pub fn new(config: ConsumerConfig, registry: Arc<Registry>, cursor_store: Arc<dyn CursorStore>, cancel: CancellationToken) -> Self {
        Self {
            config,
            registry,
            cursor_store,
            cancel,
        }
    }

    pub async fn run(&self) -> Result<()> {
        tracing::info!(hostname = %self.config.hostname, "firehose consumer starting");

        let resume_cursor = self.cursor_store.load(&self.config.hostname).await?;

        let uri = Uri::from_str(&format!("wss://{}/subscribe?requireHello=true", self.config.hostname)).context("invalid firehose url")?;

        let (mut client, _) = ClientBuilder::from_uri(uri)
            .add_header(http::header::USER_AGENT, HeaderValue::from_str(&self.config.user_agent)?)
            .connect()
            .await
            .context("cannot connect to firehose")?;

        let update = model::SubscriberSourcedMessage::Update {
            wanted_collections: self.config.collections.clone(),
            wanted_dids: vec![],
            max_message_size_bytes: MAX_MESSAGE_SIZE as u64,
            cursor: resume_cursor,
        };
        let serialized = serde_json::to_string(&update).context("cannot serialize subscribe frame")?;
        client.send(Message::text(serialized)).await.context("cannot send subscribe frame")?;

        let checkpoint_sleeper = sleep(CHECKPOINT_INTERVAL);
        tokio::pin!(checkpoint_sleeper);

        let observed_cursor = AtomicI64::new(resume_cursor.unwrap_or(0));

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    break;
                }
                () = &mut checkpoint_sleeper => {
                    let time_us = observed_cursor.load(Ordering::Relaxed);
                    if time_us > 0 {
                        if let Err(err) = self.cursor_store.save(&self.config.hostname, time_us).await {
                            tracing::warn!(error = ?err, "failed to checkpoint firehose cursor");
                        }
                    }
                    checkpoint_sleeper.as_mut().reset(Instant::now() + CHECKPOINT_INTERVAL);
                }
                item = client.next() => {
                    let Some(item) = item else {
                        tracing::warn!("firehose connection closed");
                        break;
                    };
                    let message = match item {
                        Ok(message) => message,
                        Err(err) => {
                            tracing::error!(error = ?err, "error reading firehose frame");
                            continue;
                        }
                    };
                    if !message.is_text() {
                        continue;
                    }
                    let Some(text) = message.as_text() else { continue };
                    let event: model::Event = match serde_json::from_str(text) {
                        Ok(event) => event,
                        Err(err) => {
                            tracing::debug!(error = ?err, "cannot deserialize firehose event");
                            continue;
                        }
                    };

                    observed_cursor.fetch_max(event.time_us, Ordering::Relaxed);

                    if event.kind != "commit" {
                        continue;
                    }
                    let Some(commit) = event.commit else { continue };
                    self.handle_commit(&event.did, commit).await;
                }
            }
        }

        tracing::info!("firehose consumer stopped");
        Ok(())
    }

    async fn handle_commit(&self, did: &str, commit: model::CommitOp) {
        match commit {
            model::CommitOp::Create { collection, rkey, record, cid, .. } => {
                if collection != POST_COLLECTION {
                    return;
                }
                let post: PostRecord = match serde_json::from_value(record) {
                    Ok(post) => post,
                    Err(err) => {
                        tracing::debug!(error = ?err, "cannot decode post record");
                        return;
                    }
                };
                let indexed_at = chrono::Utc::now();
                let langs = post.langs.clone().unwrap_or_default();

                for feed in self.registry.active_feeds().await {
                    if feed.test(did, &rkey, &post) {
                        if let Err(err) = feed.add_post(did, &rkey, &cid, indexed_at, langs.clone()).await {
                            tracing::warn!(feed = feed.id(), error = ?err, "failed to add post to feed");
                        }
                    }
                }
            }
            model::CommitOp::Delete { collection, rkey, .. } => {
                if collection != POST_COLLECTION {
                    return;
                }
                for feed in self.registry.active_feeds().await {
                    let post_uri = match crate::at_uri::PostUri::from_parts(did, &rkey) {
                        Ok(uri) => uri,
                        Err(_) => continue,
                    };
                    if feed.get_post(&post_uri).is_some() {
                        if let Err(err) = feed.delete_post(did, &rkey).await {
                            tracing::warn!(feed = feed.id(), error = ?err, "failed to delete post from feed");
                        }
                    }
                }
            }
            model::CommitOp::Update { .. } => {}
        }
    }
}

mod model {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type", content = "payload")]
    pub enum SubscriberSourcedMessage {
        #[serde(rename = "options_update")]
        Update {
            #[serde(rename = "wantedCollections")]
            wanted_collections: Vec<String>,
            #[serde(rename = "wantedDids", skip_serializing_if = "Vec::is_empty", default)]
            wanted_dids: Vec<String>,
            #[serde(rename = "maxMessageSizeBytes")]
            max_message_size_bytes: u64,
            #[serde(skip_serializing_if = "Option::is_none")]
            cursor: Option<i64>,
        },
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(tag = "operation")]
    pub enum CommitOp {
        #[serde(rename = "create")]
        Create {
            #[allow(dead_code)]
            rev: String,
            collection: String,
            rkey: String,
            record: serde_json::Value,
            cid: String,
        },
        #[serde(rename = "update")]
        Update {
            #[allow(dead_code)]
            rev: String,
            collection: String,
            #[allow(dead_code)]
            rkey: String,
            #[allow(dead_code)]
            record: serde_json::Value,
            #[allow(dead_code)]
            cid: String,
        },
        #[serde(rename = "delete")]
        Delete {
            #[allow(dead_code)]
            rev: String,
            collection: String,
            rkey: String,
        },
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct Event {
        pub did: String,
        pub kind: String,
        pub time_us: i64,
        pub commit: Option<CommitOp>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_cursor_store_round_trips() {
        let store = InMemoryCursorStore::default();
        assert_eq!(store.load("host").await.unwrap(), None);
        store.save("host", 42).await.unwrap();
        assert_eq!(store.load("host").await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn file_cursor_store_round_trips() {
        let dir = std::env::temp_dir().join(format!("feedpipe-cursor-test-{}", std::process::id()));
        let store = FileCursorStore::new(dir.clone());
        assert_eq!(store.load("jetstream.example").await.unwrap(), None);
        store.save("jetstream.example", 100).await.unwrap();
        assert_eq!(store.load("jetstream.example").await.unwrap(), Some(100));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn event_deserializes_a_create_commit() {
        let raw = r#"{
            "did": "did:plc:a",
            "time_us": 123,
            "kind": "commit",
            "commit": {
                "operation": "create",
                "rev": "abc",
                "collection": "app.bsky.feed.post",
                "rkey": "r1",
                "cid": "cid1",
                "record": {"$type": "app.bsky.feed.post", "text": "hi", "langs": ["en"]}
            }
        }"#;
        let event: model::Event = serde_json::from_str(raw).unwrap();
        assert_eq!(event.did, "did:plc:a");
        match event.commit.unwrap() {
            model::CommitOp::Create { collection, rkey, .. } => {
                assert_eq!(collection, "app.bsky.feed.post");
                assert_eq!(rkey, "r1");
            }
            _ => panic!("expected create"),
        }
    }

    #[test]
    fn event_deserializes_a_delete_commit() {
        let raw = r#"{
            "did": "did:plc:a",
            "time_us": 124,
            "kind": "commit",
            "commit": {
                "operation": "delete",
                "rev": "abc",
                "collection": "app.bsky.feed.post",
                "rkey": "r1"
            }
        }"#;
        let event: model::Event = serde_json::from_str(raw).unwrap();
        match event.commit.unwrap() {
            model::CommitOp::Delete { rkey, .. } => assert_eq!(rkey, "r1"),
            _ => panic!("expected delete"),
        }
    }
}
