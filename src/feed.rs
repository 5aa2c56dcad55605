//! A feed composes its config snapshot, ordered block chain, and store into
//! the unit the registry manages: the test/add/delete path plus the
//! operator-facing command router.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::at_uri::{FeedUri, PostUri};
use crate::block::{build_chain, test_chain, Block, BlockDeps};
use crate::errors::CommandError;
use crate::feed_config::FeedConfig;
use crate::option_value::OptionBag;
use crate::post::PostRecord;
use crate::store::Store;

/// Config and block chain are swapped together so a reload is atomic: a
/// reader never observes a config from one generation paired with blocks
/// from another.
struct Snapshot {
    config: FeedConfig,
    blocks: Vec<Arc<dyn Block>>,
}

pub struct Feed {
    id: String,
    uri: FeedUri,
    snapshot: RwLock<Arc<Snapshot>>,
    store: Arc<Store>,
}

impl Feed {
    pub fn new(id: String, uri: FeedUri, config: FeedConfig, blocks: Vec<Arc<dyn Block>>, store: Arc<Store>) -> Self {
        Self {
            id,
            uri,
            snapshot: RwLock::new(Arc::new(Snapshot { config, blocks })),
            store,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn uri(&self) -> &FeedUri {
        &self.uri
    }

    /// A deep copy of the live config, safe for a caller to mutate without
    /// affecting the feed.
    pub fn config(&self) -> FeedConfig {
        self.snapshot.read().unwrap().config.clone()
    }

    /// Initializes the store from the remote editor. Called once by the
    /// registry right after construction.
    pub async fn load(&self) -> anyhow::Result<()> {
        self.store.load().await
    }

    /// The hot path: short-circuit conjunction over the block chain in
    /// configuration order. When `detailedLog` is set, records per-block
    /// latency and outcome.
    pub fn test(&self, did: &str, rkey: &str, post: &PostRecord) -> bool {
        let snapshot = self.snapshot.read().unwrap().clone();

        if !snapshot.config.detailed_log {
            return test_chain(&snapshot.blocks, did, rkey, post);
        }

        for block in snapshot.blocks.iter() {
            let started = Instant::now();
            let passed = block.test(did, rkey, post);
            tracing::debug!(
                feed = %self.id,
                block_type = block.block_type(),
                block_name = block.block_name(),
                passed,
                elapsed_us = started.elapsed().as_micros() as u64,
                "block evaluated"
            );
            if !passed {
                return false;
            }
        }
        true
    }

    pub async fn add_post(
        &self,
        did: &str,
        rkey: &str,
        cid: &str,
        indexed_at: DateTime<Utc>,
        langs: Vec<String>,
    ) -> anyhow::Result<()> {
        self.store.add(did, rkey, cid, indexed_at, langs).await
    }

    /// Runs every block's `pre_delete` hook, in chain order, before removing
    /// the post from the store.
    pub async fn delete_post(&self, did: &str, rkey: &str) -> anyhow::Result<()> {
        let blocks = self.snapshot.read().unwrap().blocks.clone();
        for block in &blocks {
            block.pre_delete(did, rkey);
        }
        self.store.delete(did, rkey).await
    }

    pub async fn delete_post_by_author(&self, did: &str) -> anyhow::Result<Vec<crate::post::PostRef>> {
        let blocks = self.snapshot.read().unwrap().blocks.clone();
        let doomed = self.store.list(Some(did));
        for post in &doomed {
            for block in &blocks {
                block.pre_delete(did, post.post_uri.rkey());
            }
        }
        self.store.delete_by_author(did).await
    }

    pub fn get_post(&self, post_uri: &PostUri) -> Option<crate::post::PostRef> {
        self.store.get_post(post_uri)
    }

    pub fn list_post(&self, did: Option<&str>) -> Vec<crate::post::PostRef> {
        self.store.list(did)
    }

    pub fn post_count(&self) -> usize {
        self.store.post_count()
    }

    /// Named gauges from every block that implements the metric-provider
    /// capability, plus the feed's own post count.
    pub fn metrics(&self) -> Vec<(String, f64)> {
        let snapshot = self.snapshot.read().unwrap().clone();
        let mut metrics = vec![("post_count".to_string(), self.post_count() as f64)];
        for block in snapshot.blocks.iter() {
            if let Some(block_metrics) = block.metrics() {
                metrics.extend(block_metrics);
            }
        }
        metrics
    }

    /// Trims the store to zero and resets every block's internal state.
    pub async fn clear(&self) -> anyhow::Result<()> {
        self.store.trim(0).await?;
        for block in self.snapshot.read().unwrap().blocks.iter() {
            block.reset()?;
        }
        Ok(())
    }

    /// Rebuilds the block chain from `config` and atomically swaps it in
    /// alongside the new config. Updates the store's trim policy to match.
    pub async fn reload(&self, config: FeedConfig, deps: &BlockDeps) -> anyhow::Result<()> {
        config.validate()?;
        let blocks = build_chain(&config.logic.blocks, deps).await?;
        self.store.set_trim_policy(config.store.trim_at, config.store.trim_remain);
        *self.snapshot.write().unwrap() = Arc::new(Snapshot { config, blocks });
        Ok(())
    }

    /// Dispatches `(command, args)` to the named block if it implements the
    /// command-processor capability.
    pub async fn process_command(
        &self,
        block_name: &str,
        command: &str,
        args: &OptionBag,
    ) -> Result<serde_json::Value, CommandError> {
        let blocks = self.snapshot.read().unwrap().blocks.clone();
        let block = blocks
            .iter()
            .find(|b| b.block_name() == block_name)
            .ok_or_else(|| CommandError::UnknownBlock(block_name.to_string()))?;

        match block.process_command(command, args).await {
            Some(Ok(value)) => Ok(value),
            Some(Err(err)) => Err(CommandError::Failed(err)),
            None => Err(CommandError::NotSupported(block_name.to_string())),
        }
    }

    /// Shuts down blocks in list order, then the store (which flushes and
    /// closes the editor).
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let blocks = self.snapshot.read().unwrap().blocks.clone();
        for block in &blocks {
            if let Err(err) = block.shutdown().await {
                tracing::warn!(feed = %self.id, block = block.block_name(), error = ?err, "block shutdown failed");
            }
        }
        self.store.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockConfig;
    use crate::editor::noop::NoopEditor;
    use crate::feed_config::{LogicConfig, StoreConfig};
    use crate::option_value::OptionValue;

    fn feed_uri() -> FeedUri {
        FeedUri::try_from("at://did:plc:owner/app.bsky.feed.generator/f1".to_string()).unwrap()
    }

    fn deps() -> BlockDeps {
        BlockDeps {
            http_client: reqwest::Client::new(),
        }
    }

    fn regex_block_config(value: &str, name: &str) -> BlockConfig {
        let mut options = OptionBag::default();
        options.insert("value", OptionValue::String(value.to_string()));
        BlockConfig {
            block_type: "regex".to_string(),
            name: Some(name.to_string()),
            options,
        }
    }

    async fn feed_with_blocks(configs: Vec<BlockConfig>) -> Feed {
        let blocks = build_chain(&configs, &deps()).await.unwrap();
        let config = FeedConfig {
            logic: LogicConfig { blocks: configs },
            store: StoreConfig::default(),
            detailed_log: false,
        };
        let store = Arc::new(Store::new(feed_uri(), Arc::new(NoopEditor), 0, 0));
        Feed::new("feed1".to_string(), feed_uri(), config, blocks, store)
    }

    #[tokio::test]
    async fn test_short_circuits_on_first_failing_block() {
        let feed = feed_with_blocks(vec![
            regex_block_config("launch", "a"),
            regex_block_config("nevermatches", "b"),
        ])
        .await;
        let post = PostRecord {
            text: "we launch today".to_string(),
            ..Default::default()
        };
        assert!(!feed.test("did:plc:a", "r1", &post));
    }

    #[tokio::test]
    async fn test_passes_when_every_block_passes() {
        let feed = feed_with_blocks(vec![regex_block_config("launch", "a")]).await;
        let post = PostRecord {
            text: "we launch today".to_string(),
            ..Default::default()
        };
        assert!(feed.test("did:plc:a", "r1", &post));
    }

    #[tokio::test]
    async fn add_then_delete_round_trips_through_the_store() {
        let feed = feed_with_blocks(vec![]).await;
        feed.add_post("did:plc:a", "r1", "cid1", Utc::now(), vec![]).await.unwrap();
        assert_eq!(feed.post_count(), 1);
        feed.delete_post("did:plc:a", "r1").await.unwrap();
        assert_eq!(feed.post_count(), 0);
    }

    #[tokio::test]
    async fn process_command_reports_unknown_block() {
        let feed = feed_with_blocks(vec![regex_block_config("launch", "a")]).await;
        let err = feed.process_command("missing", "list", &OptionBag::default()).await.unwrap_err();
        assert!(matches!(err, CommandError::UnknownBlock(name) if name == "missing"));
    }

    #[tokio::test]
    async fn process_command_reports_not_supported() {
        let feed = feed_with_blocks(vec![regex_block_config("launch", "a")]).await;
        let err = feed.process_command("a", "list", &OptionBag::default()).await.unwrap_err();
        assert!(matches!(err, CommandError::NotSupported(_)));
    }

    #[tokio::test]
    async fn process_command_dispatches_to_a_capable_block() {
        let mut options = OptionBag::default();
        options.insert("targetWord", OptionValue::StringArray(vec!["launch".to_string()]));
        let config = BlockConfig {
            block_type: "dropin".to_string(),
            name: Some("watcher".to_string()),
            options,
        };
        let feed = feed_with_blocks(vec![config]).await;
        let value = feed.process_command("watcher", "list", &OptionBag::default()).await.unwrap();
        assert!(value.get("watching").is_some());
    }

    #[tokio::test]
    async fn metrics_includes_post_count_and_block_gauges() {
        let mut options = OptionBag::default();
        options.insert("targetWord", OptionValue::StringArray(vec!["launch".to_string()]));
        let config = BlockConfig {
            block_type: "dropin".to_string(),
            name: Some("watcher".to_string()),
            options,
        };
        let feed = feed_with_blocks(vec![config]).await;
        feed.add_post("did:plc:a", "r1", "cid", Utc::now(), vec![]).await.unwrap();

        let metrics = feed.metrics();
        assert!(metrics.iter().any(|(name, value)| name == "post_count" && *value == 1.0));
        assert!(metrics.iter().any(|(name, _)| name == "watcher_watchlist_size"));
    }

    #[tokio::test]
    async fn reload_swaps_config_and_blocks_atomically() {
        let feed = feed_with_blocks(vec![regex_block_config("launch", "a")]).await;
        let new_config = FeedConfig {
            logic: LogicConfig {
                blocks: vec![regex_block_config("completely-different", "a")],
            },
            store: StoreConfig::default(),
            detailed_log: true,
        };
        feed.reload(new_config, &deps()).await.unwrap();

        assert!(feed.config().detailed_log);
        let post = PostRecord {
            text: "we launch today".to_string(),
            ..Default::default()
        };
        assert!(!feed.test("did:plc:a", "r1", &post));
    }

    #[tokio::test]
    async fn clear_trims_store_and_resets_blocks() {
        let mut options = OptionBag::default();
        options.insert("targetWord", OptionValue::StringArray(vec!["launch".to_string()]));
        let config = BlockConfig {
            block_type: "dropin".to_string(),
            name: Some("watcher".to_string()),
            options,
        };
        let feed = feed_with_blocks(vec![config]).await;
        feed.add_post("did:plc:a", "r1", "cid", Utc::now(), vec![]).await.unwrap();

        let post = PostRecord {
            text: "we launch today".to_string(),
            ..Default::default()
        };
        assert!(feed.test("did:plc:a", "r1", &post));

        feed.clear().await.unwrap();
        assert_eq!(feed.post_count(), 0);

        let watching = feed.process_command("watcher", "list", &OptionBag::default()).await.unwrap();
        assert_eq!(watching["watching"].as_array().unwrap().len(), 0);
    }
}
