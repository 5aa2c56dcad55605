//! Named feeds keyed by id: lifecycle, status tracking, and the reconcile
//! loop that keeps the live set in sync with a definition provider.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::at_uri::FeedUri;
use crate::block::{build_chain, BlockDeps};
use crate::editor::Editor;
use crate::feed::Feed;
use crate::feed_config::FeedConfig;
use crate::store::Store;

/// Bounded concurrency for `load_feeds`'s per-feed reconcile work.
const LOAD_CONCURRENCY: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    Active,
    Inactive,
    Error,
    Unknown,
}

/// The unit a definition provider persists and the registry reconciles
/// against on `load_feeds`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedDefinition {
    pub id: String,
    pub uri: FeedUri,
    pub config_file: Option<String>,
    pub inactive_start: Option<DateTime<Utc>>,
}

struct RegistryEntry {
    definition: FeedDefinition,
    feed: Option<Arc<Feed>>,
    status: FeedStatus,
    last_updated: DateTime<Utc>,
    error: Option<String>,
}

/// A read-only snapshot of a registry entry, returned to callers (the admin
/// API) that should not see the live `Arc<Feed>`.
#[derive(Serialize)]
pub struct FeedInfo {
    pub id: String,
    pub uri: String,
    pub status: FeedStatus,
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
    pub error: Option<String>,
    #[serde(rename = "postCount")]
    pub post_count: Option<usize>,
}

impl RegistryEntry {
    fn info(&self, id: &str) -> FeedInfo {
        FeedInfo {
            id: id.to_string(),
            uri: self.definition.uri.as_str().to_string(),
            status: self.status,
            last_updated: self.last_updated,
            error: self.error.clone(),
            post_count: self.feed.as_ref().map(|f| f.post_count()),
        }
    }
}

pub struct Registry {
    entries: tokio::sync::RwLock<HashMap<String, RegistryEntry>>,
    editor: Arc<dyn Editor>,
    deps: BlockDeps,
}

impl Registry {
    pub fn new(editor: Arc<dyn Editor>, deps: BlockDeps) -> Self {
        Self {
            entries: tokio::sync::RwLock::new(HashMap::new()),
            editor,
            deps,
        }
    }

    async fn build_feed(&self, definition: &FeedDefinition, config: FeedConfig) -> anyhow::Result<Arc<Feed>> {
        config.validate()?;
        let blocks = build_chain(&config.logic.blocks, &self.deps).await?;
        let store = Arc::new(Store::new(
            definition.uri.clone(),
            self.editor.clone(),
            config.store.trim_at,
            config.store.trim_remain,
        ));
        let feed = Feed::new(definition.id.clone(), definition.uri.clone(), config, blocks, store);
        feed.load().await?;
        Ok(Arc::new(feed))
    }

    /// Constructs and registers a feed from `definition`/`config`, starting
    /// it at `initial_status` unless `definition.inactive_start` names a
    /// time still in the future, in which case the feed is registered
    /// `Inactive` regardless of what the caller asked for. Never returns an
    /// error to the caller: a construction failure is recorded as
    /// `status = error` on the entry so operators can see and retry it.
    pub async fn create(&self, definition: FeedDefinition, config: FeedConfig, initial_status: FeedStatus) {
        let id = definition.id.clone();
        let status = match definition.inactive_start {
            Some(start) if start > Utc::now() => FeedStatus::Inactive,
            _ => initial_status,
        };
        match self.build_feed(&definition, config).await {
            Ok(feed) => {
                let mut entries = self.entries.write().await;
                entries.insert(
                    id,
                    RegistryEntry {
                        definition,
                        feed: Some(feed),
                        status,
                        last_updated: Utc::now(),
                        error: None,
                    },
                );
            }
            Err(err) => {
                tracing::error!(feed = %id, error = ?err, "failed to construct feed");
                let mut entries = self.entries.write().await;
                entries.insert(
                    id,
                    RegistryEntry {
                        definition,
                        feed: None,
                        status: FeedStatus::Error,
                        last_updated: Utc::now(),
                        error: Some(err.to_string()),
                    },
                );
            }
        }
    }

    pub async fn reload(&self, id: &str, config: FeedConfig) -> anyhow::Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("feed '{id}' is not registered"))?;

        match &entry.feed {
            Some(feed) => {
                feed.reload(config, &self.deps).await?;
                entry.status = FeedStatus::Active;
                entry.last_updated = Utc::now();
                entry.error = None;
                Ok(())
            }
            None => {
                let definition = entry.definition.clone();
                drop(entries);
                self.create(definition, config, FeedStatus::Active).await;
                Ok(())
            }
        }
    }

    pub async fn delete(&self, id: &str) -> anyhow::Result<()> {
        let entry = self.entries.write().await.remove(id);
        match entry {
            Some(RegistryEntry { feed: Some(feed), .. }) => feed.shutdown().await,
            Some(_) => Ok(()),
            None => Err(anyhow::anyhow!("feed '{id}' is not registered")),
        }
    }

    pub async fn update_status(&self, id: &str, status: FeedStatus) -> anyhow::Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("feed '{id}' is not registered"))?;
        entry.status = status;
        entry.last_updated = Utc::now();
        Ok(())
    }

    pub async fn get_feed_info(&self, id: &str) -> Option<FeedInfo> {
        self.entries.read().await.get(id).map(|entry| entry.info(id))
    }

    pub async fn get_feed(&self, id: &str) -> Option<Arc<Feed>> {
        self.entries.read().await.get(id).and_then(|entry| entry.feed.clone())
    }

    pub async fn get_all_feeds(&self) -> Vec<FeedInfo> {
        self.entries.read().await.iter().map(|(id, entry)| entry.info(id)).collect()
    }

    /// Every live, active feed: the set the ingestion hot path fans events
    /// out to.
    pub async fn active_feeds(&self) -> Vec<Arc<Feed>> {
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.status == FeedStatus::Active)
            .filter_map(|entry| entry.feed.clone())
            .collect()
    }

    pub async fn shutdown(&self) {
        let feeds: Vec<(String, Arc<Feed>)> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .filter_map(|(id, entry)| entry.feed.clone().map(|f| (id.clone(), f)))
                .collect()
        };
        for (id, feed) in feeds {
            if let Err(err) = feed.shutdown().await {
                tracing::warn!(feed = %id, error = ?err, "feed shutdown failed");
            }
        }
    }

    /// Reconciles the live set against `definitions`: deletes entries absent
    /// from the incoming list, and creates/reloads the rest, bounded to
    /// `LOAD_CONCURRENCY` concurrent per-feed operations.
    pub async fn load_feeds(&self, definitions: Vec<(FeedDefinition, FeedConfig)>) {
        let incoming_ids: std::collections::HashSet<String> = definitions.iter().map(|(def, _)| def.id.clone()).collect();

        let stale: Vec<String> = {
            let entries = self.entries.read().await;
            entries.keys().filter(|id| !incoming_ids.contains(*id)).cloned().collect()
        };
        for id in stale {
            if let Err(err) = self.delete(&id).await {
                tracing::warn!(feed = %id, error = ?err, "failed to delete stale feed during reconcile");
            }
        }

        stream::iter(definitions)
            .for_each_concurrent(LOAD_CONCURRENCY, |(definition, config)| async move {
                let exists = self.entries.read().await.contains_key(&definition.id);
                if exists {
                    if let Err(err) = self.reload(&definition.id, config).await {
                        tracing::warn!(feed = %definition.id, error = ?err, "failed to reload feed during reconcile");
                    }
                } else {
                    self.create(definition, config, FeedStatus::Active).await;
                }
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockConfig;
    use crate::editor::noop::NoopEditor;
    use crate::feed_config::{LogicConfig, StoreConfig};
    use crate::option_value::OptionBag;

    fn deps() -> BlockDeps {
        BlockDeps {
            http_client: reqwest::Client::new(),
        }
    }

    fn registry() -> Registry {
        Registry::new(Arc::new(NoopEditor), deps())
    }

    fn definition(id: &str) -> FeedDefinition {
        FeedDefinition {
            id: id.to_string(),
            uri: FeedUri::try_from(format!("at://did:plc:owner/app.bsky.feed.generator/{id}")).unwrap(),
            config_file: None,
            inactive_start: None,
        }
    }

    fn empty_config() -> FeedConfig {
        FeedConfig {
            logic: LogicConfig { blocks: vec![] },
            store: StoreConfig::default(),
            detailed_log: false,
        }
    }

    fn broken_config() -> FeedConfig {
        FeedConfig {
            logic: LogicConfig {
                blocks: vec![BlockConfig {
                    block_type: "".to_string(),
                    name: None,
                    options: OptionBag::default(),
                }],
            },
            store: StoreConfig::default(),
            detailed_log: false,
        }
    }

    #[tokio::test]
    async fn create_registers_an_active_feed() {
        let registry = registry();
        registry.create(definition("f1"), empty_config(), FeedStatus::Active).await;
        let info = registry.get_feed_info("f1").await.unwrap();
        assert_eq!(info.status, FeedStatus::Active);
        assert!(registry.get_feed("f1").await.is_some());
    }

    #[tokio::test]
    async fn create_records_status_error_on_bad_config_instead_of_failing() {
        let registry = registry();
        registry.create(definition("f1"), broken_config(), FeedStatus::Active).await;
        let info = registry.get_feed_info("f1").await.unwrap();
        assert_eq!(info.status, FeedStatus::Error);
        assert!(info.error.is_some());
        assert!(registry.get_feed("f1").await.is_none());
    }

    #[tokio::test]
    async fn create_honors_a_future_inactive_start_over_the_requested_status() {
        let registry = registry();
        let mut definition = definition("f1");
        definition.inactive_start = Some(Utc::now() + chrono::Duration::hours(1));
        registry.create(definition, empty_config(), FeedStatus::Active).await;
        let info = registry.get_feed_info("f1").await.unwrap();
        assert_eq!(info.status, FeedStatus::Inactive);
        assert!(registry.get_feed("f1").await.is_some());
    }

    #[tokio::test]
    async fn create_ignores_an_inactive_start_already_in_the_past() {
        let registry = registry();
        let mut definition = definition("f1");
        definition.inactive_start = Some(Utc::now() - chrono::Duration::hours(1));
        registry.create(definition, empty_config(), FeedStatus::Active).await;
        let info = registry.get_feed_info("f1").await.unwrap();
        assert_eq!(info.status, FeedStatus::Active);
    }

    #[tokio::test]
    async fn delete_removes_the_entry_and_shuts_down_the_feed() {
        let registry = registry();
        registry.create(definition("f1"), empty_config(), FeedStatus::Active).await;
        registry.delete("f1").await.unwrap();
        assert!(registry.get_feed_info("f1").await.is_none());
    }

    #[tokio::test]
    async fn delete_on_unknown_feed_errors() {
        let registry = registry();
        assert!(registry.delete("missing").await.is_err());
    }

    #[tokio::test]
    async fn active_feeds_excludes_inactive_and_errored_entries() {
        let registry = registry();
        registry.create(definition("f1"), empty_config(), FeedStatus::Active).await;
        registry.create(definition("f2"), broken_config(), FeedStatus::Active).await;
        registry.update_status("f1", FeedStatus::Inactive).await.unwrap();

        assert_eq!(registry.active_feeds().await.len(), 0);

        registry.update_status("f1", FeedStatus::Active).await.unwrap();
        assert_eq!(registry.active_feeds().await.len(), 1);
    }

    #[tokio::test]
    async fn load_feeds_deletes_entries_missing_from_the_incoming_list() {
        let registry = registry();
        registry.create(definition("f1"), empty_config(), FeedStatus::Active).await;
        registry.create(definition("f2"), empty_config(), FeedStatus::Active).await;

        registry.load_feeds(vec![(definition("f2"), empty_config())]).await;

        assert!(registry.get_feed_info("f1").await.is_none());
        assert!(registry.get_feed_info("f2").await.is_some());
    }

    #[tokio::test]
    async fn load_feeds_creates_new_and_reloads_existing() {
        let registry = registry();
        registry.create(definition("f1"), empty_config(), FeedStatus::Active).await;

        registry
            .load_feeds(vec![(definition("f1"), empty_config()), (definition("f2"), empty_config())])
            .await;

        assert!(registry.get_feed_info("f1").await.is_some());
        assert!(registry.get_feed_info("f2").await.is_some());
    }
}
