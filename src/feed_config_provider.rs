//! Collaborator boundary (§4.9/§6): the two feed-config providers and the
//! definition provider the registry's `load_feeds` reconciles against. Both
//! config providers yield the same validated [`FeedConfig`] tree; only the
//! source and mutability differ.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::feed_config::FeedConfig;
use crate::registry::FeedDefinition;

/// A source of validated feed configs. The file provider's `reference` is a
/// feed id (a file stem under its directory); the remote provider's is an
/// at-uri it splits into `did`/`rkey` for the `getRecord` call.
#[async_trait]
pub trait FeedConfigProvider: Send + Sync {
    async fn load(&self, reference: &str) -> Result<FeedConfig>;
}

/// Reads/writes YAML feed configs from a directory, preserving every prior
/// version under `<dir>/version/<basename>.<YYYYMMDD_HHMMSS>` on save and
/// selecting the newest version file on load if any exist.
pub struct FileConfigProvider {
    dir: PathBuf,
}

impl FileConfigProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn base_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.yaml"))
    }

    fn version_dir(&self) -> PathBuf {
        self.dir.join("version")
    }

    /// The newest version file for `id`, if any exist, by the
    /// `YYYYMMDD_HHMMSS` suffix's lexical (== chronological) order.
    fn newest_version(&self, id: &str) -> Option<PathBuf> {
        let prefix = format!("{id}.yaml.");
        let entries = std::fs::read_dir(self.version_dir()).ok()?;
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
            .map(|entry| entry.path())
            .max_by_key(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
    }

    /// Writes `config` for `id`, moving any existing base file into the
    /// version directory first so it isn't silently lost.
    pub async fn save(&self, id: &str, config: &FeedConfig) -> Result<()> {
        let base = self.base_path(id);
        if tokio::fs::try_exists(&base).await.unwrap_or(false) {
            let version_dir = self.version_dir();
            tokio::fs::create_dir_all(&version_dir).await.context("creating config version directory")?;
            let stamp = Utc::now().format("%Y%m%d_%H%M%S");
            let versioned = version_dir.join(format!("{id}.yaml.{stamp}"));
            tokio::fs::copy(&base, &versioned).await.context("preserving prior config version")?;
        }
        let yaml = serde_yaml::to_string(config).context("serializing feed config to yaml")?;
        tokio::fs::write(&base, yaml).await.context("writing feed config file")
    }
}

#[async_trait]
impl FeedConfigProvider for FileConfigProvider {
    async fn load(&self, id: &str) -> Result<FeedConfig> {
        let path = self.newest_version(id).unwrap_or_else(|| self.base_path(id));
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading feed config file '{}'", path.display()))?;
        FeedConfig::from_yaml(&raw)
    }
}

/// Fetches a feed's config record from the AT Protocol repo the feed
/// generator record lives in. Read-only: this provider never writes.
pub struct RemoteConfigProvider {
    api_base: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct GetRecordResponse {
    value: GetRecordValue,
}

#[derive(Deserialize)]
struct GetRecordValue {
    #[serde(rename = "yugeFeed")]
    yuge_feed: serde_json::Value,
}

impl RemoteConfigProvider {
    pub fn new(api_base: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            api_base: api_base.into(),
            http,
        }
    }
}

#[async_trait]
impl FeedConfigProvider for RemoteConfigProvider {
    /// `reference` is a feed at-uri: `at://<did>/app.bsky.feed.generator/<rkey>`.
    async fn load(&self, reference: &str) -> Result<FeedConfig> {
        let feed_uri = crate::at_uri::FeedUri::try_from(reference.to_string())?;
        let url = format!(
            "{}/xrpc/com.atproto.repo.getRecord?repo={}&collection=app.bsky.feed.generator&rkey={}",
            self.api_base.trim_end_matches('/'),
            feed_uri.did(),
            feed_uri.rkey(),
        );
        let response = self.http.get(&url).send().await.context("fetching feed generator record")?;
        if !response.status().is_success() {
            return Err(anyhow!("getRecord returned status {}", response.status()));
        }
        let body: GetRecordResponse = response.json().await.context("parsing getRecord response")?;
        let config: FeedConfig = serde_json::from_value(body.value.yuge_feed).context("parsing yugeFeed config")?;
        config.validate()?;
        Ok(config)
    }
}

/// The unit the definition provider persists and the registry reconciles
/// against on `load_feeds`, with the same versioned-save discipline as the
/// file config provider: `feedlist_v<N>_<timestamp>.yaml`, version
/// monotonically increasing per save.
pub struct FileDefinitionProvider {
    dir: PathBuf,
}

#[derive(Serialize, Deserialize, Default)]
struct DefinitionFile {
    #[serde(default)]
    feeds: Vec<FeedDefinition>,
}

impl FileDefinitionProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn versions(&self) -> Vec<(u32, PathBuf)> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let rest = name.strip_prefix("feedlist_v")?;
                let version_str = rest.split('_').next()?;
                let version: u32 = version_str.parse().ok()?;
                Some((version, entry.path()))
            })
            .collect()
    }

    fn latest(&self) -> Option<(u32, PathBuf)> {
        self.versions().into_iter().max_by_key(|(version, _)| *version)
    }

    pub async fn load(&self) -> Result<Vec<FeedDefinition>> {
        match self.latest() {
            Some((_, path)) => {
                let raw = tokio::fs::read_to_string(&path).await.context("reading feed definitions file")?;
                let parsed: DefinitionFile = serde_yaml::from_str(&raw).context("parsing feed definitions file")?;
                Ok(parsed.feeds)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, feeds: Vec<FeedDefinition>) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.context("creating feed definitions directory")?;
        let next_version = self.latest().map(|(v, _)| v + 1).unwrap_or(1);
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = self.dir.join(format!("feedlist_v{next_version}_{stamp}.yaml"));
        let yaml = serde_yaml::to_string(&DefinitionFile { feeds }).context("serializing feed definitions")?;
        tokio::fs::write(&path, yaml).await.context("writing feed definitions file")
    }

    pub async fn add(&self, definition: FeedDefinition) -> Result<()> {
        let mut feeds = self.load().await?;
        if feeds.iter().any(|f| f.id == definition.id) {
            return Err(anyhow!("feed definition '{}' already exists", definition.id));
        }
        feeds.push(definition);
        self.save(feeds).await
    }

    pub async fn update(&self, definition: FeedDefinition) -> Result<()> {
        let mut feeds = self.load().await?;
        let existing = feeds
            .iter_mut()
            .find(|f| f.id == definition.id)
            .ok_or_else(|| anyhow!("feed definition '{}' not found", definition.id))?;
        *existing = definition;
        self.save(feeds).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut feeds = self.load().await?;
        let before = feeds.len();
        feeds.retain(|f| f.id != id);
        if feeds.len() == before {
            return Err(anyhow!("feed definition '{id}' not found"));
        }
        self.save(feeds).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::at_uri::FeedUri;

    fn temp_dir(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("feedpipe-{label}-{}-{}", std::process::id(), label.len()))
    }

    fn config() -> FeedConfig {
        FeedConfig::default()
    }

    #[tokio::test]
    async fn file_config_provider_round_trips() {
        let dir = temp_dir("config-roundtrip");
        let provider = FileConfigProvider::new(&dir);
        provider.save("feed1", &config()).await.unwrap();
        let loaded = provider.load("feed1").await.unwrap();
        assert_eq!(loaded.store.trim_at, config().store.trim_at);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn file_config_provider_prefers_newest_version_file() {
        let dir = temp_dir("config-versioned");
        let provider = FileConfigProvider::new(&dir);

        let mut first = config();
        first.detailed_log = false;
        provider.save("feed1", &first).await.unwrap();

        let mut second = first.clone();
        second.detailed_log = true;
        provider.save("feed1", &second).await.unwrap();

        let loaded = provider.load("feed1").await.unwrap();
        assert!(loaded.detailed_log, "should have loaded the prior version, not the live base file overwritten by the second save");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn definition_provider_round_trips_add_update_delete() {
        let dir = temp_dir("definitions");
        let provider = FileDefinitionProvider::new(&dir);

        assert!(provider.load().await.unwrap().is_empty());

        let def = FeedDefinition {
            id: "f1".to_string(),
            uri: FeedUri::try_from("at://did:plc:owner/app.bsky.feed.generator/f1".to_string()).unwrap(),
            config_file: None,
            inactive_start: None,
        };
        provider.add(def.clone()).await.unwrap();
        let loaded = provider.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "f1");

        let mut updated = def.clone();
        updated.config_file = Some("f1.yaml".to_string());
        provider.update(updated).await.unwrap();
        let loaded = provider.load().await.unwrap();
        assert_eq!(loaded[0].config_file.as_deref(), Some("f1.yaml"));

        provider.delete("f1").await.unwrap();
        assert!(provider.load().await.unwrap().is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn definition_provider_versions_are_monotonically_increasing() {
        let dir = temp_dir("definitions-versions");
        let provider = FileDefinitionProvider::new(&dir);
        let def = |id: &str| FeedDefinition {
            id: id.to_string(),
            uri: FeedUri::try_from(format!("at://did:plc:owner/app.bsky.feed.generator/{id}")).unwrap(),
            config_file: None,
            inactive_start: None,
        };

        provider.add(def("f1")).await.unwrap();
        provider.add(def("f2")).await.unwrap();
        let versions = provider.versions();
        assert_eq!(versions.iter().map(|(v, _)| *v).max().unwrap(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn delete_on_unknown_definition_errors() {
        let dir = temp_dir("definitions-missing");
        let provider = FileDefinitionProvider::new(&dir);
        assert!(provider.delete("missing").await.is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
