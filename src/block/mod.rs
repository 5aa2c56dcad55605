//! The pluggable filter-chain block interface, its typed configuration, and
//! the factory dispatch that turns a [`BlockConfig`] into a live [`Block`].

pub mod custom;
pub mod dropin;
pub mod factory;
pub mod limiter;
pub mod regex_block;
pub mod remove;
pub mod user_list;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::option_value::OptionBag;
use crate::post::PostRecord;

/// One entry in a feed's `logic.blocks` list, as deserialized from config.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockConfig {
    #[serde(rename = "type")]
    pub block_type: String,
    pub name: Option<String>,
    #[serde(default)]
    pub options: OptionBag,
}

impl BlockConfig {
    /// The block's addressable name for the command router: the configured
    /// `name`, falling back to the block type when absent.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.block_type)
    }
}

/// The block predicate interface every variant implements. `reset`,
/// `shutdown`, `pre_delete` and `process_command` all have no-op defaults:
/// a block only overrides the capabilities it actually has, mirroring the
/// "optional capability interface" split in the component design.
#[async_trait]
pub trait Block: Send + Sync {
    fn block_type(&self) -> &str;
    fn block_name(&self) -> &str;

    /// The hot path. Must not suspend except where a block variant chooses
    /// to consult state it owns (e.g. the rate limiter's mutex).
    fn test(&self, did: &str, rkey: &str, post: &PostRecord) -> bool;

    fn reset(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called before a post is removed from the store. Most blocks have
    /// nothing to clean up here.
    fn pre_delete(&self, _did: &str, _rkey: &str) {}

    /// Metric-provider capability: a list of `(name, value)` gauges for
    /// blocks that track internal state worth exposing. `None` means the
    /// block has nothing to report.
    fn metrics(&self) -> Option<Vec<(String, f64)>> {
        None
    }

    /// Command-processor capability. `None` means the block does not support
    /// commands at all (the feed translates that into `CommandError::NotSupported`).
    async fn process_command(
        &self,
        _command: &str,
        _args: &OptionBag,
    ) -> Option<anyhow::Result<serde_json::Value>> {
        None
    }
}

/// Shared dependencies block constructors may need (currently just the
/// HTTP client the user-list block uses to fetch list membership).
#[derive(Clone)]
pub struct BlockDeps {
    pub http_client: reqwest::Client,
}

/// Builds the ordered, live block chain for a feed from its configured list,
/// preserving configuration order (the conjunction's evaluation order).
pub async fn build_chain(
    configs: &[BlockConfig],
    deps: &BlockDeps,
) -> anyhow::Result<Vec<Arc<dyn Block>>> {
    let mut chain = Vec::with_capacity(configs.len());
    for config in configs {
        chain.push(factory::construct(config.clone(), deps.clone()).await?);
    }
    Ok(chain)
}

/// Short-circuit conjunction over the chain: the first block to return
/// `false` ends the evaluation.
pub fn test_chain(chain: &[Arc<dyn Block>], did: &str, rkey: &str, post: &PostRecord) -> bool {
    chain.iter().all(|block| block.test(did, rkey, post))
}
