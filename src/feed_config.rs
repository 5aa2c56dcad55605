//! The validated, typed configuration tree describing a feed's block chain
//! and store trim policy. Deep-copyable and immutable once published to a
//! live feed: `Feed::config()` simply clones one.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::block::BlockConfig;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LogicConfig {
    #[serde(default)]
    pub blocks: Vec<BlockConfig>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(default)]
    pub trim_at: u64,
    #[serde(default)]
    pub trim_remain: u64,
}

impl StoreConfig {
    /// `trimAt == 0 && trimRemain == 0` disables trimming.
    pub fn trimming_enabled(&self) -> bool {
        !(self.trim_at == 0 && self.trim_remain == 0)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedConfig {
    #[serde(default)]
    pub logic: LogicConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub detailed_log: bool,
}

impl FeedConfig {
    pub fn validate(&self) -> Result<()> {
        if self.store.trimming_enabled() && self.store.trim_remain > self.store.trim_at {
            return Err(anyhow!(
                "store.trimRemain ({}) must not exceed store.trimAt ({})",
                self.store.trim_remain,
                self.store.trim_at
            ));
        }

        let mut seen_names = std::collections::HashSet::new();
        for block in &self.logic.blocks {
            if block.block_type.is_empty() {
                return Err(anyhow!("a block config is missing its 'type'"));
            }
            if !seen_names.insert(block.name().to_string()) {
                return Err(anyhow!(
                    "duplicate block name '{}' in logic.blocks; block names must be unique within a feed",
                    block.name()
                ));
            }
        }

        Ok(())
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }
}
