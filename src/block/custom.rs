//! The fallback block for any `type` absent from the factory registry: the
//! extension point a deployer uses to vendor a private block type without
//! forking the crate. Rejects nothing, validates nothing, implements no
//! capability hooks.

use async_trait::async_trait;

use super::{Block, BlockConfig};
use crate::post::PostRecord;

pub struct CustomBlock {
    name: String,
    options: crate::option_value::OptionBag,
}

impl CustomBlock {
    pub fn build(config: BlockConfig) -> Self {
        Self {
            name: config.name().to_string(),
            options: config.options,
        }
    }

    /// The retained options bag, for inspection/debugging.
    pub fn options(&self) -> &crate::option_value::OptionBag {
        &self.options
    }
}

#[async_trait]
impl Block for CustomBlock {
    fn block_type(&self) -> &str {
        "custom"
    }

    fn block_name(&self) -> &str {
        &self.name
    }

    fn test(&self, _did: &str, _rkey: &str, _post: &PostRecord) -> bool {
        true
    }
}
