//! Process-wide `type -> constructor` registry. Populated once, read
//! lock-free after that: a `OnceLock` holding a plain `HashMap`, the same
//! "populated once at startup" lifecycle the component design calls for,
//! without reaching for an extra lazy-static dependency the corpus doesn't use.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use anyhow::Result;

use super::{custom, dropin, limiter, regex_block, remove, user_list, Block, BlockConfig, BlockDeps};

type BuildFuture = Pin<Box<dyn Future<Output = Result<Arc<dyn Block>>> + Send>>;
type Constructor = fn(BlockConfig, BlockDeps) -> BuildFuture;

fn registry() -> &'static HashMap<&'static str, Constructor> {
    static REGISTRY: OnceLock<HashMap<&'static str, Constructor>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<&'static str, Constructor> = HashMap::new();
        map.insert("regex", regex_block::build as Constructor);
        map.insert("remove", remove::build as Constructor);
        map.insert("userList", user_list::build as Constructor);
        map.insert("limiter", limiter::build as Constructor);
        map.insert("dropin", dropin::build as Constructor);
        map
    })
}

/// Any `type` absent from the registry deserializes into the custom fallback
/// block: the extension point for vendoring a private block type without
/// forking the crate.
pub async fn construct(config: BlockConfig, deps: BlockDeps) -> Result<Arc<dyn Block>> {
    match registry().get(config.block_type.as_str()) {
        Some(ctor) => ctor(config, deps).await,
        None => {
            tracing::warn!(block_type = %config.block_type, "unknown block type, falling back to custom block");
            Ok(Arc::new(custom::CustomBlock::build(config)))
        }
    }
}
