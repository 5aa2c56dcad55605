//! Drop-in block: watch for a target word, keep an actor "on watch" until a
//! cancel word or expiry, with optional silent ignore words.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;

use super::{Block, BlockConfig, BlockDeps};
use crate::option_value::{validate_options, OptionBag, OptionSpec, OptionType, OptionValue};
use crate::post::PostRecord;
use crate::watchlist::Watchlist;

const SCHEMA: &[OptionSpec] = &[
    OptionSpec::required("targetWord", OptionType::StringArray),
    OptionSpec::optional("cancelWord", OptionType::StringArray, OptionValue::StringArray(Vec::new())),
    OptionSpec::optional("ignoreWord", OptionType::StringArray, OptionValue::StringArray(Vec::new())),
    OptionSpec::optional("expireDuration", OptionType::Duration, OptionValue::Duration(0)),
];

fn fold_words(words: &[String]) -> Vec<String> {
    words.iter().map(|w| w.to_lowercase()).collect()
}

fn any_occurs(words: &[String], text_lower: &str) -> bool {
    words.iter().any(|w| text_lower.contains(w.as_str()))
}

pub struct DropinBlock {
    name: String,
    target_words: Vec<String>,
    cancel_words: Vec<String>,
    ignore_words: Vec<String>,
    expire_in: Option<Duration>,
    watchlist: Arc<Watchlist>,
    sweep_task: tokio::task::JoinHandle<()>,
}

impl DropinBlock {
    fn build(config: BlockConfig) -> Result<Self> {
        let options = validate_options(SCHEMA, &config.options)?;
        let target_words = options
            .get("targetWord")
            .and_then(OptionValue::as_string_array)
            .filter(|words| !words.is_empty())
            .context("drop-in block requires a non-empty 'targetWord' option")?;
        let cancel_words = options
            .get("cancelWord")
            .and_then(OptionValue::as_string_array)
            .unwrap_or(&[]);
        let ignore_words = options
            .get("ignoreWord")
            .and_then(OptionValue::as_string_array)
            .unwrap_or(&[]);
        let expire_in = options
            .get("expireDuration")
            .and_then(OptionValue::as_duration)
            .filter(|d| !d.is_zero());

        let watchlist = Arc::new(Watchlist::new());
        let cancel = tokio_util::sync::CancellationToken::new();
        let sweep_task = tokio::spawn(crate::watchlist::run_sweep(watchlist.clone(), cancel));

        Ok(Self {
            name: config.name().to_string(),
            target_words: fold_words(target_words),
            cancel_words: fold_words(cancel_words),
            ignore_words: fold_words(ignore_words),
            expire_in,
            watchlist,
            sweep_task,
        })
    }
}

impl Drop for DropinBlock {
    fn drop(&mut self) {
        self.sweep_task.abort();
    }
}

#[async_trait]
impl Block for DropinBlock {
    fn block_type(&self) -> &str {
        "dropin"
    }

    fn block_name(&self) -> &str {
        &self.name
    }

    fn test(&self, did: &str, rkey: &str, post: &PostRecord) -> bool {
        let text_lower = post.text.to_lowercase();

        if any_occurs(&self.cancel_words, &text_lower) {
            self.watchlist.remove(did);
            return false;
        }
        if any_occurs(&self.ignore_words, &text_lower) {
            return false;
        }
        if self.watchlist.contains(did) {
            return true;
        }
        if any_occurs(&self.target_words, &text_lower) {
            self.watchlist.add(did, rkey, self.expire_in);
            return true;
        }
        false
    }

    fn reset(&self) -> anyhow::Result<()> {
        self.watchlist.clear();
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.sweep_task.abort();
        Ok(())
    }

    fn pre_delete(&self, did: &str, rkey: &str) {
        self.watchlist.remove_if_trigger(did, rkey);
    }

    fn metrics(&self) -> Option<Vec<(String, f64)>> {
        Some(vec![(
            format!("{}_watchlist_size", self.name),
            self.watchlist.list().len() as f64,
        )])
    }

    async fn process_command(
        &self,
        command: &str,
        args: &OptionBag,
    ) -> Option<anyhow::Result<serde_json::Value>> {
        match command {
            "list" => Some(Ok(json!({ "watching": self.watchlist.list() }))),
            "reset" => {
                self.watchlist.clear();
                Some(Ok(json!({ "reset": true })))
            }
            "add" => {
                let did = match args.get("did").and_then(OptionValue::as_str) {
                    Some(did) => did.to_string(),
                    None => return Some(Err(anyhow::anyhow!("'add' command requires a 'did' argument"))),
                };
                let rkey = args.get("rkey").and_then(OptionValue::as_str).unwrap_or("");
                self.watchlist.add(&did, rkey, self.expire_in);
                Some(Ok(json!({ "added": did })))
            }
            "delete" => {
                let did = match args.get("did").and_then(OptionValue::as_str) {
                    Some(did) => did.to_string(),
                    None => return Some(Err(anyhow::anyhow!("'delete' command requires a 'did' argument"))),
                };
                self.watchlist.remove(&did);
                Some(Ok(json!({ "deleted": did })))
            }
            _ => None,
        }
    }
}

pub(super) fn build(
    config: BlockConfig,
    _deps: BlockDeps,
) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Block>>> + Send>> {
    Box::pin(async move {
        let block = DropinBlock::build(config)?;
        Ok(Arc::new(block) as Arc<dyn Block>)
    })
}
