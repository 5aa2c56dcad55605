//! Limiter block: per-actor sliding-window rate limit.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::json;

use super::{Block, BlockConfig, BlockDeps};
use crate::option_value::{validate_options, OptionBag, OptionSpec, OptionType, OptionValue};
use crate::post::PostRecord;
use crate::rate_limit::RateLimiter;

const SCHEMA: &[OptionSpec] = &[
    OptionSpec::required("count", OptionType::Int),
    OptionSpec::required("timeWindow", OptionType::Duration),
    OptionSpec::required("cleanupFreq", OptionType::Duration),
];

pub struct LimiterBlock {
    name: String,
    limiter: Arc<RateLimiter>,
    cleanup_task: tokio::task::JoinHandle<()>,
}

impl LimiterBlock {
    fn build(config: BlockConfig) -> Result<(Self, Duration)> {
        let options = validate_options(SCHEMA, &config.options)?;
        let count = options
            .get("count")
            .and_then(OptionValue::as_int)
            .context("limiter block requires a 'count' option")?;
        if count <= 0 {
            return Err(anyhow!("limiter block's 'count' must be > 0, got {count}"));
        }
        let time_window = options
            .get("timeWindow")
            .and_then(OptionValue::as_duration)
            .context("limiter block requires a 'timeWindow' option")?;
        if time_window < Duration::from_secs(1) {
            return Err(anyhow!("limiter block's 'timeWindow' must be >= 1s"));
        }
        let cleanup_freq = options
            .get("cleanupFreq")
            .and_then(OptionValue::as_duration)
            .context("limiter block requires a 'cleanupFreq' option")?;
        if cleanup_freq <= Duration::from_secs(1) {
            return Err(anyhow!("limiter block's 'cleanupFreq' must be > 1s"));
        }

        let limiter = Arc::new(RateLimiter::new(count as u64, time_window));
        let cancel = tokio_util::sync::CancellationToken::new();
        let cleanup_task = tokio::spawn(crate::rate_limit::run_cleanup(
            limiter.clone(),
            cleanup_freq,
            cancel,
        ));

        Ok((
            Self {
                name: config.name().to_string(),
                limiter,
                cleanup_task,
            },
            cleanup_freq,
        ))
    }
}

impl Drop for LimiterBlock {
    fn drop(&mut self) {
        self.cleanup_task.abort();
    }
}

#[async_trait]
impl Block for LimiterBlock {
    fn block_type(&self) -> &str {
        "limiter"
    }

    fn block_name(&self) -> &str {
        &self.name
    }

    fn test(&self, did: &str, _rkey: &str, _post: &PostRecord) -> bool {
        self.limiter.allows(did)
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.cleanup_task.abort();
        Ok(())
    }

    fn metrics(&self) -> Option<Vec<(String, f64)>> {
        Some(vec![(
            format!("{}_tracked_actors", self.name),
            self.limiter.list().len() as f64,
        )])
    }

    async fn process_command(
        &self,
        command: &str,
        _args: &OptionBag,
    ) -> Option<anyhow::Result<serde_json::Value>> {
        match command {
            "list" => Some(Ok(json!(self.limiter.list()))),
            "clear" => {
                self.limiter.clear();
                Some(Ok(json!({ "cleared": true })))
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
        let (block, _cleanup_freq) = LimiterBlock::build(config)?;
        Ok(Arc::new(block) as Arc<dyn Block>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(count: i64, time_window_secs: i64, cleanup_freq_secs: i64) -> BlockConfig {
        let mut options = OptionBag::default();
        options.insert("count", OptionValue::Int(count));
        options.insert(
            "timeWindow",
            OptionValue::Duration(time_window_secs * 1_000_000_000),
        );
        options.insert(
            "cleanupFreq",
            OptionValue::Duration(cleanup_freq_secs * 1_000_000_000),
        );
        BlockConfig {
            block_type: "limiter".to_string(),
            name: None,
            options,
        }
    }

    #[tokio::test]
    async fn allows_up_to_count_events() {
        let (block, _) = LimiterBlock::build(config(2, 60, 120)).unwrap();
        let post = PostRecord::default();
        assert!(block.test("did:plc:a", "rkey1", &post));
        assert!(block.test("did:plc:a", "rkey2", &post));
        assert!(!block.test("did:plc:a", "rkey3", &post));
    }

    #[test]
    fn rejects_zero_count() {
        assert!(LimiterBlock::build(config(0, 60, 120)).is_err());
    }

    #[test]
    fn rejects_cleanup_freq_not_greater_than_one_second() {
        assert!(LimiterBlock::build(config(2, 60, 1)).is_err());
    }

    #[test]
    fn rejects_time_window_under_one_second() {
        let mut options = OptionBag::default();
        options.insert("count", OptionValue::Int(2));
        options.insert("timeWindow", OptionValue::Duration(500_000_000));
        options.insert("cleanupFreq", OptionValue::Duration(120_000_000_000));
        let config = BlockConfig {
            block_type: "limiter".to_string(),
            name: None,
            options,
        };
        assert!(LimiterBlock::build(config).is_err());
    }

    #[test]
    fn time_window_deserializes_from_a_yaml_numeric_duration() {
        let yaml = r#"
type: limiter
name: limit
options:
  count: 5
  timeWindow: 60000000000
  cleanupFreq: "5m"
"#;
        let config: BlockConfig = serde_yaml::from_str(yaml).unwrap();
        let (block, cleanup_freq) = LimiterBlock::build(config).unwrap();
        assert_eq!(cleanup_freq, Duration::from_secs(300));
        let post = PostRecord::default();
        for _ in 0..5 {
            assert!(block.test("did:plc:a", "rkey", &post));
        }
        assert!(!block.test("did:plc:a", "rkey", &post));
    }

    #[tokio::test]
    async fn clear_command_resets_state() {
        let (block, _) = LimiterBlock::build(config(1, 60, 120)).unwrap();
        let post = PostRecord::default();
        assert!(block.test("did:plc:a", "rkey1", &post));
        assert!(!block.test("did:plc:a", "rkey2", &post));
        block.process_command("clear", &OptionBag::default()).await;
        assert!(block.test("did:plc:a", "rkey3", &post));
    }
}
