//! Regex block: `test` returns `pattern.is_match(post.text) XOR invert`.
//! Empty text always fails regardless of the pattern.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use fancy_regex::Regex;

use super::{Block, BlockConfig, BlockDeps};
use crate::option_value::{validate_options, OptionBag, OptionSpec, OptionType, OptionValue};
use crate::post::PostRecord;

const SCHEMA: &[OptionSpec] = &[
    OptionSpec::required("value", OptionType::String),
    OptionSpec::optional("caseSensitive", OptionType::Bool, OptionValue::Bool(true)),
    OptionSpec::optional("invert", OptionType::Bool, OptionValue::Bool(false)),
];

pub struct RegexBlock {
    name: String,
    pattern: Regex,
    invert: bool,
}

impl RegexBlock {
    pub fn build(config: BlockConfig) -> Result<Self> {
        let options = validate_options(SCHEMA, &config.options)?;
        let value = options
            .get("value")
            .and_then(OptionValue::as_str)
            .filter(|s| !s.is_empty())
            .context("regex block's 'value' option must be a non-empty pattern")?;
        let case_sensitive = options
            .get("caseSensitive")
            .and_then(OptionValue::as_bool)
            .unwrap_or(true);
        let invert = options
            .get("invert")
            .and_then(OptionValue::as_bool)
            .unwrap_or(false);

        let pattern_src = if case_sensitive {
            value.to_string()
        } else {
            format!("(?i){value}")
        };
        let pattern = Regex::new(&pattern_src)
            .with_context(|| format!("invalid regex pattern '{value}'"))?;

        Ok(Self {
            name: config.name().to_string(),
            pattern,
            invert,
        })
    }
}

#[async_trait]
impl Block for RegexBlock {
    fn block_type(&self) -> &str {
        "regex"
    }

    fn block_name(&self) -> &str {
        &self.name
    }

    fn test(&self, _did: &str, _rkey: &str, post: &PostRecord) -> bool {
        if post.text.is_empty() {
            return false;
        }
        let matched = self.pattern.is_match(&post.text).unwrap_or(false);
        matched != self.invert
    }
}

pub(super) fn build(
    config: BlockConfig,
    _deps: BlockDeps,
) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Block>>> + Send>> {
    Box::pin(async move {
        let block = RegexBlock::build(config)?;
        Ok(Arc::new(block) as Arc<dyn Block>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(value: &str, case_sensitive: bool, invert: bool) -> BlockConfig {
        let mut options = OptionBag::default();
        options.insert("value", OptionValue::String(value.to_string()));
        options.insert("caseSensitive", OptionValue::Bool(case_sensitive));
        options.insert("invert", OptionValue::Bool(invert));
        BlockConfig {
            block_type: "regex".to_string(),
            name: None,
            options,
        }
    }

    fn post(text: &str) -> PostRecord {
        PostRecord {
            text: text.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn matches_pass_through() {
        let block = RegexBlock::build(config("launch", true, false)).unwrap();
        assert!(block.test("did", "rkey", &post("we launch today")));
        assert!(!block.test("did", "rkey", &post("nothing here")));
    }

    #[test]
    fn invert_flips_result() {
        let block = RegexBlock::build(config("launch", true, true)).unwrap();
        assert!(!block.test("did", "rkey", &post("we launch today")));
        assert!(block.test("did", "rkey", &post("nothing here")));
    }

    #[test]
    fn empty_text_always_fails() {
        let block = RegexBlock::build(config(".*", true, false)).unwrap();
        assert!(!block.test("did", "rkey", &post("")));
    }

    #[test]
    fn case_insensitive_when_configured() {
        let block = RegexBlock::build(config("LAUNCH", false, false)).unwrap();
        assert!(block.test("did", "rkey", &post("we launch today")));
    }

    #[test]
    fn lookaround_is_supported() {
        let block = RegexBlock::build(config(r"foo(?=bar)", true, false)).unwrap();
        assert!(block.test("did", "rkey", &post("foobar")));
        assert!(!block.test("did", "rkey", &post("foobaz")));
    }

    #[test]
    fn empty_pattern_rejected_at_construction() {
        assert!(RegexBlock::build(config("", true, false)).is_err());
    }
}
