//! Remove block: drops posts matching an `item` or `language` criterion.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

use super::{Block, BlockConfig, BlockDeps};
use crate::option_value::{validate_options, OptionSpec, OptionType, OptionValue};
use crate::post::PostRecord;

const SCHEMA: &[OptionSpec] = &[
    OptionSpec::required("subject", OptionType::String),
    OptionSpec::optional("value", OptionType::String, OptionValue::String(String::new())),
    OptionSpec::optional("language", OptionType::String, OptionValue::String(String::new())),
    OptionSpec::optional("operator", OptionType::String, OptionValue::String("==".to_string())),
];

enum Criterion {
    ItemReply,
    ItemRepost,
    LanguageEquals(String),
    LanguageNotEquals(String),
}

pub struct RemoveBlock {
    name: String,
    criterion: Criterion,
}

impl RemoveBlock {
    pub fn build(config: BlockConfig) -> Result<Self> {
        let options = validate_options(SCHEMA, &config.options)?;
        let subject = options
            .get("subject")
            .and_then(OptionValue::as_str)
            .context("remove block requires a 'subject' option")?;

        let criterion = match subject {
            "item" => {
                let value = options
                    .get("value")
                    .and_then(OptionValue::as_str)
                    .context("remove block with subject 'item' requires a 'value' option")?;
                match value {
                    "reply" => Criterion::ItemReply,
                    "repost" => Criterion::ItemRepost,
                    other => {
                        return Err(anyhow!(
                            "remove block's item value must be 'reply' or 'repost', got '{other}'"
                        ))
                    }
                }
            }
            "language" => {
                let language = options
                    .get("language")
                    .and_then(OptionValue::as_str)
                    .filter(|s| !s.is_empty())
                    .context("remove block with subject 'language' requires a non-empty 'language' option")?;
                let operator = options
                    .get("operator")
                    .and_then(OptionValue::as_str)
                    .unwrap_or("==");
                match operator {
                    "==" => Criterion::LanguageEquals(language.to_string()),
                    "!=" => Criterion::LanguageNotEquals(language.to_string()),
                    other => {
                        return Err(anyhow!("remove block's operator must be '==' or '!=', got '{other}'"))
                    }
                }
            }
            other => return Err(anyhow!("remove block's subject must be 'item' or 'language', got '{other}'")),
        };

        Ok(Self {
            name: config.name().to_string(),
            criterion,
        })
    }
}

#[async_trait]
impl Block for RemoveBlock {
    fn block_type(&self) -> &str {
        "remove"
    }

    fn block_name(&self) -> &str {
        &self.name
    }

    fn test(&self, _did: &str, _rkey: &str, post: &PostRecord) -> bool {
        match &self.criterion {
            Criterion::ItemReply => post.reply.is_none(),
            // Repost support is reserved: upstream never emits it, so this
            // branch always passes.
            Criterion::ItemRepost => true,
            Criterion::LanguageEquals(code) => match &post.langs {
                None => true,
                Some(langs) => !langs.iter().any(|l| l == code),
            },
            Criterion::LanguageNotEquals(code) => match &post.langs {
                None => false,
                Some(langs) => langs.iter().all(|l| l == code),
            },
        }
    }
}

pub(super) fn build(
    config: BlockConfig,
    _deps: BlockDeps,
) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Block>>> + Send>> {
    Box::pin(async move {
        let block = RemoveBlock::build(config)?;
        Ok(Arc::new(block) as Arc<dyn Block>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::option_value::OptionBag;
    use crate::post::{ReplyRef, StrongRef};

    fn config(subject: &str, value: &str, language: &str, operator: &str) -> BlockConfig {
        let mut options = OptionBag::default();
        options.insert("subject", OptionValue::String(subject.to_string()));
        if !value.is_empty() {
            options.insert("value", OptionValue::String(value.to_string()));
        }
        if !language.is_empty() {
            options.insert("language", OptionValue::String(language.to_string()));
        }
        options.insert("operator", OptionValue::String(operator.to_string()));
        BlockConfig {
            block_type: "remove".to_string(),
            name: None,
            options,
        }
    }

    fn reply() -> Option<ReplyRef> {
        Some(ReplyRef {
            root: StrongRef {
                uri: "at://did:plc:a/app.bsky.feed.post/root".to_string(),
                cid: "cid".to_string(),
            },
            parent: StrongRef {
                uri: "at://did:plc:a/app.bsky.feed.post/parent".to_string(),
                cid: "cid".to_string(),
            },
        })
    }

    #[test]
    fn item_reply_passes_only_non_replies() {
        let block = RemoveBlock::build(config("item", "reply", "", "==")).unwrap();
        let mut post = PostRecord::default();
        assert!(block.test("did", "rkey", &post));
        post.reply = reply();
        assert!(!block.test("did", "rkey", &post));
    }

    #[test]
    fn language_equals_rejects_matching_language() {
        let block = RemoveBlock::build(config("language", "", "ja", "==")).unwrap();
        let mut post = PostRecord {
            langs: Some(vec!["en".to_string()]),
            ..Default::default()
        };
        assert!(block.test("did", "rkey", &post));
        post.langs = Some(vec!["ja".to_string()]);
        assert!(!block.test("did", "rkey", &post));
    }

    #[test]
    fn language_equals_missing_langs_passes() {
        let block = RemoveBlock::build(config("language", "", "ja", "==")).unwrap();
        assert!(block.test("did", "rkey", &PostRecord::default()));
    }

    #[test]
    fn language_not_equals_requires_all_match() {
        let block = RemoveBlock::build(config("language", "", "ja", "!=")).unwrap();
        let mut post = PostRecord {
            langs: Some(vec!["ja".to_string()]),
            ..Default::default()
        };
        assert!(block.test("did", "rkey", &post));
        post.langs = Some(vec!["ja".to_string(), "en".to_string()]);
        assert!(!block.test("did", "rkey", &post));
    }

    #[test]
    fn language_not_equals_missing_langs_fails() {
        let block = RemoveBlock::build(config("language", "", "ja", "!=")).unwrap();
        assert!(!block.test("did", "rkey", &PostRecord::default()));
    }

    #[test]
    fn invalid_subject_rejected() {
        assert!(RemoveBlock::build(config("bogus", "", "", "==")).is_err());
    }
}
