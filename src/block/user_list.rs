//! User-list block: allow/deny membership against a frozen snapshot of an
//! `app.bsky.graph.list`'s members, refetchable via the `reload` command.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{Block, BlockConfig, BlockDeps};
use crate::option_value::{validate_options, OptionBag, OptionSpec, OptionType, OptionValue};
use crate::post::PostRecord;

const DEFAULT_API_BASE_URL: &str = "https://public.api.bsky.app";

const SCHEMA: &[OptionSpec] = &[
    OptionSpec::required("listUri", OptionType::String),
    OptionSpec::optional("allow", OptionType::Bool, OptionValue::Bool(true)),
    OptionSpec::optional(
        "apiBaseURL",
        OptionType::String,
        OptionValue::String(String::new()),
    ),
];

#[derive(Deserialize)]
struct ListItemsResponse {
    items: Vec<ListItem>,
    cursor: Option<String>,
}

#[derive(Deserialize)]
struct ListItem {
    subject: ListSubject,
}

#[derive(Deserialize)]
struct ListSubject {
    did: String,
}

pub struct UserListBlock {
    name: String,
    list_uri: String,
    allow: bool,
    api_base_url: String,
    http_client: reqwest::Client,
    members: RwLock<HashSet<String>>,
}

impl UserListBlock {
    async fn fetch_members(client: &reqwest::Client, api_base_url: &str, list_uri: &str) -> Result<HashSet<String>> {
        let mut members = HashSet::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = client
                .get(format!("{api_base_url}/xrpc/app.bsky.graph.getList"))
                .query(&[("list", list_uri), ("limit", "100")]);
            if let Some(cursor) = &cursor {
                request = request.query(&[("cursor", cursor.as_str())]);
            }

            let response = request
                .send()
                .await
                .with_context(|| format!("fetching list members for {list_uri}"))?
                .error_for_status()
                .with_context(|| format!("list {list_uri} returned an error status"))?
                .json::<ListItemsResponse>()
                .await
                .with_context(|| format!("decoding list members response for {list_uri}"))?;

            members.extend(response.items.into_iter().map(|item| item.subject.did));

            match response.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(members)
    }

    async fn build(config: BlockConfig, http_client: reqwest::Client) -> Result<Self> {
        let options = validate_options(SCHEMA, &config.options)?;
        let list_uri = options
            .get("listUri")
            .and_then(OptionValue::as_str)
            .context("user-list block requires a 'listUri' option")?
            .to_string();
        crate::at_uri::ensure_collection(&list_uri, "app.bsky.graph.list")
            .context("user-list block's 'listUri' must name an app.bsky.graph.list record")?;
        let allow = options.get("allow").and_then(OptionValue::as_bool).unwrap_or(true);
        let api_base_url = options
            .get("apiBaseURL")
            .and_then(OptionValue::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_API_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        let members = Self::fetch_members(&http_client, &api_base_url, &list_uri).await?;

        Ok(Self {
            name: config.name().to_string(),
            list_uri,
            allow,
            api_base_url,
            http_client,
            members: RwLock::new(members),
        })
    }
}

#[async_trait]
impl Block for UserListBlock {
    fn block_type(&self) -> &str {
        "userList"
    }

    fn block_name(&self) -> &str {
        &self.name
    }

    fn test(&self, did: &str, _rkey: &str, _post: &PostRecord) -> bool {
        let is_member = self.members.read().unwrap().contains(did);
        self.allow == is_member
    }

    fn metrics(&self) -> Option<Vec<(String, f64)>> {
        Some(vec![(
            format!("{}_list_size", self.name),
            self.members.read().unwrap().len() as f64,
        )])
    }

    async fn process_command(
        &self,
        command: &str,
        _args: &OptionBag,
    ) -> Option<anyhow::Result<serde_json::Value>> {
        match command {
            "list" => {
                let members: Vec<String> = self.members.read().unwrap().iter().cloned().collect();
                Some(Ok(json!({ "members": members })))
            }
            "reload" => {
                let result = Self::fetch_members(&self.http_client, &self.api_base_url, &self.list_uri).await;
                match result {
                    Ok(fresh) => {
                        let count = fresh.len();
                        *self.members.write().unwrap() = fresh;
                        Some(Ok(json!({ "reloaded": true, "memberCount": count })))
                    }
                    Err(err) => Some(Err(err)),
                }
            }
            _ => None,
        }
    }
}

pub(super) fn build(
    config: BlockConfig,
    deps: BlockDeps,
) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Block>>> + Send>> {
    Box::pin(async move {
        let block = UserListBlock::build(config, deps.http_client).await?;
        Ok(Arc::new(block) as Arc<dyn Block>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_true_passes_members_only() {
        let block = UserListBlock {
            name: "allowlist".to_string(),
            list_uri: "at://did:plc:owner/app.bsky.graph.list/l1".to_string(),
            allow: true,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            http_client: reqwest::Client::new(),
            members: RwLock::new(HashSet::from(["did:plc:member".to_string()])),
        };
        assert!(block.test("did:plc:member", "rkey", &PostRecord::default()));
        assert!(!block.test("did:plc:stranger", "rkey", &PostRecord::default()));
    }

    #[test]
    fn allow_false_rejects_members() {
        let block = UserListBlock {
            name: "denylist".to_string(),
            list_uri: "at://did:plc:owner/app.bsky.graph.list/l1".to_string(),
            allow: false,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            http_client: reqwest::Client::new(),
            members: RwLock::new(HashSet::from(["did:plc:member".to_string()])),
        };
        assert!(!block.test("did:plc:member", "rkey", &PostRecord::default()));
        assert!(block.test("did:plc:stranger", "rkey", &PostRecord::default()));
    }

    #[tokio::test]
    async fn list_command_dumps_members() {
        let block = UserListBlock {
            name: "allowlist".to_string(),
            list_uri: "at://did:plc:owner/app.bsky.graph.list/l1".to_string(),
            allow: true,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            http_client: reqwest::Client::new(),
            members: RwLock::new(HashSet::from(["did:plc:member".to_string()])),
        };
        let result = block.process_command("list", &OptionBag::default()).await;
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn unsupported_command_returns_none() {
        let block = UserListBlock {
            name: "allowlist".to_string(),
            list_uri: "at://did:plc:owner/app.bsky.graph.list/l1".to_string(),
            allow: true,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            http_client: reqwest::Client::new(),
            members: RwLock::new(HashSet::new()),
        };
        assert!(block.process_command("bogus", &OptionBag::default()).await.is_none());
    }
}
