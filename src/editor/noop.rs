//! No-op editor: mutating calls succeed without contacting anything.
//! Constructed when the remote editor's configured endpoint is empty; used
//! in tests and local-only mode.

use async_trait::async_trait;

use super::Editor;
use crate::at_uri::FeedUri;
use crate::post::{PostParams, PostRef};

#[derive(Default)]
pub struct NoopEditor;

#[async_trait]
impl Editor for NoopEditor {
    async fn open(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn add(&self, _params: PostParams) -> anyhow::Result<()> {
        Ok(())
    }

    async fn delete(&self, _feed_uri: FeedUri, _did: String, _rkey: String) -> anyhow::Result<()> {
        Ok(())
    }

    async fn delete_by_author(&self, _feed_uri: FeedUri, _did: String) -> anyhow::Result<()> {
        Ok(())
    }

    async fn trim(&self, _feed_uri: FeedUri, _remain: u64) -> anyhow::Result<u64> {
        Ok(0)
    }

    async fn load(&self, _feed_uri: FeedUri, _limit: u64) -> anyhow::Result<Vec<PostRef>> {
        Ok(Vec::new())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn all_mutators_succeed_without_state() {
        let editor = NoopEditor;
        editor.open().await.unwrap();
        let feed_uri = FeedUri::try_from("at://did:plc:a/app.bsky.feed.generator/f1".to_string()).unwrap();
        editor
            .add(PostParams {
                feed_uri: feed_uri.clone(),
                did: "did:plc:author".to_string(),
                rkey: "r1".to_string(),
                cid: "cid".to_string(),
                indexed_at: Utc::now(),
                langs: vec![],
            })
            .await
            .unwrap();
        editor.delete(feed_uri.clone(), "did:plc:author".to_string(), "r1".to_string()).await.unwrap();
        assert_eq!(editor.trim(feed_uri.clone(), 10).await.unwrap(), 0);
        assert!(editor.load(feed_uri, 10).await.unwrap().is_empty());
        editor.close().await.unwrap();
    }
}
