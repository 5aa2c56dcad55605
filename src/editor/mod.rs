//! The remote-editor client: a queued, batched, retrying mirror of each
//! feed's post set.

pub mod http_client;
pub mod noop;
pub mod request;
pub mod retry;

use async_trait::async_trait;

use crate::at_uri::FeedUri;
use crate::post::{PostParams, PostRef};

/// The editor's public surface. `Store` holds an `Arc<dyn Editor>` and never
/// sees the worker/queue/batching machinery behind it.
#[async_trait]
pub trait Editor: Send + Sync {
    async fn open(&self) -> anyhow::Result<()>;
    async fn add(&self, params: PostParams) -> anyhow::Result<()>;
    async fn delete(&self, feed_uri: FeedUri, did: String, rkey: String) -> anyhow::Result<()>;
    async fn delete_by_author(&self, feed_uri: FeedUri, did: String) -> anyhow::Result<()>;
    async fn trim(&self, feed_uri: FeedUri, remain: u64) -> anyhow::Result<u64>;
    async fn load(&self, feed_uri: FeedUri, limit: u64) -> anyhow::Result<Vec<PostRef>>;
    async fn close(&self) -> anyhow::Result<()>;
}
