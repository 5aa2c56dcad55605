//! The editor's request envelope and the wire shapes the HTTP remote editor
//! sends and parses.

use serde::{Deserialize, Serialize};

use crate::at_uri::FeedUri;
use crate::post::{PostParams, PostRef};

/// One pending request to the editor worker, each carrying a one-shot reply
/// channel so the enqueuing caller can await the outcome.
pub enum EditorRequest {
    Add {
        params: PostParams,
        reply: tokio::sync::oneshot::Sender<anyhow::Result<()>>,
    },
    BatchAdd {
        entries: Vec<PostParams>,
        reply: tokio::sync::oneshot::Sender<anyhow::Result<()>>,
    },
    Delete {
        feed_uri: FeedUri,
        did: String,
        rkey: String,
        reply: tokio::sync::oneshot::Sender<anyhow::Result<()>>,
    },
    DeleteByAuthor {
        feed_uri: FeedUri,
        did: String,
        reply: tokio::sync::oneshot::Sender<anyhow::Result<()>>,
    },
    Trim {
        feed_uri: FeedUri,
        remain: u64,
        reply: tokio::sync::oneshot::Sender<anyhow::Result<u64>>,
    },
}

#[derive(Clone, Serialize)]
pub struct WirePostRef {
    pub uri: String,
    pub cid: String,
    #[serde(rename = "indexedAt")]
    pub indexed_at: String,
    pub languages: Vec<String>,
}

impl WirePostRef {
    pub fn from_params(params: &PostParams) -> anyhow::Result<Self> {
        Ok(Self {
            uri: params.post_uri()?.as_str().to_string(),
            cid: params.cid.clone(),
            indexed_at: params.indexed_at_rfc3339(),
            languages: params.langs.clone(),
        })
    }
}

#[derive(Serialize)]
pub struct AddPostBody {
    pub feed: String,
    pub post: WirePostRef,
}

#[derive(Serialize)]
pub struct BatchEntry {
    pub feed: String,
    pub posts: Vec<WirePostRef>,
}

#[derive(Serialize)]
pub struct BatchAddPostsBody {
    pub entries: Vec<BatchEntry>,
}

#[derive(Serialize)]
pub struct RemovePostBody {
    pub feed: String,
    pub post: RemovePostRef,
}

#[derive(Serialize)]
pub struct RemovePostRef {
    pub uri: String,
}

#[derive(Serialize)]
pub struct RemovePostByAuthorBody {
    pub feed: String,
    pub author: String,
}

#[derive(Serialize)]
pub struct TrimPostsBody {
    pub feed: String,
    pub remain: u64,
}

#[derive(Deserialize)]
pub struct TrimPostsResponse {
    #[serde(rename = "deletedCount")]
    pub deleted_count: u64,
}

#[derive(Deserialize)]
pub struct PingResponse {
    pub message: String,
}

#[derive(Deserialize)]
pub struct GetPostsResponse {
    #[allow(dead_code)]
    pub feed: String,
    #[allow(dead_code)]
    pub cursor: Option<String>,
    pub posts: Vec<GetPostsEntry>,
}

#[derive(Deserialize)]
pub struct GetPostsEntry {
    pub uri: String,
    pub cid: String,
    #[serde(rename = "indexedAt")]
    pub indexed_at: String,
}

impl GetPostsEntry {
    pub fn into_post_ref(self, feed_uri: &FeedUri) -> anyhow::Result<PostRef> {
        use crate::at_uri::PostUri;
        use chrono::DateTime;
        let post_uri = PostUri::try_from(self.uri)?;
        let indexed_at = DateTime::parse_from_rfc3339(&self.indexed_at)?.into();
        Ok(PostRef {
            feed_uri: feed_uri.clone(),
            post_uri,
            cid: self.cid,
            indexed_at,
        })
    }
}
