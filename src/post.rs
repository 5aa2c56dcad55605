//! The post reference types the store and editor pass around.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::at_uri::{FeedUri, PostUri};

/// A post as it sits in a feed's in-memory store. Languages are deliberately
/// not part of this type: they're forwarded to the remote editor but the
/// store itself has no use for them (see the data model's identity note).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRef {
    pub feed_uri: FeedUri,
    pub post_uri: PostUri,
    pub cid: String,
    pub indexed_at: DateTime<Utc>,
}

/// Arguments to `Store::add` / `Editor::add`: everything needed to mint a
/// `PostRef` plus the languages the remote editor records but the store does not.
#[derive(Clone, Debug)]
pub struct PostParams {
    pub feed_uri: FeedUri,
    pub did: String,
    pub rkey: String,
    pub cid: String,
    pub indexed_at: DateTime<Utc>,
    pub langs: Vec<String>,
}

impl PostParams {
    pub fn post_uri(&self) -> anyhow::Result<PostUri> {
        PostUri::from_parts(&self.did, &self.rkey)
    }

    /// RFC3339 with nanosecond precision, matching the wire/store contract.
    pub fn indexed_at_rfc3339(&self) -> String {
        self.indexed_at.trunc_subsecs(9).to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
    }
}

impl PostRef {
    pub fn indexed_at_rfc3339(&self) -> String {
        self.indexed_at.trunc_subsecs(9).to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
    }
}

/// The decoded shape of an `app.bsky.feed.post` record, as much of it as the
/// pipeline engine needs. Extra fields from the wire record are simply not
/// represented here; they never reach a block.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PostRecord {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub langs: Option<Vec<String>>,
    #[serde(default)]
    pub reply: Option<ReplyRef>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplyRef {
    pub root: StrongRef,
    pub parent: StrongRef,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}
