//! The per-feed store: an ordered post sequence plus a `postUri` index,
//! bounded by a high-water/low-water trim policy, synchronously mirrored to
//! the remote editor.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::at_uri::{FeedUri, PostUri};
use crate::editor::Editor;
use crate::post::{PostParams, PostRef};

/// Default page size for `load` when the feed has no `trimAt` configured.
const DEFAULT_LOAD_LIMIT: u64 = 1000;

struct Inner {
    sequence: Vec<PostRef>,
    index: HashSet<PostUri>,
}

impl Inner {
    fn empty() -> Self {
        Self {
            sequence: Vec::new(),
            index: HashSet::new(),
        }
    }

    fn insert(&mut self, post: PostRef) {
        self.index.insert(post.post_uri.clone());
        self.sequence.push(post);
    }

    fn remove(&mut self, post_uri: &PostUri) -> bool {
        if !self.index.remove(post_uri) {
            return false;
        }
        self.sequence.retain(|post| &post.post_uri != post_uri);
        true
    }
}

#[derive(Clone, Copy)]
struct TrimPolicy {
    trim_at: u64,
    trim_remain: u64,
}

impl TrimPolicy {
    fn enabled(&self) -> bool {
        !(self.trim_at == 0 && self.trim_remain == 0)
    }
}

/// An in-memory ordered post set for one feed. Invariants (see the data
/// model): index membership iff sequence membership, no duplicate
/// `postUri`, all entries share `feed_uri`, and after `trim(n)` the
/// retained subset is the n entries of greatest `indexed_at`.
pub struct Store {
    feed_uri: FeedUri,
    editor: Arc<dyn Editor>,
    inner: RwLock<Inner>,
    trim: RwLock<TrimPolicy>,
}

impl Store {
    pub fn new(feed_uri: FeedUri, editor: Arc<dyn Editor>, trim_at: u64, trim_remain: u64) -> Self {
        Self {
            feed_uri,
            editor,
            inner: RwLock::new(Inner::empty()),
            trim: RwLock::new(TrimPolicy { trim_at, trim_remain }),
        }
    }

    pub fn feed_uri(&self) -> &FeedUri {
        &self.feed_uri
    }

    /// Updates the trim policy in place, e.g. after a config reload.
    pub fn set_trim_policy(&self, trim_at: u64, trim_remain: u64) {
        *self.trim.write().unwrap() = TrimPolicy { trim_at, trim_remain };
    }

    /// Idempotent on `postUri`: re-adding an already-indexed post succeeds
    /// without a mirror call. Trims automatically once `trimAt` is exceeded.
    pub async fn add(&self, did: &str, rkey: &str, cid: &str, indexed_at: DateTime<Utc>, langs: Vec<String>) -> Result<()> {
        let post_uri = PostUri::from_parts(did, rkey)?;

        let (already_present, len) = {
            let inner = self.inner.read().unwrap();
            (inner.index.contains(&post_uri), inner.sequence.len())
        };
        if already_present {
            return Ok(());
        }

        {
            let mut inner = self.inner.write().unwrap();
            if inner.index.contains(&post_uri) {
                return Ok(());
            }
            inner.insert(PostRef {
                feed_uri: self.feed_uri.clone(),
                post_uri,
                cid: cid.to_string(),
                indexed_at,
            });
        }
        let new_len = len + 1;

        self.editor
            .add(PostParams {
                feed_uri: self.feed_uri.clone(),
                did: did.to_string(),
                rkey: rkey.to_string(),
                cid: cid.to_string(),
                indexed_at,
                langs,
            })
            .await?;

        let policy = *self.trim.read().unwrap();
        if policy.trim_at > 0 && new_len as u64 > policy.trim_at {
            self.trim(policy.trim_remain).await?;
        }
        Ok(())
    }

    /// A no-op (idempotent) if `(did, rkey)` isn't currently indexed.
    pub async fn delete(&self, did: &str, rkey: &str) -> Result<()> {
        let post_uri = PostUri::from_parts(did, rkey)?;
        let removed = self.inner.write().unwrap().remove(&post_uri);
        if !removed {
            return Ok(());
        }
        self.editor.delete(self.feed_uri.clone(), did.to_string(), rkey.to_string()).await
    }

    pub async fn delete_by_author(&self, did: &str) -> Result<Vec<PostRef>> {
        let deleted = {
            let mut inner = self.inner.write().unwrap();
            let (retained, deleted): (Vec<PostRef>, Vec<PostRef>) = inner
                .sequence
                .drain(..)
                .partition(|post| post.post_uri.did() != did);
            for post in &deleted {
                inner.index.remove(&post.post_uri);
            }
            inner.sequence = retained;
            deleted
        };

        if !deleted.is_empty() {
            self.editor.delete_by_author(self.feed_uri.clone(), did.to_string()).await?;
        }
        Ok(deleted)
    }

    /// Sorts by `indexed_at` descending and truncates to `remain`, rebuilding
    /// the index from the retained subset. Post-condition: `post_count() <= remain`.
    pub async fn trim(&self, remain: u64) -> Result<()> {
        {
            let mut inner = self.inner.write().unwrap();
            inner.sequence.sort_unstable_by(|a, b| b.indexed_at.cmp(&a.indexed_at));
            inner.sequence.truncate(remain as usize);
            inner.index = inner.sequence.iter().map(|post| post.post_uri.clone()).collect();
        }
        self.editor.trim(self.feed_uri.clone(), remain).await?;
        Ok(())
    }

    /// Rebuilds the sequence and index from the editor's most-recent posts
    /// for this feed. Fetches up to `trimAt` posts, or a fixed default if
    /// trimming is disabled.
    pub async fn load(&self) -> Result<()> {
        let limit = {
            let policy = *self.trim.read().unwrap();
            if policy.trim_at > 0 { policy.trim_at } else { DEFAULT_LOAD_LIMIT }
        };
        let posts = self.editor.load(self.feed_uri.clone(), limit).await?;

        let mut inner = self.inner.write().unwrap();
        inner.index = posts.iter().map(|post| post.post_uri.clone()).collect();
        inner.sequence = posts;
        Ok(())
    }

    pub fn get_post(&self, post_uri: &PostUri) -> Option<PostRef> {
        let inner = self.inner.read().unwrap();
        if !inner.index.contains(post_uri) {
            return None;
        }
        inner.sequence.iter().find(|post| &post.post_uri == post_uri).cloned()
    }

    /// `did == None` lists every post; `Some(did)` scopes to that actor.
    pub fn list(&self, did: Option<&str>) -> Vec<PostRef> {
        let inner = self.inner.read().unwrap();
        match did {
            Some(did) => inner.sequence.iter().filter(|post| post.post_uri.did() == did).cloned().collect(),
            None => inner.sequence.clone(),
        }
    }

    pub fn post_count(&self) -> usize {
        self.inner.read().unwrap().sequence.len()
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.editor.close().await
    }
}
