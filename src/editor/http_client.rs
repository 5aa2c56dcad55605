//! The HTTP-backed remote editor: single worker task, bounded request
//! channel, add-batching, and the retry policy wired over the wire contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::request::{
    AddPostBody, BatchAddPostsBody, BatchEntry, EditorRequest, GetPostsResponse, PingResponse,
    RemovePostBody, RemovePostByAuthorBody, RemovePostRef, TrimPostsBody, TrimPostsResponse,
    WirePostRef,
};
use super::retry::{classify_status, RetryOutcome, RetryPolicy};
use super::Editor;
use crate::at_uri::{FeedUri, PostUri};
use crate::post::{PostParams, PostRef};

const CHANNEL_CAPACITY: usize = 100;
const BATCH_SIZE: usize = 25;

/// Authentication chosen at construction, per the component design: none,
/// Cloudflare-Access headers, or an API-key header.
#[derive(Clone)]
pub enum Auth {
    None,
    CloudflareAccess { client_id: String, client_secret: String },
    ApiKey { header_name: String, key: String },
}

impl Auth {
    fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        match self {
            Auth::None => builder,
            Auth::CloudflareAccess { client_id, client_secret } => builder
                .header("CF-Access-Client-Id", client_id)
                .header("CF-Access-Client-Secret", client_secret),
            Auth::ApiKey { header_name, key } => builder.header(header_name.as_str(), key.as_str()),
        }
    }
}

struct Pool {
    entries: Vec<PostParams>,
    window_open: bool,
}

pub struct RemoteEditor {
    base_url: String,
    http: Client,
    auth: Auth,
    retry: RetryPolicy,
    flush_interval: Duration,
    sender: mpsc::Sender<EditorRequest>,
    receiver: Mutex<Option<mpsc::Receiver<EditorRequest>>>,
    pool: Arc<Mutex<Pool>>,
    cancel: CancellationToken,
    closing: Arc<AtomicBool>,
    worker_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    flush_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RemoteEditor {
    pub fn new(base_url: String, http: Client, auth: Auth, retry: RetryPolicy) -> Self {
        Self::with_flush_interval(base_url, http, auth, retry, Duration::from_secs(1))
    }

    pub fn with_flush_interval(
        base_url: String,
        http: Client,
        auth: Auth,
        retry: RetryPolicy,
        flush_interval: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            auth,
            retry,
            flush_interval,
            sender,
            receiver: Mutex::new(Some(receiver)),
            pool: Arc::new(Mutex::new(Pool {
                entries: Vec::new(),
                window_open: false,
            })),
            cancel: CancellationToken::new(),
            closing: Arc::new(AtomicBool::new(false)),
            worker_handle: Mutex::new(None),
            flush_handle: Mutex::new(None),
        }
    }

    async fn send_request(&self, request: EditorRequest) -> Result<()> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(anyhow!("editor is closing"));
        }
        self.sender
            .send(request)
            .await
            .map_err(|_| anyhow!("editor worker channel closed"))
    }

    /// Flushes the add-pool onto the worker channel ahead of a delete/trim
    /// request. Per the ordering guarantee, a caller must never observe a
    /// delete for a postUri whose add is still sitting in the pool.
    async fn flush_pool(&self) -> Result<()> {
        let entries = {
            let mut pool = self.pool.lock().unwrap();
            pool.window_open = false;
            std::mem::take(&mut pool.entries)
        };
        if entries.is_empty() {
            return Ok(());
        }
        let (reply, reply_rx) = oneshot::channel();
        self.send_request(EditorRequest::BatchAdd { entries, reply }).await?;
        reply_rx.await.map_err(|_| anyhow!("editor worker dropped the reply"))?
    }
}

#[async_trait]
impl Editor for RemoteEditor {
    async fn open(&self) -> Result<()> {
        let url = format!("{}/api/gyoka/ping", self.base_url);
        let http = self.http.clone();
        let auth = self.auth.clone();

        self.retry
            .run(&self.cancel, |_attempt| {
                let http = http.clone();
                let auth = auth.clone();
                let url = url.clone();
                async move {
                    let request = auth.apply(http.get(&url));
                    let response = match request.send().await {
                        Ok(r) => r,
                        Err(err) => return Err(RetryOutcome::Retryable(err.into())),
                    };
                    let status = response.status().as_u16();
                    if status != 200 {
                        let text = response.text().await.unwrap_or_default();
                        return Err(classify_status(status, &text));
                    }
                    match response.json::<PingResponse>().await {
                        Ok(body) if body.message == "Gyoka is available" => Ok(()),
                        Ok(body) => Err(RetryOutcome::NonRetryable(anyhow!(
                            "unexpected ping message '{}'",
                            body.message
                        ))),
                        Err(err) => Err(RetryOutcome::NonRetryable(err.into())),
                    }
                }
            })
            .await?;

        let receiver = self
            .receiver
            .lock()
            .unwrap()
            .take()
            .context("editor was already opened")?;

        let worker = tokio::spawn(worker_loop(
            self.http.clone(),
            self.auth.clone(),
            self.base_url.clone(),
            self.retry,
            receiver,
            self.cancel.clone(),
        ));
        *self.worker_handle.lock().unwrap() = Some(worker);

        let flush = tokio::spawn(flush_loop(
            self.pool.clone(),
            self.sender.clone(),
            self.flush_interval,
            self.cancel.clone(),
        ));
        *self.flush_handle.lock().unwrap() = Some(flush);

        Ok(())
    }

    async fn add(&self, params: PostParams) -> Result<()> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(anyhow!("editor is closing"));
        }

        let send_individually = {
            let mut pool = self.pool.lock().unwrap();
            if pool.window_open {
                pool.entries.push(params.clone());
                false
            } else {
                pool.window_open = true;
                true
            }
        };

        if send_individually {
            let (reply, reply_rx) = oneshot::channel();
            self.send_request(EditorRequest::Add { params, reply }).await?;
            reply_rx.await.map_err(|_| anyhow!("editor worker dropped the reply"))??;
        }
        Ok(())
    }

    async fn delete(&self, feed_uri: FeedUri, did: String, rkey: String) -> Result<()> {
        self.flush_pool().await?;
        let (reply, reply_rx) = oneshot::channel();
        self.send_request(EditorRequest::Delete {
            feed_uri,
            did,
            rkey,
            reply,
        })
        .await?;
        reply_rx.await.map_err(|_| anyhow!("editor worker dropped the reply"))?
    }

    async fn delete_by_author(&self, feed_uri: FeedUri, did: String) -> Result<()> {
        self.flush_pool().await?;
        let (reply, reply_rx) = oneshot::channel();
        self.send_request(EditorRequest::DeleteByAuthor { feed_uri, did, reply })
            .await?;
        reply_rx.await.map_err(|_| anyhow!("editor worker dropped the reply"))?
    }

    async fn trim(&self, feed_uri: FeedUri, remain: u64) -> Result<u64> {
        self.flush_pool().await?;
        let (reply, reply_rx) = oneshot::channel();
        self.send_request(EditorRequest::Trim { feed_uri, remain, reply })
            .await?;
        reply_rx.await.map_err(|_| anyhow!("editor worker dropped the reply"))?
    }

    async fn load(&self, feed_uri: FeedUri, limit: u64) -> Result<Vec<PostRef>> {
        if feed_uri.as_str().is_empty() {
            return Err(anyhow!("cannot load posts for an unset feed uri"));
        }

        let mut posts = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let remaining = limit.saturating_sub(posts.len() as u64);
            if remaining == 0 {
                break;
            }
            let page = fetch_posts_page(
                &self.http,
                &self.auth,
                &self.base_url,
                &self.retry,
                &self.cancel,
                feed_uri.as_str(),
                remaining,
                cursor.as_deref(),
            )
            .await?;

            for entry in page.posts {
                posts.push(entry.into_post_ref(&feed_uri)?);
            }

            match page.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(posts)
    }

    async fn close(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);

        let remaining = {
            let mut pool = self.pool.lock().unwrap();
            std::mem::take(&mut pool.entries)
        };
        if !remaining.is_empty() {
            let (reply, _reply_rx) = oneshot::channel();
            let _ = self.sender.send(EditorRequest::BatchAdd { entries: remaining, reply }).await;
        }

        self.cancel.cancel();

        let worker_handle = self.worker_handle.lock().unwrap().take();
        if let Some(handle) = worker_handle {
            let _ = handle.await;
        }
        let flush_handle = self.flush_handle.lock().unwrap().take();
        if let Some(handle) = flush_handle {
            let _ = handle.await;
        }
        Ok(())
    }
}

async fn flush_loop(
    pool: Arc<Mutex<Pool>>,
    sender: mpsc::Sender<EditorRequest>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let sleeper = tokio::time::sleep(interval);
    tokio::pin!(sleeper);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("editor flush loop shutting down");
                break;
            }
            _ = &mut sleeper => {
                let entries = {
                    let mut pool = pool.lock().unwrap();
                    pool.window_open = false;
                    std::mem::take(&mut pool.entries)
                };
                if !entries.is_empty() {
                    let (reply, _reply_rx) = oneshot::channel();
                    if sender.send(EditorRequest::BatchAdd { entries, reply }).await.is_err() {
                        break;
                    }
                }
                sleeper.as_mut().reset(tokio::time::Instant::now() + interval);
            }
        }
    }
}

async fn worker_loop(
    http: Client,
    auth: Auth,
    base_url: String,
    retry: RetryPolicy,
    mut receiver: mpsc::Receiver<EditorRequest>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                while let Ok(request) = receiver.try_recv() {
                    process_request(&http, &auth, &base_url, &retry, request).await;
                }
                break;
            }
            maybe_request = receiver.recv() => {
                match maybe_request {
                    Some(request) => process_request(&http, &auth, &base_url, &retry, request).await,
                    None => break,
                }
            }
        }
    }
}

async fn process_request(http: &Client, auth: &Auth, base_url: &str, retry: &RetryPolicy, request: EditorRequest) {
    let cancel = CancellationToken::new();
    match request {
        EditorRequest::Add { params, reply } => {
            let result = execute_add(http, auth, base_url, retry, &cancel, &params).await;
            let _ = reply.send(result);
        }
        EditorRequest::BatchAdd { entries, reply } => {
            let result = execute_batch_add(http, auth, base_url, retry, &cancel, entries).await;
            let _ = reply.send(result);
        }
        EditorRequest::Delete { feed_uri, did, rkey, reply } => {
            let result = execute_delete(http, auth, base_url, retry, &cancel, &feed_uri, &did, &rkey).await;
            let _ = reply.send(result);
        }
        EditorRequest::DeleteByAuthor { feed_uri, did, reply } => {
            let result = execute_delete_by_author(http, auth, base_url, retry, &cancel, &feed_uri, &did).await;
            let _ = reply.send(result);
        }
        EditorRequest::Trim { feed_uri, remain, reply } => {
            let result = execute_trim(http, auth, base_url, retry, &cancel, &feed_uri, remain).await;
            let _ = reply.send(result);
        }
    }
}

async fn send_json<B: serde::Serialize>(
    http: &Client,
    auth: &Auth,
    base_url: &str,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    path: &str,
    body_fn: impl Fn() -> B,
) -> Result<()> {
    let url = format!("{base_url}{path}");
    retry
        .run(cancel, |_attempt| {
            let url = url.clone();
            let body = body_fn();
            async move {
                let request = auth.apply(http.request(Method::POST, &url).json(&body));
                let response = match request.send().await {
                    Ok(r) => r,
                    Err(err) => return Err(RetryOutcome::Retryable(err.into())),
                };
                let status = response.status().as_u16();
                if status == 200 {
                    Ok(())
                } else {
                    let text = response.text().await.unwrap_or_default();
                    Err(classify_status(status, &text))
                }
            }
        })
        .await
}

async fn execute_add(
    http: &Client,
    auth: &Auth,
    base_url: &str,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    params: &PostParams,
) -> Result<()> {
    let post = WirePostRef::from_params(params)?;
    let feed = params.feed_uri.as_str().to_string();
    send_json(http, auth, base_url, retry, cancel, "/api/feed/addPost", || AddPostBody {
        feed: feed.clone(),
        post: post.clone(),
    })
    .await
}

/// Splits `entries` into chunks of at most `BATCH_SIZE`, grouped by feed
/// URI, and sends one `batchAddPosts` request per chunk. Carries the first
/// error observed but keeps sending the remaining chunks.
async fn execute_batch_add(
    http: &Client,
    auth: &Auth,
    base_url: &str,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    entries: Vec<PostParams>,
) -> Result<()> {
    let mut by_feed: HashMap<String, Vec<PostParams>> = HashMap::new();
    for entry in entries {
        by_feed.entry(entry.feed_uri.as_str().to_string()).or_default().push(entry);
    }

    let mut first_error = None;

    for (feed, posts) in by_feed {
        for chunk in posts.chunks(BATCH_SIZE) {
            let wire_posts: Vec<WirePostRef> = chunk
                .iter()
                .filter_map(|entry| WirePostRef::from_params(entry).ok())
                .collect();
            let feed = feed.clone();

            let result = send_json(http, auth, base_url, retry, cancel, "/api/feed/batchAddPosts", || {
                BatchAddPostsBody {
                    entries: vec![BatchEntry {
                        feed: feed.clone(),
                        posts: wire_posts.clone(),
                    }],
                }
            })
            .await;

            if let Err(err) = result {
                tracing::warn!(error = ?err, "batchAddPosts chunk failed");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn execute_delete(
    http: &Client,
    auth: &Auth,
    base_url: &str,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    feed_uri: &FeedUri,
    did: &str,
    rkey: &str,
) -> Result<()> {
    let post_uri = PostUri::from_parts(did, rkey)?;
    send_json(http, auth, base_url, retry, cancel, "/api/feed/removePost", || RemovePostBody {
        feed: feed_uri.as_str().to_string(),
        post: RemovePostRef {
            uri: post_uri.as_str().to_string(),
        },
    })
    .await
}

async fn execute_delete_by_author(
    http: &Client,
    auth: &Auth,
    base_url: &str,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    feed_uri: &FeedUri,
    did: &str,
) -> Result<()> {
    send_json(
        http,
        auth,
        base_url,
        retry,
        cancel,
        "/api/feed/removePostByAuthor",
        || RemovePostByAuthorBody {
            feed: feed_uri.as_str(),
            author: did,
        },
    )
    .await
}

async fn execute_trim(
    http: &Client,
    auth: &Auth,
    base_url: &str,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    feed_uri: &FeedUri,
    remain: u64,
) -> Result<u64> {
    let url = format!("{base_url}/api/feed/trimPosts");
    retry
        .run(cancel, |_attempt| {
            let url = url.clone();
            async move {
                let body = TrimPostsBody {
                    feed: feed_uri.as_str(),
                    remain,
                };
                let request = auth.apply(http.request(Method::POST, &url).json(&body));
                let response = match request.send().await {
                    Ok(r) => r,
                    Err(err) => return Err(RetryOutcome::Retryable(err.into())),
                };
                let status = response.status().as_u16();
                if status != 200 {
                    let text = response.text().await.unwrap_or_default();
                    return Err(classify_status(status, &text));
                }
                match response.json::<TrimPostsResponse>().await {
                    Ok(body) => Ok(body.deleted_count),
                    Err(err) => Err(RetryOutcome::NonRetryable(err.into())),
                }
            }
        })
        .await
}

#[allow(clippy::too_many_arguments)]
async fn fetch_posts_page(
    http: &Client,
    auth: &Auth,
    base_url: &str,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    feed: &str,
    limit: u64,
    cursor: Option<&str>,
) -> Result<GetPostsResponse> {
    let mut url = format!("{base_url}/api/feed/getPosts?feed={feed}&limit={limit}");
    if let Some(cursor) = cursor {
        url.push_str(&format!("&cursor={cursor}"));
    }

    retry
        .run(cancel, |_attempt| {
            let url = url.clone();
            async move {
                let request = auth.apply(http.get(&url));
                let response = match request.send().await {
                    Ok(r) => r,
                    Err(err) => return Err(RetryOutcome::Retryable(err.into())),
                };
                let status = response.status().as_u16();
                if status != 200 {
                    let text = response.text().await.unwrap_or_default();
                    return Err(classify_status(status, &text));
                }
                match response.json::<GetPostsResponse>().await {
                    Ok(body) => Ok(body),
                    Err(err) => Err(RetryOutcome::NonRetryable(err.into())),
                }
            }
        })
        .await
}
