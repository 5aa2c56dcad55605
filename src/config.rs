//! Process-level configuration, loaded from environment variables with
//! explicit validation: small newtypes with a `TryFrom<String>` for anything
//! that isn't a bare string, so a malformed env var fails fast with context
//! instead of surfacing as a confusing error three layers down.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::editor::http_client::Auth;

#[derive(Clone, Copy)]
pub struct HttpPort(u16);

impl AsRef<u16> for HttpPort {
    fn as_ref(&self) -> &u16 {
        &self.0
    }
}

impl TryFrom<String> for HttpPort {
    type Error = anyhow::Error;
    fn try_from(value: String) -> Result<Self> {
        value.parse::<u16>().map(Self).context("parsing HTTP_PORT into u16 failed")
    }
}

#[derive(Clone, Copy)]
pub struct TaskInterval(Duration);

impl AsRef<Duration> for TaskInterval {
    fn as_ref(&self) -> &Duration {
        &self.0
    }
}

impl TryFrom<String> for TaskInterval {
    type Error = anyhow::Error;
    fn try_from(value: String) -> Result<Self> {
        let duration = duration_str::parse(&value).map_err(|err| anyhow!(err)).context("parsing duration env var failed")?;
        Ok(Self(duration))
    }
}

/// Authentication the remote editor client is constructed with. At most one
/// scheme is selected; `None` is valid (an editor with no auth headers).
#[derive(Clone)]
pub struct EditorAuthConfig {
    pub cf_access_client_id: Option<String>,
    pub cf_access_client_secret: Option<String>,
    pub api_key: Option<String>,
}

impl EditorAuthConfig {
    pub fn into_auth(self) -> Auth {
        match (self.cf_access_client_id, self.cf_access_client_secret, self.api_key) {
            (Some(id), Some(secret), _) => Auth::CloudflareAccess {
                client_id: id,
                client_secret: secret,
            },
            (_, _, Some(key)) => Auth::ApiKey {
                header_name: "X-API-Key".to_string(),
                key,
            },
            _ => Auth::None,
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub version: String,
    pub http_port: HttpPort,
    pub external_base: String,
    pub user_agent: String,
    pub firehose_hostname: String,
    pub cursor_dir: String,
    pub editor_base_url: String,
    pub editor_auth: EditorAuthConfig,
    pub editor_max_retries: u32,
    pub editor_retry_base: TaskInterval,
    pub feeds_config_dir: String,
    pub feed_definitions_file: String,
    pub certificate_bundles: Vec<String>,
}

impl Config {
    pub fn new() -> Result<Self> {
        let http_port: HttpPort = default_env("HTTP_PORT", "4050").try_into()?;
        let external_base = require_env("EXTERNAL_BASE")?;
        let user_agent = default_env("USER_AGENT", &format!("feedpipe/{}", version()?));

        let firehose_hostname = default_env("FIREHOSE_HOSTNAME", "jetstream2.us-east.bsky.network");
        let cursor_dir = default_env("CURSOR_DIR", "./data/cursor");

        // An empty base url yields a no-op editor (see `editor::noop`); local
        // runs and tests don't need a remote feed-storage service.
        let editor_base_url = optional_env("EDITOR_BASE_URL");
        let editor_auth = EditorAuthConfig {
            cf_access_client_id: non_empty(optional_env("CF_ACCESS_CLIENT_ID")),
            cf_access_client_secret: non_empty(optional_env("CF_ACCESS_CLIENT_SECRET")),
            api_key: non_empty(optional_env("EDITOR_API_KEY")),
        };
        let editor_max_retries: u32 = default_env("EDITOR_MAX_RETRIES", "3")
            .parse()
            .context("parsing EDITOR_MAX_RETRIES into u32 failed")?;
        let editor_retry_base: TaskInterval = default_env("EDITOR_RETRY_BASE", "500ms").try_into()?;

        let feeds_config_dir = default_env("FEEDS_CONFIG_DIR", "./config/feeds");
        let feed_definitions_file = default_env("FEED_DEFINITIONS_FILE", "./config/feeds.yaml");

        let certificate_bundles: Vec<String> = optional_env("CERTIFICATE_BUNDLES")
            .split(';')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        Ok(Self {
            version: version()?,
            http_port,
            external_base,
            user_agent,
            firehose_hostname,
            cursor_dir,
            editor_base_url,
            editor_auth,
            editor_max_retries,
            editor_retry_base,
            feeds_config_dir,
            feed_definitions_file,
            certificate_bundles,
        })
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{name} must be set"))
}

fn optional_env(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

fn default_env(name: &str, default_value: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default_value.to_string())
}

pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(str::to_string)
        .ok_or_else(|| anyhow!("one of GIT_HASH or CARGO_PKG_VERSION must be set"))
}
