use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_subscriber::prelude::*;

use feedpipe::block::BlockDeps;
use feedpipe::config::Config;
use feedpipe::editor::http_client::RemoteEditor;
use feedpipe::editor::noop::NoopEditor;
use feedpipe::editor::retry::RetryPolicy;
use feedpipe::editor::Editor;
use feedpipe::feed_config_provider::{FeedConfigProvider, FileConfigProvider, FileDefinitionProvider, RemoteConfigProvider};
use feedpipe::firehose::{ConsumerConfig, ConsumerTask, FileCursorStore};
use feedpipe::http::context::AdminContext;
use feedpipe::http::server::build_router;
use feedpipe::registry::Registry;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "feedpipe=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().pretty())
        .init();

    let version = feedpipe::config::version()?;

    env::args().for_each(|arg| {
        if arg == "--version" {
            println!("{}", version);
            std::process::exit(0);
        }
    });

    let config = Config::new()?;

    let mut client_builder = reqwest::Client::builder();
    for bundle in &config.certificate_bundles {
        tracing::info!(bundle = %bundle, "loading CA certificate");
        let cert = std::fs::read(bundle)?;
        let cert = reqwest::Certificate::from_pem(&cert)?;
        client_builder = client_builder.add_root_certificate(cert);
    }
    client_builder = client_builder.user_agent(config.user_agent.clone());
    let http_client = client_builder.build()?;

    let deps = BlockDeps {
        http_client: http_client.clone(),
    };

    let editor: Arc<dyn Editor> = if config.editor_base_url.is_empty() {
        Arc::new(NoopEditor)
    } else {
        let retry = RetryPolicy {
            base: *config.editor_retry_base.as_ref(),
            max_retries: config.editor_max_retries,
        };
        let editor = RemoteEditor::new(
            config.editor_base_url.clone(),
            http_client.clone(),
            config.editor_auth.clone().into_auth(),
            retry,
        );
        editor.open().await.context("opening remote editor")?;
        Arc::new(editor)
    };

    let registry = Arc::new(Registry::new(editor, deps));

    let definition_provider = FileDefinitionProvider::new(config.feeds_config_dir.clone());
    let file_config_provider = FileConfigProvider::new(config.feeds_config_dir.clone());
    let remote_config_provider = RemoteConfigProvider::new(config.external_base.clone(), http_client.clone());

    match definition_provider.load().await {
        Ok(definitions) => {
            let mut loaded = Vec::with_capacity(definitions.len());
            for definition in definitions {
                let reference = definition.config_file.clone().unwrap_or_else(|| definition.id.clone());
                let config_result = if definition.config_file.is_some() {
                    file_config_provider.load(&reference).await
                } else {
                    remote_config_provider.load(definition.uri.as_str()).await
                };
                match config_result {
                    Ok(feed_config) => loaded.push((definition, feed_config)),
                    Err(err) => tracing::error!(feed = %definition.id, error = ?err, "failed to load feed config; skipping"),
                }
            }
            registry.load_feeds(loaded).await;
        }
        Err(err) => tracing::warn!(error = ?err, "no feed definitions loaded at startup"),
    }

    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    {
        let tracker = tracker.clone();
        let inner_token = token.clone();

        let ctrl_c = async {
            signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::spawn(async move {
            tokio::select! {
                () = inner_token.cancelled() => {},
                _ = terminate => {},
                _ = ctrl_c => {},
            }
            tracker.close();
            inner_token.cancel();
        });
    }

    {
        let registry = registry.clone();
        let cursor_store = Arc::new(FileCursorStore::new(config.cursor_dir.clone()));
        let consumer_config = ConsumerConfig {
            hostname: config.firehose_hostname.clone(),
            user_agent: config.user_agent.clone(),
            collections: vec!["app.bsky.feed.post".to_string()],
        };
        let inner_token = token.clone();
        let task = ConsumerTask::new(consumer_config, registry, cursor_store, inner_token.clone());
        tracker.spawn(async move {
            if let Err(err) = task.run().await {
                tracing::error!(error = ?err, "firehose consumer task failed");
            }
            inner_token.cancel();
        });
    }

    {
        let ctx = AdminContext::new(registry.clone());
        let app = build_router(ctx);
        let http_port = *config.http_port.as_ref();
        let inner_token = token.clone();
        tracker.spawn(async move {
            let listener = match TcpListener::bind(&format!("0.0.0.0:{http_port}")).await {
                Ok(listener) => listener,
                Err(err) => {
                    tracing::error!(error = ?err, "failed to bind admin HTTP listener");
                    inner_token.cancel();
                    return;
                }
            };

            let shutdown_token = inner_token.clone();
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_token.cancelled().await;
                    tracing::info!("admin http server shutting down");
                })
                .await;
            if let Err(err) = result {
                tracing::error!(error = ?err, "admin http server failed");
            }
            inner_token.cancel();
        });
    }

    tracker.wait().await;
    registry.shutdown().await;

    Ok(())
}
