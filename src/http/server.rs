use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::context::AdminContext;
use super::{
    handle_clear_feed, handle_command, handle_create_feed, handle_delete_feed, handle_feed_config,
    handle_feed_detail, handle_feed_metrics, handle_feed_status, handle_index, handle_list_feeds, handle_posts,
    handle_reload_feed,
};

pub fn build_router(ctx: AdminContext) -> Router {
    Router::new()
        .route("/", get(handle_index::handle_index))
        .route(
            "/feeds",
            get(handle_list_feeds::handle_list_feeds).post(handle_create_feed::handle_create_feed),
        )
        .route(
            "/feeds/:id",
            get(handle_feed_detail::handle_feed_detail).delete(handle_delete_feed::handle_delete_feed),
        )
        .route("/feeds/:id/status", put(handle_feed_status::handle_update_feed_status))
        .route("/feeds/:id/reload", post(handle_reload_feed::handle_reload_feed))
        .route("/feeds/:id/clear", post(handle_clear_feed::handle_clear_feed))
        .route("/feeds/:id/config", get(handle_feed_config::handle_feed_config))
        .route("/feeds/:id/metrics", get(handle_feed_metrics::handle_feed_metrics))
        .route(
            "/feeds/:id/posts",
            get(handle_posts::handle_list_posts).post(handle_posts::handle_add_post),
        )
        .route(
            "/feeds/:id/posts/:did/:rkey",
            get(handle_posts::handle_get_post).delete(handle_posts::handle_delete_post),
        )
        .route("/feeds/:id/command", post(handle_command::handle_command))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(ctx)
}
