pub mod context;
pub mod handle_clear_feed;
pub mod handle_command;
pub mod handle_create_feed;
pub mod handle_delete_feed;
pub mod handle_feed_config;
pub mod handle_feed_detail;
pub mod handle_feed_metrics;
pub mod handle_feed_status;
pub mod handle_index;
pub mod handle_list_feeds;
pub mod handle_posts;
pub mod handle_reload_feed;
pub mod server;
