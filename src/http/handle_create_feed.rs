use axum::{extract::State, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::at_uri::FeedUri;
use crate::errors::ApiError;
use crate::feed_config::FeedConfig;
use crate::registry::{FeedDefinition, FeedStatus};

use super::context::AdminContext;

#[derive(Deserialize)]
pub struct CreateFeedBody {
    pub id: String,
    pub uri: FeedUri,
    #[serde(rename = "configFile")]
    pub config_file: Option<String>,
    #[serde(rename = "inactiveStart")]
    pub inactive_start: Option<DateTime<Utc>>,
    pub config: FeedConfig,
}

pub async fn handle_create_feed(
    State(ctx): State<AdminContext>,
    Json(body): Json<CreateFeedBody>,
) -> Result<impl IntoResponse, ApiError> {
    let definition = FeedDefinition {
        id: body.id,
        uri: body.uri,
        config_file: body.config_file,
        inactive_start: body.inactive_start,
    };
    ctx.registry.create(definition.clone(), body.config, FeedStatus::Active).await;
    let info = ctx
        .registry
        .get_feed_info(&definition.id)
        .await
        .ok_or_else(|| ApiError::not_found("feed vanished immediately after creation"))?;
    Ok(Json(info))
}
