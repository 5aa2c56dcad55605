use axum::{extract::{Path, State}, response::IntoResponse, Json};

use crate::errors::ApiError;
use crate::feed_config::FeedConfig;

use super::context::AdminContext;

pub async fn handle_reload_feed(
    State(ctx): State<AdminContext>,
    Path(id): Path<String>,
    Json(config): Json<FeedConfig>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.registry.reload(&id, config).await.map_err(|err| ApiError::bad_request(err.to_string()))?;
    let info = ctx
        .registry
        .get_feed_info(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("feed '{id}' is not registered")))?;
    Ok(Json(info))
}
