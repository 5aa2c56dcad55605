use axum::{extract::{Path, State}, response::IntoResponse, Json};

use crate::errors::ApiError;

use super::context::AdminContext;

pub async fn handle_feed_detail(State(ctx): State<AdminContext>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let info = ctx
        .registry
        .get_feed_info(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("feed '{id}' is not registered")))?;
    Ok(Json(info))
}
