use axum::{extract::{Path, State}, response::IntoResponse, Json};
use serde_json::json;

use crate::errors::ApiError;

use super::context::AdminContext;

pub async fn handle_clear_feed(State(ctx): State<AdminContext>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let feed = ctx
        .registry
        .get_feed(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("feed '{id}' is not registered")))?;
    feed.clear().await.map_err(|err| ApiError::bad_request(err.to_string()))?;
    Ok(Json(json!({ "ok": true })))
}
