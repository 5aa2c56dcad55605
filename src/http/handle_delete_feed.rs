use axum::{extract::{Path, State}, response::IntoResponse, Json};
use serde_json::json;

use crate::errors::ApiError;

use super::context::AdminContext;

pub async fn handle_delete_feed(State(ctx): State<AdminContext>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    ctx.registry.delete(&id).await.map_err(|err| ApiError::not_found(err.to_string()))?;
    Ok(Json(json!({ "ok": true })))
}
