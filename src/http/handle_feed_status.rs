use axum::{extract::{Path, State}, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::errors::ApiError;
use crate::registry::FeedStatus;

use super::context::AdminContext;

#[derive(Deserialize)]
pub struct UpdateStatusBody {
    pub status: FeedStatus,
}

pub async fn handle_update_feed_status(
    State(ctx): State<AdminContext>,
    Path(id): Path<String>,
    Json(body): Json<UpdateStatusBody>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.registry
        .update_status(&id, body.status)
        .await
        .map_err(|err| ApiError::not_found(err.to_string()))?;
    Ok(Json(json!({ "ok": true })))
}
