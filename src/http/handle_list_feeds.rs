use axum::{extract::State, response::IntoResponse, Json};

use crate::errors::ApiError;

use super::context::AdminContext;

pub async fn handle_list_feeds(State(ctx): State<AdminContext>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(ctx.registry.get_all_feeds().await))
}
