use axum::{response::IntoResponse, Json};
use serde_json::json;

use crate::errors::ApiError;

pub async fn handle_index() -> Result<impl IntoResponse, ApiError> {
    Ok(Json(json!({ "ok": true })))
}
