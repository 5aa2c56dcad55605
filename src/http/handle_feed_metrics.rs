use axum::{extract::{Path, State}, response::IntoResponse, Json};
use serde_json::json;

use crate::errors::ApiError;

use super::context::AdminContext;

/// Dumps the named gauges the feed's blocks expose via the metric-provider
/// capability, plus the feed's own post count.
pub async fn handle_feed_metrics(
    State(ctx): State<AdminContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let feed = ctx
        .registry
        .get_feed(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("feed '{id}' is not registered")))?;

    let gauges: Vec<_> = feed
        .metrics()
        .into_iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    Ok(Json(json!({ "feed": id, "gauges": gauges })))
}
