use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use axum_extra::extract::Query;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::at_uri::PostUri;
use crate::errors::ApiError;

use super::context::AdminContext;

#[derive(Deserialize)]
pub struct ListPostsQuery {
    pub did: Option<String>,
}

pub async fn handle_list_posts(
    State(ctx): State<AdminContext>,
    Path(id): Path<String>,
    Query(query): Query<ListPostsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let feed = ctx
        .registry
        .get_feed(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("feed '{id}' is not registered")))?;
    Ok(Json(feed.list_post(query.did.as_deref())))
}

pub async fn handle_get_post(
    State(ctx): State<AdminContext>,
    Path((id, did, rkey)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let feed = ctx
        .registry
        .get_feed(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("feed '{id}' is not registered")))?;
    let post_uri = PostUri::from_parts(&did, &rkey).map_err(|err| ApiError::bad_request(err.to_string()))?;
    let post = feed
        .get_post(&post_uri)
        .ok_or_else(|| ApiError::not_found(format!("post '{post_uri}' is not in feed '{id}'")))?;
    Ok(Json(post))
}

#[derive(Deserialize)]
pub struct AddPostBody {
    pub did: String,
    pub rkey: String,
    pub cid: String,
    #[serde(rename = "indexedAt")]
    pub indexed_at: DateTime<Utc>,
    #[serde(default)]
    pub langs: Vec<String>,
}

pub async fn handle_add_post(
    State(ctx): State<AdminContext>,
    Path(id): Path<String>,
    Json(body): Json<AddPostBody>,
) -> Result<impl IntoResponse, ApiError> {
    let feed = ctx
        .registry
        .get_feed(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("feed '{id}' is not registered")))?;
    feed.add_post(&body.did, &body.rkey, &body.cid, body.indexed_at, body.langs)
        .await
        .map_err(|err| ApiError::bad_request(err.to_string()))?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn handle_delete_post(
    State(ctx): State<AdminContext>,
    Path((id, did, rkey)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let feed = ctx
        .registry
        .get_feed(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("feed '{id}' is not registered")))?;
    feed.delete_post(&did, &rkey).await.map_err(|err| ApiError::bad_request(err.to_string()))?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
