use axum::{extract::{Path, State}, response::IntoResponse, Json};
use serde::Deserialize;

use crate::errors::ApiError;
use crate::option_value::OptionBag;

use super::context::AdminContext;

#[derive(Deserialize)]
pub struct CommandBody {
    #[serde(rename = "blockName")]
    pub block_name: String,
    pub command: String,
    #[serde(default)]
    pub args: OptionBag,
}

pub async fn handle_command(
    State(ctx): State<AdminContext>,
    Path(id): Path<String>,
    Json(body): Json<CommandBody>,
) -> Result<impl IntoResponse, ApiError> {
    let feed = ctx
        .registry
        .get_feed(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("feed '{id}' is not registered")))?;
    let result = feed
        .process_command(&body.block_name, &body.command, &body.args)
        .await
        .map_err(ApiError::from_command_error)?;
    Ok(Json(result))
}
