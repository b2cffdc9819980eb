use crate::error::{ServerError, ServerResult};
use crate::routes::parse_json;
use crate::state::ServerState;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use gatekeep::Principal;
use serde::Deserialize;
use std::sync::Arc;

const OCR_FAILED: &str = "OCR processing failed";

#[derive(Debug, Default, Deserialize)]
pub struct OcrQuery {
    #[serde(default)]
    pub image_url: Option<String>,
    /// Comma-separated field names
    #[serde(default)]
    pub items: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OcrRequest {
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub item_names: Vec<String>,
}

/// Run OCR on an image given by query string (token required)
///
/// `GET /data?image_url=https://...&items=Ingredients,Nutrition`
pub async fn extract_from_query(
    State(state): State<Arc<ServerState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<OcrQuery>,
) -> ServerResult<impl IntoResponse> {
    let item_names = query
        .items
        .as_deref()
        .map(|items| {
            items
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    run_extraction(&state, &principal, query.image_url, item_names).await
}

/// Run OCR on an image given in a JSON body (token required)
pub async fn extract_from_body(
    State(state): State<Arc<ServerState>>,
    Extension(principal): Extension<Principal>,
    body: Bytes,
) -> ServerResult<impl IntoResponse> {
    let request: OcrRequest = parse_json(&body)?;
    run_extraction(&state, &principal, request.image_url, request.item_names).await
}

async fn run_extraction(
    state: &ServerState,
    principal: &Principal,
    image_url: Option<String>,
    item_names: Vec<String>,
) -> ServerResult<Json<serde_json::Value>> {
    let image_url = image_url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ServerError::validation("image_url is required"))?;

    tracing::debug!(user_id = %principal.subject_id, %image_url, items = item_names.len(), "OCR request");

    let result = state
        .ocr
        .extract(&image_url, &item_names)
        .await
        .map_err(|e| ServerError::dependency(OCR_FAILED, e))?;

    Ok(Json(result))
}
