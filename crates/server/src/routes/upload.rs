use crate::error::{ServerError, ServerResult};
use crate::state::ServerState;
use crate::store::StoreError;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use gatekeep::Principal;
use serde::Serialize;
use std::sync::Arc;

const UPLOAD_FAILED: &str = "File upload failed";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub message: &'static str,
    pub url: String,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    pub file_size: usize,
}

/// `{uuid}.{ext}`, keeping the original extension when there is one.
fn unique_object_name(original: Option<&str>) -> String {
    let id = uuid::Uuid::new_v4();
    let ext = original
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));
    match ext {
        Some(ext) => format!("{id}.{ext}"),
        None => id.to_string(),
    }
}

/// Upload a file to the object store (token required)
///
/// Expects `multipart/form-data` with a `file` field.
pub async fn upload_file(
    State(state): State<Arc<ServerState>>,
    Extension(principal): Extension<Principal>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ServerResult<impl IntoResponse> {
    let mut multipart =
        multipart.map_err(|_| ServerError::validation("Expected multipart/form-data body"))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ServerError::validation("Malformed multipart body"))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let original_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let body = field
            .bytes()
            .await
            .map_err(|_| ServerError::validation("Malformed multipart body"))?;

        let file_name = unique_object_name(original_name.as_deref());
        let file_size = body.len();
        let url = state
            .objects
            .put(&file_name, body)
            .await
            .map_err(|e| match e {
                StoreError::TooLarge { .. } => ServerError::validation("File too large"),
                other => ServerError::dependency(UPLOAD_FAILED, other),
            })?;

        tracing::info!(user_id = %principal.subject_id, %file_name, file_size, "file uploaded");

        return Ok(Json(UploadResponse {
            success: true,
            message: "File uploaded successfully",
            url,
            file_name,
            file_type: content_type,
            file_size,
        }));
    }

    Err(ServerError::validation("No file provided"))
}

/// Serve a stored object back (development stand-in for the bucket's
/// public URL).
///
/// The uploader's declared type is never echoed. Known image extensions
/// are served inline; anything else is an opaque download.
pub async fn get_object(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ServerResult<impl IntoResponse> {
    let object = state
        .objects
        .get(&id)
        .await
        .map_err(|e| ServerError::dependency("Failed to read object", e))?
        .ok_or(ServerError::NotFound)?;

    Ok((object_headers(&object.key), object.body))
}

fn object_headers(key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    match image_content_type(key) {
        Some(content_type) => {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        None => {
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            headers.insert(CONTENT_DISPOSITION, HeaderValue::from_static("attachment"));
        }
    }
    headers
}

fn image_content_type(key: &str) -> Option<&'static str> {
    let ext = key.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        _ => None,
    }
}
