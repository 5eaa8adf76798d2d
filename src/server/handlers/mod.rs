pub mod health;
pub mod inspect;
pub mod metrics;
pub mod objects;

use axum::extract::Multipart;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::json;

use crate::error::PatchguardError;

/// Wrapper that converts `PatchguardError` into an HTTP response.
pub struct ApiError(pub PatchguardError);

impl From<PatchguardError> for ApiError {
    fn from(e: PatchguardError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        if status >= 500 {
            tracing::error!(error = %self.0, kind = self.0.kind(), "request failed");
        }
        let body = json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
            "status": status,
        });
        (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            axum::Json(body),
        )
            .into_response()
    }
}

/// One uploaded file from a multipart body.
pub struct Upload {
    pub filename: String,
    pub data: Bytes,
}

/// Drain every file field of a multipart body, in order.
pub async fn read_uploads(mut multipart: Multipart) -> Result<Vec<Upload>, ApiError> {
    let mut uploads = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PatchguardError::Validation(format!("malformed multipart body: {e}")))?
    {
        let filename = field
            .file_name()
            .or_else(|| field.name())
            .map(str::to_string)
            .unwrap_or_else(|| format!("image-{}", uploads.len()));
        let data = field
            .bytes()
            .await
            .map_err(|e| PatchguardError::Validation(format!("failed to read {filename}: {e}")))?;
        uploads.push(Upload { filename, data });
    }
    Ok(uploads)
}

/// Decode uploads on a blocking worker, keeping per-file failures.
pub async fn decode_uploads(
    uploads: Vec<Upload>,
) -> Result<Vec<(String, crate::error::Result<image::RgbImage>)>, ApiError> {
    let decoded = tokio::task::spawn_blocking(move || {
        uploads
            .into_iter()
            .map(|upload| {
                let image = crate::features::decode_image(&upload.data);
                (upload.filename, image)
            })
            .collect::<Vec<_>>()
    })
    .await
    .map_err(PatchguardError::from)?;
    Ok(decoded)
}
