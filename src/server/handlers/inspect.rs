use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use axum::Json;
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::PatchguardError;
use crate::server::{AppState, RESULT_HEADER, SCORE_HEADER};
use crate::types::{InspectionResult, ObjectId};

use super::{decode_uploads, read_uploads, ApiError};

fn header_value(value: String) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(&value)
        .map_err(|e| ApiError(PatchguardError::Internal(format!("bad header value: {e}"))))
}

/// Score one image and return its heatmap overlay as PNG, with the score and
/// verdict in response headers.
#[instrument(skip(state, multipart), fields(object_id = %id))]
pub async fn inspect_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<(HeaderMap, Bytes), ApiError> {
    let upload = read_uploads(multipart)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| PatchguardError::Validation("no image in request".into()))?;

    let (filename, decoded) = decode_uploads(vec![upload])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| PatchguardError::Internal("decoded upload went missing".into()))?;
    let image = decoded.map_err(ApiError::from)?;

    let (inspection, png) = state
        .engine
        .inspect_with_heatmap(&id, image)
        .await
        .map_err(ApiError::from)?;
    debug!(
        object_id = %id,
        %filename,
        score = inspection.score.score,
        result = %inspection.result,
        "inspected image"
    );

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    headers.insert(
        HeaderName::from_static(SCORE_HEADER),
        header_value(format!("{:.6}", inspection.score.score))?,
    );
    headers.insert(
        HeaderName::from_static(RESULT_HEADER),
        header_value(inspection.result.to_string())?,
    );
    Ok((headers, png))
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum BatchItem {
    Scored {
        filename: String,
        score: f32,
        result: InspectionResult,
    },
    Failed {
        filename: String,
        error: String,
        kind: &'static str,
    },
}

impl BatchItem {
    fn failed(filename: String, error: &PatchguardError) -> Self {
        BatchItem::Failed {
            filename,
            error: error.to_string(),
            kind: error.kind(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub object_id: ObjectId,
    pub batch_size: usize,
    pub results: Vec<BatchItem>,
}

/// Score every uploaded image independently. Files that fail to decode or
/// extract are reported in place; the rest are still scored.
#[instrument(skip(state, multipart), fields(object_id = %id))]
pub async fn inspect_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Json<BatchResponse>, ApiError> {
    let uploads = read_uploads(multipart).await?;
    if uploads.is_empty() {
        return Err(ApiError(PatchguardError::Validation(
            "no images in request".into(),
        )));
    }
    let max = state.config.server.max_batch_size;
    if uploads.len() > max {
        return Err(ApiError(PatchguardError::Validation(format!(
            "batch of {} images exceeds the limit of {max}",
            uploads.len()
        ))));
    }

    let decoded = decode_uploads(uploads).await?;
    let batch_size = decoded.len();

    let mut slots: Vec<(String, Option<PatchguardError>)> = Vec::with_capacity(batch_size);
    let mut images = Vec::new();
    for (filename, result) in decoded {
        match result {
            Ok(image) => {
                images.push(image);
                slots.push((filename, None));
            }
            Err(e) => slots.push((filename, Some(e))),
        }
    }

    let mut inspections = state
        .engine
        .inspect_batch(&id, images)
        .await
        .map_err(ApiError::from)?
        .into_iter();

    let mut results = Vec::with_capacity(batch_size);
    for (filename, decode_error) in slots {
        let item = match decode_error {
            Some(e) => BatchItem::failed(filename, &e),
            None => match inspections.next() {
                Some(Ok(inspection)) => BatchItem::Scored {
                    filename,
                    score: inspection.score.score,
                    result: inspection.result,
                },
                Some(Err(e)) => BatchItem::failed(filename, &e),
                None => BatchItem::failed(
                    filename,
                    &PatchguardError::Internal("missing batch result".into()),
                ),
            },
        };
        results.push(item);
    }

    Ok(Json(BatchResponse {
        object_id: id,
        batch_size,
        results,
    }))
}
