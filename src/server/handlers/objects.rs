use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::error::PatchguardError;
use crate::profile::ProfileSummary;
use crate::server::AppState;
use crate::types::{CoresetStrategy, ObjectId};

use super::{decode_uploads, read_uploads, ApiError};

#[derive(Debug, Serialize)]
pub struct ObjectListResponse {
    pub objects: Vec<ObjectId>,
}

pub async fn list_objects(
    State(state): State<AppState>,
) -> Result<Json<ObjectListResponse>, ApiError> {
    let objects = state
        .engine
        .list_profiles()
        .await
        .map_err(ApiError::from)?;
    Ok(Json(ObjectListResponse { objects }))
}

pub async fn get_object(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProfileSummary>, ApiError> {
    let profile = state
        .engine
        .load_profile(&id)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(profile.summary()))
}

pub async fn delete_object(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let deleted = state
        .engine
        .delete_profile(&id)
        .await
        .map_err(ApiError::from)?;
    if !deleted {
        return Err(ApiError(PatchguardError::ProfileNotFound { object_id: id }));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Per-request overrides of the configured training defaults.
#[derive(Debug, Default, Deserialize)]
pub struct TrainParams {
    pub top_k: Option<usize>,
    pub coreset_ratio: Option<f32>,
    pub coreset_strategy: Option<CoresetStrategy>,
    pub seed: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct TrainResponse {
    #[serde(flatten)]
    pub profile: ProfileSummary,
    pub images_received: usize,
    pub images_skipped: usize,
}

/// Flips the training cancel signal if the request goes away mid-run.
struct CancelOnDrop(watch::Sender<bool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        let _ = self.0.send(true);
    }
}

#[instrument(skip(state, params, multipart), fields(object_id = %id))]
pub async fn train_object(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<TrainParams>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<TrainResponse>), ApiError> {
    let mut config = state.config.training.profile_config();
    if let Some(top_k) = params.top_k {
        config.top_k = top_k;
    }
    if let Some(ratio) = params.coreset_ratio {
        config.coreset_ratio = ratio;
    }
    if let Some(strategy) = params.coreset_strategy {
        config.coreset_strategy = strategy;
    }
    if params.seed.is_some() {
        config.seed = params.seed;
    }
    config.validate().map_err(ApiError::from)?;

    let uploads = read_uploads(multipart).await?;
    let images_received = uploads.len();

    let mut images = Vec::with_capacity(images_received);
    for (filename, decoded) in decode_uploads(uploads).await? {
        match decoded {
            Ok(image) => images.push(image),
            Err(e) => warn!(object_id = %id, %filename, error = %e, "skipping undecodable image"),
        }
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let _cancel = CancelOnDrop(cancel_tx);

    let profile = state
        .engine
        .build_profile(&id, images, config, Some(cancel_rx))
        .await
        .map_err(ApiError::from)?;

    let summary = profile.summary();
    let images_skipped = images_received - summary.images_used;
    info!(
        object_id = %id,
        images_received,
        images_skipped,
        threshold = summary.threshold,
        "training request complete"
    );

    Ok((
        StatusCode::CREATED,
        Json(TrainResponse {
            profile: summary,
            images_received,
            images_skipped,
        }),
    ))
}
