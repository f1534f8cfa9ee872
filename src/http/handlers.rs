use std::collections::BTreeSet;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::AppState;
use crate::{
    blob::upload_within,
    db::{
        helpers::parse_datetime,
        models::{NewRover, NewStagingRecord},
    },
    detection::{DetectionPoint, DetectionResult, Strategy},
    error::PipelineError,
    payload,
    stores::{ArchiveFilter, StoreHealth},
};

#[derive(Debug, Deserialize)]
pub struct ImageRequest {
    pub image: String,
}

#[derive(Debug, Deserialize)]
pub struct DetectRequest {
    pub image: String,
    pub strategy: Strategy,
}

#[derive(Debug, Serialize)]
pub struct DetectionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    image: String,
    #[serde(rename = "imageResult")]
    image_result: Vec<DetectionPoint>,
}

impl DetectionResponse {
    fn new(result: DetectionResult) -> Self {
        Self {
            status: None,
            image: payload::png_data_uri(&result.annotated_image),
            image_result: result.points,
        }
    }
}

async fn run_detection(
    state: &AppState,
    image: &str,
    strategy: Strategy,
) -> Result<DetectionResult, PipelineError> {
    let bytes = payload::decode_image(image)
        .map_err(|err| PipelineError::Decode(format!("{err:#}")))?;
    state.engine.detect_blocking(bytes, strategy).await
}

pub async fn find_flower_cv(
    State(state): State<AppState>,
    Json(request): Json<ImageRequest>,
) -> Result<Json<DetectionResponse>, PipelineError> {
    let result = run_detection(&state, &request.image, Strategy::Contour).await?;
    Ok(Json(DetectionResponse::new(result)))
}

pub async fn find_flower_yolo(
    State(state): State<AppState>,
    Json(request): Json<ImageRequest>,
) -> Result<Json<DetectionResponse>, PipelineError> {
    let result = run_detection(&state, &request.image, Strategy::Model).await?;
    let mut response = DetectionResponse::new(result);
    response.status = Some(StatusCode::OK.as_u16());
    Ok(Json(response))
}

pub async fn detect(
    State(state): State<AppState>,
    Json(request): Json<DetectRequest>,
) -> Result<Json<DetectionResponse>, PipelineError> {
    let result = run_detection(&state, &request.image, request.strategy).await?;
    Ok(Json(DetectionResponse::new(result)))
}

pub async fn trigger_drain(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, PipelineError> {
    let report = state.drainer.drain().await?;
    let message = if report.migrated_count + report.quarantined_count == 0 {
        "No operations found."
    } else {
        "Trigger executed and data archived successfully."
    };
    Ok(Json(json!({
        "message": message,
        "migrated_count": report.migrated_count,
        "replayed_count": report.replayed_count,
        "quarantined_count": report.quarantined_count,
    })))
}

#[derive(Debug, Deserialize)]
pub struct PollinationQuery {
    #[serde(default)]
    pub rover_ids: String,
    pub start_date: String,
    pub end_date: String,
}

fn parse_rover_ids(raw: &str) -> Result<BTreeSet<i64>, PipelineError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .map_err(|_| PipelineError::InvalidInput(format!("invalid rover id {part:?}")))
        })
        .collect()
}

fn parse_bound(raw: &str, field: &str) -> Result<DateTime<Utc>, PipelineError> {
    parse_datetime(raw, field).map_err(|err| PipelineError::InvalidInput(format!("{err:#}")))
}

pub async fn pollination(
    State(state): State<AppState>,
    Query(query): Query<PollinationQuery>,
) -> Result<impl IntoResponse, PipelineError> {
    let rover_ids = parse_rover_ids(&query.rover_ids)?;
    let start = parse_bound(&query.start_date, "start_date")?;
    let end = parse_bound(&query.end_date, "end_date")?;

    let summary = state.aggregator.summarize(&rover_ids, start, end).await?;
    Ok(Json(summary))
}

pub async fn register_rover(
    State(state): State<AppState>,
    Json(rover): Json<NewRover>,
) -> Result<impl IntoResponse, PipelineError> {
    let rover = state
        .rovers
        .register_rover(rover)
        .await
        .map_err(PipelineError::staging)?;
    info!("registered rover {} for user {}", rover.rover_id, rover.user_id);
    Ok(Json(json!({
        "rover_id": rover.rover_id,
        "created_at": rover.created_at,
    })))
}

pub async fn flower_images(
    State(state): State<AppState>,
    Path(rover_id): Path<i64>,
) -> Result<impl IntoResponse, PipelineError> {
    let records = state
        .archive
        .find(&ArchiveFilter::rover(rover_id))
        .await
        .map_err(PipelineError::archive_read)?;
    if records.is_empty() {
        return Err(PipelineError::NotFound(format!(
            "no image data found for rover {rover_id}"
        )));
    }
    Ok(Json(records))
}

/// Stage one telemetry record. The image must decode here, so a bad payload
/// can't wedge a later drain.
pub async fn stage_operation(
    State(state): State<AppState>,
    Json(record): Json<NewStagingRecord>,
) -> Result<impl IntoResponse, PipelineError> {
    payload::decode_image(&record.result_image)
        .map_err(|err| PipelineError::Decode(format!("{err:#}")))?;

    let staged = state
        .staging
        .insert_record(record)
        .await
        .map_err(PipelineError::staging)?;
    Ok((StatusCode::CREATED, Json(staged)))
}

fn default_extension() -> String {
    "png".into()
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub base64_string: String,
    #[serde(default = "default_extension")]
    pub file_extension: String,
}

pub async fn upload_image(
    State(state): State<AppState>,
    Json(request): Json<UploadRequest>,
) -> Result<impl IntoResponse, PipelineError> {
    let bytes = payload::decode_image(&request.base64_string)
        .map_err(|err| PipelineError::Decode(format!("{err:#}")))?;

    let extension = request.file_extension.trim_start_matches('.');
    if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(PipelineError::InvalidInput(format!(
            "invalid file extension {:?}",
            request.file_extension
        )));
    }

    let name = format!("{}.{}", Uuid::new_v4(), extension);
    let blob_url = upload_within(state.blobs.as_ref(), bytes, &name, state.upload_timeout).await?;
    Ok(Json(json!({
        "message": "Image uploaded successfully",
        "blob_url": blob_url,
    })))
}

#[derive(Debug, Serialize)]
struct HealthDetails {
    staging: StoreHealth,
    archive: StoreHealth,
}

pub async fn db_health(State(state): State<AppState>) -> impl IntoResponse {
    let (staging, archive) = tokio::join!(state.staging.health(), state.archive.health());
    let status = if staging.is_healthy() && archive.is_healthy() {
        "healthy"
    } else {
        "unhealthy"
    };
    Json(json!({
        "status": status,
        "details": HealthDetails { staging, archive },
    }))
}
