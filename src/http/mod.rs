mod handlers;

use std::{sync::Arc, time::Duration};

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use crate::{
    detection::DetectionEngine,
    migration::Drainer,
    pollination::PollinationAggregator,
    stores::{ArchiveStore, BlobStore, RoverDirectory, StagingStore},
};

/// Rover images arrive base64-encoded inside JSON.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Everything a handler may touch, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DetectionEngine>,
    pub drainer: Arc<Drainer>,
    pub aggregator: Arc<PollinationAggregator>,
    pub staging: Arc<dyn StagingStore>,
    pub archive: Arc<dyn ArchiveStore>,
    pub rovers: Arc<dyn RoverDirectory>,
    pub blobs: Arc<dyn BlobStore>,
    pub upload_timeout: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/find-flower-cv", post(handlers::find_flower_cv))
        .route("/find-flower-yolo", post(handlers::find_flower_yolo))
        .route("/detect", post(handlers::detect))
        .route("/rover/trigger/", post(handlers::trigger_drain))
        .route("/pollination", get(handlers::pollination))
        .route("/rovers/", post(handlers::register_rover))
        .route("/rovers/flower-images/:rover_id", get(handlers::flower_images))
        .route("/operations", post(handlers::stage_operation))
        .route("/upload-image/", post(handlers::upload_image))
        .route("/db-health", get(handlers::db_health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors())
        .with_state(state)
}

/// Local pages and `file://` documents (origin `null`) may call in with
/// credentials.
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            |origin: &HeaderValue, _request_parts| is_local_origin(origin.as_bytes()),
        ))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

fn is_local_origin(origin: &[u8]) -> bool {
    origin == b"null" || origin == b"http://localhost" || origin.starts_with(b"http://localhost:")
}
