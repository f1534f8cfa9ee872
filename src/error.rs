use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failure kinds surfaced by the detection, migration and aggregation paths.
///
/// Store seams report `anyhow::Error`; callers classify those into a kind here
/// with the matching constructor so the HTTP boundary can pick a status.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Decode(String),
    #[error("{0}")]
    ModelUnavailable(String),
    #[error("{0}")]
    BlobUpload(String),
    #[error("{0}")]
    ArchiveWrite(String),
    #[error("{0}")]
    ArchiveRead(String),
    #[error("{0}")]
    StagingStore(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Internal(String),
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Decode(_) => "DecodeError",
            PipelineError::ModelUnavailable(_) => "ModelUnavailableError",
            PipelineError::BlobUpload(_) => "BlobUploadError",
            PipelineError::ArchiveWrite(_) => "ArchiveWriteError",
            PipelineError::ArchiveRead(_) => "ArchiveReadError",
            PipelineError::StagingStore(_) => "StagingStoreError",
            PipelineError::NotFound(_) => "NotFoundError",
            PipelineError::InvalidInput(_) => "InvalidInput",
            PipelineError::Internal(_) => "InternalError",
            PipelineError::Timeout { .. } => "Timeout",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::Decode(_) | PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn staging(err: anyhow::Error) -> Self {
        PipelineError::StagingStore(format!("{err:#}"))
    }

    pub fn blob(err: anyhow::Error) -> Self {
        PipelineError::BlobUpload(format!("{err:#}"))
    }

    pub fn archive_write(err: anyhow::Error) -> Self {
        PipelineError::ArchiveWrite(format!("{err:#}"))
    }

    pub fn archive_read(err: anyhow::Error) -> Self {
        PipelineError::ArchiveRead(format!("{err:#}"))
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    kind: &'a str,
    message: String,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("{}: {self}", self.kind());
        }
        let body = ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_faults_map_to_4xx() {
        assert_eq!(
            PipelineError::Decode("bad png".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PipelineError::NotFound("rover 9".into()).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn operational_faults_map_to_5xx() {
        let err = PipelineError::blob(anyhow::anyhow!("connection reset"));
        assert_eq!(err.kind(), "BlobUploadError");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let timeout = PipelineError::Timeout {
            operation: "blob upload",
            seconds: 30,
        };
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(timeout.to_string(), "blob upload timed out after 30s");
    }
}
