use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::models::AnalysisStatus;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid artifact type: {0}")]
    InvalidArtifactType(String),

    #[error("artifact too large: {size} bytes exceeds {limit} bytes")]
    ArtifactTooLarge { size: usize, limit: usize },

    #[error("malformed upload: {0}")]
    MalformedUpload(String),

    #[error("analysis record not found: {0}")]
    RecordNotFound(String),

    #[error("persistence failure: {0:#}")]
    PersistenceFailure(#[source] anyhow::Error),

    #[error("analysis engine failure: {0}")]
    AnalysisEngineFailure(String),

    #[error("analysis engine timed out after {0:?}")]
    AnalysisTimeout(Duration),

    #[error("submission queue unavailable")]
    QueueUnavailable,

    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        from: AnalysisStatus,
        to: AnalysisStatus,
    },
}

impl AnalysisError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArtifactType(_)
            | Self::ArtifactTooLarge { .. }
            | Self::MalformedUpload(_) => StatusCode::BAD_REQUEST,
            Self::RecordNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::QueueUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::PersistenceFailure(_)
            | Self::AnalysisEngineFailure(_)
            | Self::AnalysisTimeout(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to clients. Paths, SQL errors and engine detail
    /// stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidArtifactType(_) => {
                "Invalid file type. Only MP4 and MOV videos are allowed.".to_string()
            }
            Self::ArtifactTooLarge { limit, .. } if *limit >= 1024 * 1024 => format!(
                "File too large. Maximum size is {}MB.",
                limit / (1024 * 1024)
            ),
            Self::ArtifactTooLarge { limit, .. } => {
                format!("File too large. Maximum size is {limit} bytes.")
            }
            Self::MalformedUpload(reason) => reason.clone(),
            Self::RecordNotFound(_) => "Analysis not found".to_string(),
            Self::PersistenceFailure(_) => "Failed to store analysis".to_string(),
            Self::AnalysisEngineFailure(_) | Self::AnalysisTimeout(_) => {
                "Analysis failed".to_string()
            }
            Self::QueueUnavailable => "Analysis queue is unavailable".to_string(),
            Self::InvalidTransition { from, .. } => {
                format!("Analysis is already {from}")
            }
        }
    }

    pub(crate) fn persistence(err: impl Into<anyhow::Error>) -> Self {
        Self::PersistenceFailure(err.into())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl IntoResponse for AnalysisError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {self:#}");
        }

        let body = Json(ErrorResponse {
            success: false,
            error: self.public_message(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn client_errors_map_to_4xx() {
        assert_eq!(
            AnalysisError::InvalidArtifactType("application/pdf".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AnalysisError::ArtifactTooLarge { size: 2, limit: 1 }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AnalysisError::RecordNotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn persistence_detail_is_not_exposed() {
        let err =
            AnalysisError::persistence(anyhow!("disk I/O error at /var/lib/swing/analyses.db"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Failed to store analysis");
        assert!(err.to_string().contains("/var/lib/swing"));
    }

    #[test]
    fn too_large_message_reports_megabytes() {
        let err = AnalysisError::ArtifactTooLarge {
            size: 200 * 1024 * 1024,
            limit: 100 * 1024 * 1024,
        };
        assert_eq!(err.public_message(), "File too large. Maximum size is 100MB.");
    }
}
