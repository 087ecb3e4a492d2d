use axum::{
    extract::{
        multipart::{Field, MultipartError, MultipartRejection},
        Multipart, Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tracing::{info, warn};

use crate::{
    error::AnalysisError,
    intake::{accept_upload, check_artifact_size, check_artifact_type, UploadRequest},
    models::{AnalysisResponse, AnalysisView, UploadAcceptedResponse},
    AppState,
};

pub async fn test() -> impl IntoResponse {
    Json(json!({ "success": true, "message": "API is working!" }))
}

pub async fn upload_video(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadAcceptedResponse>, AnalysisError> {
    let mut multipart = multipart.map_err(|err| {
        warn!("Rejected upload without multipart body: {err}");
        AnalysisError::MalformedUpload("Expected a multipart/form-data upload".to_string())
    })?;

    let limit = state.config.max_upload_bytes;
    let mut video: Option<(String, String, Vec<u8>)> = None;
    let mut owner_id = None;
    let mut tenant_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, limit))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "video" => {
                let mime = field.content_type().unwrap_or("").to_string();
                let file_name = field.file_name().unwrap_or("").to_string();
                check_artifact_type(&mime)?;
                let bytes = read_video(field, limit).await?;
                video = Some((file_name, mime, bytes));
            }
            "userId" => owner_id = Some(read_text(field, limit).await?),
            "shopId" => tenant_id = Some(read_text(field, limit).await?),
            _ => {}
        }
    }

    let Some((file_name, declared_mime, bytes)) = video else {
        return Err(AnalysisError::MalformedUpload(
            "No video file uploaded".to_string(),
        ));
    };
    let (Some(owner_id), Some(tenant_id)) = (owner_id, tenant_id) else {
        return Err(AnalysisError::MalformedUpload(
            "userId and shopId are required".to_string(),
        ));
    };

    let receipt = accept_upload(
        &state,
        UploadRequest {
            owner_id: owner_id.trim().to_string(),
            tenant_id: tenant_id.trim().to_string(),
            file_name,
            declared_mime,
            bytes,
        },
    )
    .await?;

    Ok(Json(UploadAcceptedResponse {
        success: true,
        video_id: receipt.analysis_id,
        message: receipt.message,
    }))
}

async fn read_video(mut field: Field<'_>, limit: usize) -> Result<Vec<u8>, AnalysisError> {
    let mut data = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|err| multipart_error(err, limit))?
    {
        check_artifact_size(data.len() + chunk.len(), limit)?;
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

async fn read_text(field: Field<'_>, limit: usize) -> Result<String, AnalysisError> {
    field.text().await.map_err(|err| multipart_error(err, limit))
}

fn multipart_error(err: MultipartError, limit: usize) -> AnalysisError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AnalysisError::ArtifactTooLarge {
            size: limit.saturating_add(1),
            limit,
        };
    }
    warn!("Multipart parsing error: {}", err.body_text());
    AnalysisError::MalformedUpload("Error parsing multipart request".to_string())
}

pub async fn get_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AnalysisResponse>, AnalysisError> {
    let snapshot = state.tracker.query(&id).await?;
    let video_url = format!(
        "{}/uploads/{}",
        state.config.public_base_url, snapshot.artifact_id
    );

    Ok(Json(AnalysisResponse {
        success: true,
        analysis: AnalysisView {
            video_url,
            status: snapshot.status,
            results: snapshot.results,
        },
    }))
}

pub async fn app_uninstalled(headers: HeaderMap) -> StatusCode {
    let shop = headers
        .get("x-shopify-shop-domain")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");
    info!(shop = %shop, "App uninstalled webhook received");
    StatusCode::OK
}
