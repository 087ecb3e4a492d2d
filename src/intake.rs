use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    artifact_store::{
        artifact_path, build_artifact_file_name, delete_file_if_exists, is_allowed_video_type,
        write_artifact,
    },
    error::AnalysisError,
    lifecycle::Submission,
    models::AnalysisRecord,
    AppState,
};

pub const UPLOAD_ACCEPTED_MESSAGE: &str = "Video uploaded successfully. Analysis in progress.";

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub owner_id: String,
    pub tenant_id: String,
    pub file_name: String,
    pub declared_mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub analysis_id: String,
    pub message: String,
}

pub fn check_artifact_type(declared_mime: &str) -> Result<(), AnalysisError> {
    if is_allowed_video_type(declared_mime) {
        Ok(())
    } else {
        Err(AnalysisError::InvalidArtifactType(declared_mime.to_string()))
    }
}

pub fn check_artifact_size(size: usize, limit: usize) -> Result<(), AnalysisError> {
    if size > limit {
        Err(AnalysisError::ArtifactTooLarge { size, limit })
    } else {
        Ok(())
    }
}

/// Validates and stores an upload, creates its `pending` record, and queues it
/// for the lifecycle tracker. Any rejection leaves neither a record nor a file
/// behind.
pub async fn accept_upload(
    state: &AppState,
    request: UploadRequest,
) -> Result<UploadReceipt, AnalysisError> {
    check_artifact_type(&request.declared_mime)?;
    check_artifact_size(request.bytes.len(), state.config.max_upload_bytes)?;
    if request.owner_id.trim().is_empty() || request.tenant_id.trim().is_empty() {
        return Err(AnalysisError::MalformedUpload(
            "userId and shopId are required".to_string(),
        ));
    }

    let file_name = build_artifact_file_name(&request.file_name, &request.declared_mime);
    let location = artifact_path(&state.config.upload_root, &file_name);
    write_artifact(&location, &request.bytes)
        .await
        .map_err(AnalysisError::persistence)?;

    let analysis_id = Uuid::new_v4().to_string();
    let record = AnalysisRecord::new_pending(
        analysis_id.clone(),
        request.owner_id,
        request.tenant_id,
        file_name.clone(),
        location.clone(),
    );

    if let Err(err) = state.store.insert(record).await {
        discard_artifact(&location).await;
        return Err(err);
    }

    let submission = Submission {
        analysis_id: analysis_id.clone(),
        artifact_location: location.clone(),
    };
    if state.submissions.send(submission).await.is_err() {
        warn!(analysis_id = %analysis_id, "Submission queue closed; rolling back upload");
        if let Err(err) = state.store.remove(&analysis_id).await {
            warn!(analysis_id = %analysis_id, "Rollback of record failed: {err:#}");
        }
        discard_artifact(&location).await;
        return Err(AnalysisError::QueueUnavailable);
    }

    info!(
        analysis_id = %analysis_id,
        artifact = %file_name,
        size_bytes = request.bytes.len(),
        "Upload accepted"
    );

    Ok(UploadReceipt {
        analysis_id,
        message: UPLOAD_ACCEPTED_MESSAGE.to_string(),
    })
}

async fn discard_artifact(location: &std::path::Path) {
    if let Err(err) = delete_file_if_exists(location).await {
        warn!("Failed removing artifact {}: {err:#}", location.display());
    }
}
