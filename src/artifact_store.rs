use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::fs;
use uuid::Uuid;

pub const ALLOWED_VIDEO_TYPES: [&str; 2] = ["video/mp4", "video/quicktime"];

pub fn is_allowed_video_type(mime: &str) -> bool {
    let essence = mime.split(';').next().unwrap_or("").trim();
    ALLOWED_VIDEO_TYPES
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(essence))
}

pub async fn ensure_upload_root(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create upload root at {}", path.display()))
}

/// `<unix-millis>-<uuid fragment>-<sanitized name>`. Unique, not reversible.
pub fn build_artifact_file_name(original_name: &str, mime: &str) -> String {
    let base = Path::new(original_name)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("");
    let mut sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    sanitized = sanitized.trim_matches('.').to_string();
    if sanitized.len() > 64 {
        sanitized = sanitized[sanitized.len() - 64..].to_string();
    }
    if sanitized.is_empty() {
        sanitized = "video".to_string();
    }
    if Path::new(&sanitized).extension().is_none() {
        sanitized.push_str(default_extension(mime));
    }

    let unique = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}",
        Utc::now().timestamp_millis(),
        &unique[..8],
        sanitized
    )
}

fn default_extension(mime: &str) -> &'static str {
    if mime.eq_ignore_ascii_case("video/quicktime") {
        ".mov"
    } else {
        ".mp4"
    }
}

pub fn artifact_path(upload_root: &Path, file_name: &str) -> PathBuf {
    upload_root.join(file_name)
}

/// Writes to a temporary sibling first so a crashed write never leaves a
/// half-written artifact under its final name.
pub async fn write_artifact(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create upload directory {}", parent.display()))?;
    }

    let tmp_path = path.with_extension("partial");
    fs::write(&tmp_path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    if let Err(err) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err).with_context(|| format!("Failed to finalize {}", path.display()));
    }
    Ok(())
}

pub async fn delete_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("Failed to delete {}", path.display())),
    }
}
