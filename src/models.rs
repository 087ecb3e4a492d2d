use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, str::FromStr};

use crate::error::AnalysisError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Edges of the lifecycle DAG. Nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: AnalysisStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown analysis status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeMarker {
    pub time: f64,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TechniqueMetrics {
    pub backswing: u8,
    pub follow_through: u8,
    pub contact_point: u8,
    pub racket_path: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FootworkMetrics {
    pub movement_efficiency: u8,
    pub recovery_speed: u8,
    pub court_coverage: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TechniqueAnalysis {
    pub overall_score: u8,
    pub feedback: Vec<String>,
    pub detailed_metrics: TechniqueMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_markers: Option<Vec<TimeMarker>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FootworkAnalysis {
    pub overall_score: u8,
    pub feedback: Vec<String>,
    pub detailed_metrics: FootworkMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_markers: Option<Vec<TimeMarker>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StrategyAnalysis {
    pub overall_score: u8,
    pub feedback: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patterns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResults {
    pub technique: TechniqueAnalysis,
    pub footwork: FootworkAnalysis,
    pub strategy: StrategyAnalysis,
}

impl AnalysisResults {
    /// Checks that every score sits in 0..=100. Engines are external, so their
    /// output is validated before it is attached to a record.
    pub fn validate(&self) -> Result<(), String> {
        for (field, score) in self.scores() {
            if score > 100 {
                return Err(format!("{field} out of range: {score}"));
            }
        }
        Ok(())
    }

    /// Every numeric score, keyed by its wire path.
    pub(crate) fn scores(&self) -> [(&'static str, u8); 10] {
        let t = &self.technique.detailed_metrics;
        let f = &self.footwork.detailed_metrics;
        [
            ("technique.overallScore", self.technique.overall_score),
            ("technique.detailedMetrics.backswing", t.backswing),
            ("technique.detailedMetrics.followThrough", t.follow_through),
            ("technique.detailedMetrics.contactPoint", t.contact_point),
            ("technique.detailedMetrics.racketPath", t.racket_path),
            ("footwork.overallScore", self.footwork.overall_score),
            (
                "footwork.detailedMetrics.movementEfficiency",
                f.movement_efficiency,
            ),
            ("footwork.detailedMetrics.recoverySpeed", f.recovery_speed),
            ("footwork.detailedMetrics.courtCoverage", f.court_coverage),
            ("strategy.overallScore", self.strategy.overall_score),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRecord {
    pub id: String,
    pub owner_id: String,
    pub tenant_id: String,
    pub artifact_id: String,
    pub artifact_location: PathBuf,
    pub status: AnalysisStatus,
    pub results: Option<AnalysisResults>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn new_pending(
        id: String,
        owner_id: String,
        tenant_id: String,
        artifact_id: String,
        artifact_location: PathBuf,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id,
            tenant_id,
            artifact_id,
            artifact_location,
            status: AnalysisStatus::Pending,
            results: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: AnalysisStatus) -> Result<(), AnalysisError> {
        if !self.status.can_transition_to(next) {
            return Err(AnalysisError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn begin_processing(&mut self) -> Result<(), AnalysisError> {
        self.transition(AnalysisStatus::Processing)
    }

    pub fn complete(&mut self, results: AnalysisResults) -> Result<(), AnalysisError> {
        self.transition(AnalysisStatus::Completed)?;
        self.results = Some(results);
        Ok(())
    }

    pub fn fail(&mut self) -> Result<(), AnalysisError> {
        self.transition(AnalysisStatus::Failed)?;
        self.results = None;
        Ok(())
    }

    pub fn snapshot(&self) -> AnalysisSnapshot {
        AnalysisSnapshot {
            id: self.id.clone(),
            artifact_id: self.artifact_id.clone(),
            status: self.status,
            results: match self.status {
                AnalysisStatus::Completed => self.results.clone(),
                _ => None,
            },
        }
    }
}

/// Point-in-time view handed to pollers.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSnapshot {
    pub id: String,
    pub artifact_id: String,
    pub status: AnalysisStatus,
    pub results: Option<AnalysisResults>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAcceptedResponse {
    pub success: bool,
    pub video_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisView {
    pub video_url: String,
    pub status: AnalysisStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<AnalysisResults>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub success: bool,
    pub analysis: AnalysisView,
}
