use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::models::{AnalysisRecord, AnalysisResults, AnalysisStatus};

/// Single-table SQLite backing for analysis records. Every call opens its own
/// connection, so the handle is cheap to clone into blocking tasks.
#[derive(Debug, Clone)]
pub struct RecordPersistence {
    db_path: PathBuf,
}

impl RecordPersistence {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed creating database directory {}", parent.display())
                })?;
            }
        }

        let persistence = Self {
            db_path: db_path.to_path_buf(),
        };
        persistence.initialize_schema()?;
        Ok(persistence)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("Failed opening {}", self.db_path.display()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")
            .context("Failed to set synchronous mode")?;
        f(&conn)
    }

    fn initialize_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                CREATE TABLE IF NOT EXISTS analyses (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    tenant_id TEXT NOT NULL,
                    artifact_id TEXT NOT NULL,
                    artifact_location TEXT NOT NULL,
                    status TEXT NOT NULL,
                    results_json TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS analyses_by_status ON analyses(status);
                ",
            )
            .context("Failed to initialize analyses schema")
        })
    }

    pub fn upsert(&self, record: &AnalysisRecord) -> Result<()> {
        let results_json = record
            .results
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to encode analysis results")?;

        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO analyses (
                    id, owner_id, tenant_id, artifact_id, artifact_location,
                    status, results_json, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    results_json = excluded.results_json,
                    updated_at = excluded.updated_at",
                params![
                    record.id,
                    record.owner_id,
                    record.tenant_id,
                    record.artifact_id,
                    record.artifact_location.to_string_lossy(),
                    record.status.as_str(),
                    results_json,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| format!("Failed to upsert analysis {}", record.id))?;
            Ok(())
        })
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM analyses WHERE id = ?1", params![id])
                .with_context(|| format!("Failed to delete analysis {id}"))?;
            Ok(())
        })
    }

    pub fn load_all(&self) -> Result<Vec<AnalysisRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, tenant_id, artifact_id, artifact_location,
                        status, results_json, created_at, updated_at
                 FROM analyses ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map([], PersistedRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read analyses")?;
            rows.into_iter().map(PersistedRow::into_record).collect()
        })
    }
}

struct PersistedRow {
    id: String,
    owner_id: String,
    tenant_id: String,
    artifact_id: String,
    artifact_location: String,
    status: String,
    results_json: Option<String>,
    created_at: String,
    updated_at: String,
}

impl PersistedRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            tenant_id: row.get(2)?,
            artifact_id: row.get(3)?,
            artifact_location: row.get(4)?,
            status: row.get(5)?,
            results_json: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<AnalysisRecord> {
        let status = self
            .status
            .parse::<AnalysisStatus>()
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Corrupt status for analysis {}", self.id))?;
        let results = match (status, self.results_json) {
            (AnalysisStatus::Completed, Some(raw)) => Some(
                serde_json::from_str::<AnalysisResults>(&raw)
                    .with_context(|| format!("Corrupt results for analysis {}", self.id))?,
            ),
            (AnalysisStatus::Completed, None) => {
                anyhow::bail!("Completed analysis {} has no results", self.id)
            }
            _ => None,
        };

        Ok(AnalysisRecord {
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            id: self.id,
            owner_id: self.owner_id,
            tenant_id: self.tenant_id,
            artifact_id: self.artifact_id,
            artifact_location: PathBuf::from(self.artifact_location),
            status,
            results,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp '{raw}'"))
}
