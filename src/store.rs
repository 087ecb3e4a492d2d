use std::{collections::HashMap, path::Path, sync::Arc};

use anyhow::Context;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::{
    error::AnalysisError,
    models::{AnalysisRecord, AnalysisStatus},
    persistence::RecordPersistence,
};

/// Record store shared by intake and the lifecycle tracker.
///
/// Reads take a short read lock on the in-memory map and never wait on disk.
/// Mutations of one record are serialized through that record's gate: the
/// record is cloned, the change applied, the clone persisted, and only then
/// swapped into the map, so a failed write leaves the visible state untouched.
/// Writes to different records do not wait on each other.
pub struct AnalysisStore {
    records: RwLock<HashMap<String, AnalysisRecord>>,
    gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    persistence: Option<RecordPersistence>,
}

impl AnalysisStore {
    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            persistence: None,
        }
    }

    pub async fn open(db_path: &Path) -> anyhow::Result<Self> {
        let db_path = db_path.to_path_buf();
        let (persistence, records) = tokio::task::spawn_blocking(move || {
            let persistence = RecordPersistence::open(&db_path)?;
            let records = persistence.load_all()?;
            anyhow::Ok((persistence, records))
        })
        .await
        .context("Analysis store loader panicked")??;

        info!(
            db_path = %persistence.db_path().display(),
            records = records.len(),
            "Loaded persisted analyses"
        );

        let records = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();

        Ok(Self {
            records: RwLock::new(records),
            gates: Mutex::new(HashMap::new()),
            persistence: Some(persistence),
        })
    }

    pub async fn get(&self, id: &str) -> Option<AnalysisRecord> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn ids_with_status(&self, status: AnalysisStatus) -> Vec<String> {
        let records = self.records.read().await;
        let mut matching: Vec<&AnalysisRecord> =
            records.values().filter(|r| r.status == status).collect();
        matching.sort_by_key(|r| r.created_at);
        matching.into_iter().map(|r| r.id.clone()).collect()
    }

    pub async fn insert(&self, record: AnalysisRecord) -> Result<(), AnalysisError> {
        let gate = self.gate(&record.id).await;
        let _held = gate.lock().await;
        if self.records.read().await.contains_key(&record.id) {
            return Err(AnalysisError::persistence(anyhow::anyhow!(
                "analysis id {} already exists",
                record.id
            )));
        }
        self.persist(&record).await?;
        self.records.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    /// Only used to roll back a record whose intake could not complete.
    pub async fn remove(&self, id: &str) -> Result<(), AnalysisError> {
        let gate = self.gate(id).await;
        let _held = gate.lock().await;
        if let Some(persistence) = self.persistence.clone() {
            let id = id.to_string();
            run_blocking(move || persistence.delete(&id)).await?;
        }
        self.records.write().await.remove(id);
        Ok(())
    }

    /// Applies `change` to a copy of the record and commits it once durable.
    pub async fn update<F>(&self, id: &str, change: F) -> Result<AnalysisRecord, AnalysisError>
    where
        F: FnOnce(&mut AnalysisRecord) -> Result<(), AnalysisError>,
    {
        let gate = self.gate(id).await;
        let _held = gate.lock().await;
        let mut next = self
            .get(id)
            .await
            .ok_or_else(|| AnalysisError::RecordNotFound(id.to_string()))?;
        change(&mut next)?;
        self.persist(&next).await?;
        self.records.write().await.insert(id.to_string(), next.clone());
        Ok(next)
    }

    /// Same as [`update`](Self::update) but commits to memory even when the
    /// write fails. Reserved for forcing `failed` after a persistence error so
    /// that no record is left unresolved for the life of the process.
    pub async fn update_volatile<F>(
        &self,
        id: &str,
        change: F,
    ) -> Result<AnalysisRecord, AnalysisError>
    where
        F: FnOnce(&mut AnalysisRecord) -> Result<(), AnalysisError>,
    {
        let gate = self.gate(id).await;
        let _held = gate.lock().await;
        let mut next = self
            .get(id)
            .await
            .ok_or_else(|| AnalysisError::RecordNotFound(id.to_string()))?;
        change(&mut next)?;
        let persisted = self.persist(&next).await;
        self.records.write().await.insert(id.to_string(), next.clone());
        persisted.map(|_| next)
    }

    /// Gates outlive removal so that an insert racing a late update on the
    /// same id still serializes behind it.
    async fn gate(&self, id: &str) -> Arc<Mutex<()>> {
        self.gates
            .lock()
            .await
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    async fn persist(&self, record: &AnalysisRecord) -> Result<(), AnalysisError> {
        let Some(persistence) = self.persistence.clone() else {
            return Ok(());
        };
        let record = record.clone();
        run_blocking(move || persistence.upsert(&record)).await
    }
}

async fn run_blocking<F>(f: F) -> Result<(), AnalysisError>
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(AnalysisError::persistence),
        Err(err) => Err(AnalysisError::persistence(err)),
    }
}
