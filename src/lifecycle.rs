//! Analysis lifecycle tracker.
//!
//! Owns every status transition of an [`AnalysisRecord`](crate::models::AnalysisRecord):
//! `pending -> processing` on submit, then `completed` or `failed` from the
//! deferred engine task. Nothing else writes `status` or `results`.

use std::{path::PathBuf, sync::Arc, time::Duration};

use tokio::{sync::mpsc, time};
use tracing::{error, info, warn};

use crate::{
    engine::{AnalysisEngine, AnalysisJob},
    error::AnalysisError,
    models::{AnalysisResults, AnalysisSnapshot, AnalysisStatus},
    store::AnalysisStore,
};

/// Hand-off from intake to the tracker.
#[derive(Debug, Clone)]
pub struct Submission {
    pub analysis_id: String,
    pub artifact_location: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// The record already left `pending`; nothing was started.
    AlreadySubmitted(AnalysisStatus),
}

#[derive(Clone)]
pub struct LifecycleTracker {
    store: Arc<AnalysisStore>,
    engine: Arc<dyn AnalysisEngine>,
    timeout: Duration,
}

impl LifecycleTracker {
    pub fn new(
        store: Arc<AnalysisStore>,
        engine: Arc<dyn AnalysisEngine>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            timeout,
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Moves a pending record to `processing` and schedules its analysis.
    ///
    /// The `processing` write is durable and visible before this returns. The
    /// analysis itself runs on its own task; this never waits for it.
    pub async fn submit(
        &self,
        analysis_id: &str,
        artifact_location: PathBuf,
    ) -> Result<SubmitOutcome, AnalysisError> {
        match self
            .store
            .update(analysis_id, |record| record.begin_processing())
            .await
        {
            Ok(_) => {}
            Err(AnalysisError::InvalidTransition { from, .. }) => {
                info!(
                    analysis_id = %analysis_id,
                    status = %from,
                    "Ignoring duplicate submission"
                );
                return Ok(SubmitOutcome::AlreadySubmitted(from));
            }
            Err(err) => return Err(err),
        }

        info!(
            analysis_id = %analysis_id,
            engine = self.engine.name(),
            "Analysis processing"
        );

        let job = AnalysisJob {
            analysis_id: analysis_id.to_string(),
            artifact_location,
        };
        let tracker = self.clone();
        tokio::spawn(async move {
            let outcome = tracker.run_engine(&job).await;
            tracker.finish(&job.analysis_id, outcome).await;
        });

        Ok(SubmitOutcome::Accepted)
    }

    pub async fn query(&self, analysis_id: &str) -> Result<AnalysisSnapshot, AnalysisError> {
        self.store
            .get(analysis_id)
            .await
            .map(|record| record.snapshot())
            .ok_or_else(|| AnalysisError::RecordNotFound(analysis_id.to_string()))
    }

    /// Runs the engine on its own task so a panic or hang is contained, and
    /// bounds it by the configured timeout.
    async fn run_engine(&self, job: &AnalysisJob) -> Result<AnalysisResults, AnalysisError> {
        let engine = self.engine.clone();
        let engine_job = job.clone();
        let handle = tokio::spawn(async move { engine.analyze(&engine_job).await });
        let abort = handle.abort_handle();

        let results = match time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_err)) => {
                return Err(AnalysisError::AnalysisEngineFailure(format!(
                    "engine task ended abnormally: {join_err}"
                )))
            }
            Err(_) => {
                abort.abort();
                return Err(AnalysisError::AnalysisTimeout(self.timeout));
            }
        };

        results
            .validate()
            .map_err(AnalysisError::AnalysisEngineFailure)?;
        Ok(results)
    }

    async fn finish(&self, analysis_id: &str, outcome: Result<AnalysisResults, AnalysisError>) {
        let failure = match outcome {
            Ok(results) => {
                match self
                    .store
                    .update(analysis_id, |record| record.complete(results))
                    .await
                {
                    Ok(_) => {
                        info!(analysis_id = %analysis_id, "Analysis completed");
                        return;
                    }
                    Err(AnalysisError::RecordNotFound(_)) => {
                        error!(
                            analysis_id = %analysis_id,
                            "Analysis record vanished before completion; dropping result"
                        );
                        return;
                    }
                    Err(err) => err,
                }
            }
            Err(err) => err,
        };

        warn!(analysis_id = %analysis_id, "Analysis failed: {failure:#}");
        self.mark_failed(analysis_id).await;
    }

    /// Forces `failed`, stepping a `pending` record through `processing` first
    /// so the status edges stay intact.
    async fn mark_failed(&self, analysis_id: &str) {
        match self
            .store
            .update_volatile(analysis_id, |record| {
                if record.status == AnalysisStatus::Pending {
                    record.begin_processing()?;
                }
                record.fail()
            })
            .await
        {
            Ok(_) => {}
            Err(AnalysisError::PersistenceFailure(err)) => {
                error!(
                    analysis_id = %analysis_id,
                    "Failed status held in memory only: {err:#}"
                );
            }
            Err(err) => {
                error!(analysis_id = %analysis_id, "Could not mark analysis failed: {err:#}");
            }
        }
    }

    /// Startup recovery for records written by a previous process. Anything
    /// still `processing` lost its deferred task and is failed; anything still
    /// `pending` is returned so it can be submitted again.
    pub async fn recover_interrupted(&self) -> Vec<String> {
        for analysis_id in self.store.ids_with_status(AnalysisStatus::Processing).await {
            warn!(analysis_id = %analysis_id, "Analysis interrupted by restart");
            self.mark_failed(&analysis_id).await;
        }
        self.store.ids_with_status(AnalysisStatus::Pending).await
    }
}

/// Drains the submission queue. Pending records recovered at startup are
/// submitted first.
pub fn spawn_submission_worker(
    tracker: LifecycleTracker,
    recovered: Vec<String>,
    mut submissions: mpsc::Receiver<Submission>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        for analysis_id in recovered {
            let Some(record) = tracker.store.get(&analysis_id).await else {
                continue;
            };
            info!(analysis_id = %analysis_id, "Resubmitting recovered analysis");
            submit_queued(&tracker, &analysis_id, record.artifact_location).await;
        }

        while let Some(submission) = submissions.recv().await {
            submit_queued(&tracker, &submission.analysis_id, submission.artifact_location).await;
        }

        info!("Submission queue closed; worker exiting");
    })
}

/// Nobody waits on a queued submission, so a `processing` write that cannot be
/// made durable fails the record instead of leaving it `pending`.
async fn submit_queued(tracker: &LifecycleTracker, analysis_id: &str, location: PathBuf) {
    match tracker.submit(analysis_id, location).await {
        Ok(_) => {}
        Err(AnalysisError::PersistenceFailure(err)) => {
            error!(analysis_id = %analysis_id, "Could not start analysis: {err:#}");
            tracker.mark_failed(analysis_id).await;
        }
        Err(err) => {
            error!(analysis_id = %analysis_id, "Submission rejected: {err:#}");
        }
    }
}
