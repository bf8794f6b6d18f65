//! Run-state arbitration: lease, heartbeat, checkpoints and staleness.
//!
//! The persisted [`IngestionRun`] is the lease. A process owns the build while
//! its run is IN_PROGRESS and heartbeating; an observer that finds the
//! heartbeat older than the staleness threshold treats the run as abandoned.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::run::{IngestionRun, RunStatus};
use super::summary::RunSummary;
use crate::driver::RunStateStore;
use crate::errors::{EscoError, Result};
use crate::types::IngestionConfig;
use crate::utils::text::truncate_with_ellipsis;

/// Longest error text kept on a run record.
const MAX_ERROR_SUMMARY_CHARS: usize = 2_000;

/// What the latest persisted run says about the build.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    NotStarted,
    Completed(IngestionRun),
    /// IN_PROGRESS with a fresh heartbeat.
    Active(IngestionRun),
    /// IN_PROGRESS with an expired heartbeat.
    Stale(IngestionRun),
    Failed(IngestionRun),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeaseOutcome {
    Acquired {
        run: IngestionRun,
        resumed_from: Option<Uuid>,
    },
    ActiveElsewhere(IngestionRun),
    AlreadyCompleted(IngestionRun),
}

/// Sole mutator of run records.
pub struct StateManager<S> {
    store: Arc<S>,
    staleness_threshold: Duration,
    resume_failed_runs: bool,
    current: Mutex<Option<IngestionRun>>,
}

impl<S: RunStateStore> StateManager<S> {
    pub fn new(store: Arc<S>, config: &IngestionConfig) -> Self {
        Self {
            store,
            staleness_threshold: config.staleness_threshold(),
            resume_failed_runs: config.resume_failed_runs,
            current: Mutex::new(None),
        }
    }

    pub async fn observe(&self) -> Result<Observation> {
        let Some(run) = self.store.latest_run().await? else {
            return Ok(Observation::NotStarted);
        };
        Ok(match run.status {
            RunStatus::NotStarted => Observation::NotStarted,
            RunStatus::Completed => Observation::Completed(run),
            RunStatus::Failed => Observation::Failed(run),
            RunStatus::Stale => Observation::Stale(run),
            RunStatus::InProgress if run.is_stale(Utc::now(), self.staleness_threshold) => {
                Observation::Stale(run)
            }
            RunStatus::InProgress => Observation::Active(run),
        })
    }

    /// Acquire the build lease, or report why not.
    ///
    /// A stale run is closed as FAILED first. The new run inherits the
    /// checkpoints of a stale run, and of a failed run when resuming failed
    /// runs is enabled. `force` starts from scratch, even after a completed
    /// run, but never takes over an active one.
    pub async fn acquire(&self, force: bool) -> Result<LeaseOutcome> {
        let now = Utc::now();
        let inherited = match self.observe().await? {
            Observation::NotStarted => None,
            Observation::Completed(run) if !force => {
                return Ok(LeaseOutcome::AlreadyCompleted(run))
            }
            Observation::Completed(_) => None,
            Observation::Active(run) => return Ok(LeaseOutcome::ActiveElsewhere(run)),
            Observation::Stale(mut run) => {
                let age = run.heartbeat_age(now);
                warn!(
                    run_id = %run.run_id,
                    heartbeat_age_secs = age.as_secs(),
                    threshold_secs = self.staleness_threshold.as_secs(),
                    "previous run is stale; marking it failed"
                );
                run.status = RunStatus::Failed;
                run.finished_at = Some(now);
                run.error_summary = Some(format!(
                    "heartbeat expired: last heartbeat {}s ago exceeds the {}s staleness threshold",
                    age.as_secs(),
                    self.staleness_threshold.as_secs()
                ));
                self.store.save_run(&run).await?;
                (!force).then_some(run)
            }
            Observation::Failed(run) => (!force && self.resume_failed_runs).then_some(run),
        };

        let mut run = IngestionRun::start(now);
        let resumed_from = inherited.map(|prev| {
            run.completed_stages = prev.completed_stages;
            prev.run_id
        });
        run.resumed_from = resumed_from;
        self.store.save_run(&run).await?;

        // Another process may have started between our read and write; the
        // most recently started run keeps the lease.
        if let Some(latest) = self.store.latest_run().await? {
            if latest.run_id != run.run_id && latest.status == RunStatus::InProgress {
                run.status = RunStatus::Failed;
                run.finished_at = Some(Utc::now());
                run.error_summary = Some(format!("lease lost to run {}", latest.run_id));
                self.store.save_run(&run).await?;
                return Ok(LeaseOutcome::ActiveElsewhere(latest));
            }
        }

        info!(
            run_id = %run.run_id,
            resumed_from = ?resumed_from,
            completed_stages = run.completed_stages.len(),
            "acquired ingestion lease"
        );
        *self.current.lock().await = Some(run.clone());
        Ok(LeaseOutcome::Acquired { run, resumed_from })
    }

    /// Snapshot of the run this process holds, if any.
    pub async fn current_run(&self) -> Option<IngestionRun> {
        self.current.lock().await.clone()
    }

    /// Refresh the lease.
    pub async fn heartbeat(&self) -> Result<()> {
        self.update(|_| Ok(())).await.map(|_| ())
    }

    /// Record `stage` as committed; also refreshes the heartbeat.
    pub async fn checkpoint(&self, stage: &str) -> Result<()> {
        let stage = stage.to_string();
        self.update(move |run| {
            run.completed_stages.insert(stage);
            Ok(())
        })
        .await
        .map(|_| ())
    }

    /// Drop checkpoints so a later run does not inherit them.
    pub async fn revoke(&self, stages: &[String]) -> Result<()> {
        self.update(|run| {
            for stage in stages {
                run.completed_stages.remove(stage);
            }
            Ok(())
        })
        .await
        .map(|_| ())
    }

    pub async fn complete(&self, summary: RunSummary) -> Result<IngestionRun> {
        self.finish(RunStatus::Completed, None, summary).await
    }

    pub async fn fail(&self, error: impl Into<String>, summary: RunSummary) -> Result<IngestionRun> {
        self.finish(RunStatus::Failed, Some(error.into()), summary)
            .await
    }

    async fn finish(
        &self,
        status: RunStatus,
        error: Option<String>,
        summary: RunSummary,
    ) -> Result<IngestionRun> {
        self.update(move |run| {
            run.status = status;
            run.finished_at = Some(Utc::now());
            run.error_summary = error.map(|e| truncate_with_ellipsis(&e, MAX_ERROR_SUMMARY_CHARS));
            run.summary = Some(summary);
            Ok(())
        })
        .await
    }

    /// Apply `f` to the held run, refresh its heartbeat and persist it.
    /// Terminal runs are never changed.
    ///
    /// The lease is re-checked first: if a later run has been recorded since
    /// we acquired, this run is closed as FAILED and nothing else is written.
    async fn update<F>(&self, f: F) -> Result<IngestionRun>
    where
        F: FnOnce(&mut IngestionRun) -> Result<()>,
    {
        let mut guard = self.current.lock().await;
        let run = guard
            .as_mut()
            .ok_or_else(|| EscoError::State("no run is held by this process".to_string()))?;
        if run.status.is_terminal() {
            return Err(EscoError::State(format!(
                "run {} is already {}",
                run.run_id, run.status
            )));
        }
        if let Some(latest) = self.store.latest_run().await? {
            if latest.run_id != run.run_id {
                warn!(run_id = %run.run_id, superseded_by = %latest.run_id, "ingestion lease lost");
                let mut lost = run.clone();
                lost.status = RunStatus::Failed;
                lost.finished_at = Some(Utc::now());
                lost.error_summary = Some(format!("lease lost to run {}", latest.run_id));
                self.store.save_run(&lost).await?;
                *run = lost;
                return Err(EscoError::State(format!(
                    "lease lost to run {}",
                    latest.run_id
                )));
            }
        }
        let mut next = run.clone();
        f(&mut next)?;
        next.last_heartbeat_at = Utc::now();
        self.store.save_run(&next).await?;
        *run = next.clone();
        Ok(next)
    }
}
