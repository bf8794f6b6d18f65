//! Top-level run: observe, prerequisites, lease, scheduled stages, verify.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::prerequisites::{self, PrerequisiteReport};
use super::run::IngestionRun;
use super::stages::{Stage, StageRunner};
use super::state::{LeaseOutcome, Observation, StateManager};
use super::summary::RunSummary;
use super::writer::BatchWriter;
use crate::driver::{GraphStore, RunStateStore};
use crate::embedder::{EmbedderClient, EmbeddingStage};
use crate::edges::RelationKind;
use crate::errors::{EscoError, Result};
use crate::nodes::EntityKind;
use crate::types::{EscoConfig, IngestionConfig};

/// How a call to [`Orchestrator::run`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestionOutcome {
    Completed {
        run_id: Uuid,
        summary: RunSummary,
    },
    AlreadyCompleted {
        run_id: Uuid,
    },
    ActiveElsewhere {
        run_id: Uuid,
        last_heartbeat_at: DateTime<Utc>,
    },
    PrerequisitesFailed(PrerequisiteReport),
    Failed {
        run_id: Option<Uuid>,
        error: String,
        summary: RunSummary,
    },
    TimedOut {
        run_id: Option<Uuid>,
    },
}

impl IngestionOutcome {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            IngestionOutcome::Completed { .. } | IngestionOutcome::AlreadyCompleted { .. } => 0,
            IngestionOutcome::ActiveElsewhere { .. } => 1,
            IngestionOutcome::PrerequisitesFailed(_) => 2,
            IngestionOutcome::Failed { .. } => 3,
            IngestionOutcome::TimedOut { .. } => 4,
        }
    }

    fn active(run: &IngestionRun) -> Self {
        IngestionOutcome::ActiveElsewhere {
            run_id: run.run_id,
            last_heartbeat_at: run.last_heartbeat_at,
        }
    }
}

pub struct Orchestrator<S, E> {
    store: Arc<S>,
    config: IngestionConfig,
    data_dir: PathBuf,
    embedding_dim: usize,
    writer: BatchWriter<S>,
    embedder: EmbeddingStage<E>,
    state: StateManager<S>,
    /// Summaries of the stages finished so far in this run.
    partial: Mutex<RunSummary>,
}

impl<S, E> Orchestrator<S, E>
where
    S: GraphStore + RunStateStore,
    E: EmbedderClient,
{
    pub fn new(store: Arc<S>, embedder: Arc<E>, config: &EscoConfig) -> Self {
        let ingestion = config.ingestion.clone();
        Self {
            writer: BatchWriter::new(Arc::clone(&store), &ingestion),
            embedder: EmbeddingStage::new(embedder, &config.embedding_model, &ingestion),
            state: StateManager::new(Arc::clone(&store), &ingestion),
            store,
            data_dir: config.data_dir.clone(),
            embedding_dim: config.embedding_dim,
            config: ingestion,
            partial: Mutex::new(RunSummary::default()),
        }
    }

    /// Run ingestion to a terminal outcome, bounded by the time budget when
    /// one is configured.
    pub async fn run(&self) -> IngestionOutcome {
        *self.partial.lock().await = RunSummary::default();
        let Some(budget) = self.config.time_budget() else {
            return self.run_unbounded().await;
        };
        match tokio::time::timeout(budget, self.run_unbounded()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(budget_secs = budget.as_secs(), "time budget exceeded");
                let summary = self.partial.lock().await.clone();
                let run = self.state.current_run().await;
                if run.as_ref().is_some_and(|r| !r.status.is_terminal()) {
                    if let Err(err) = self.state.fail("time budget exceeded", summary).await {
                        warn!(error = %err, "could not mark timed-out run as failed");
                    }
                }
                IngestionOutcome::TimedOut {
                    run_id: run.map(|r| r.run_id),
                }
            }
        }
    }

    async fn run_unbounded(&self) -> IngestionOutcome {
        let force = self.config.force_reingest;

        loop {
            match self.state.observe().await {
                Err(err) => {
                    error!(error = %err, "cannot read ingestion state");
                    return IngestionOutcome::PrerequisitesFailed(PrerequisiteReport::unreachable(&err));
                }
                Ok(Observation::Completed(run)) if !force => {
                    info!(run_id = %run.run_id, "taxonomy already ingested");
                    return IngestionOutcome::AlreadyCompleted { run_id: run.run_id };
                }
                Ok(Observation::Active(run)) if self.config.wait_for_active_run => {
                    info!(
                        run_id = %run.run_id,
                        poll_secs = self.config.poll_interval_secs,
                        "another run is active; waiting"
                    );
                    tokio::time::sleep(self.config.poll_interval()).await;
                }
                Ok(Observation::Active(run)) => {
                    warn!(run_id = %run.run_id, last_heartbeat_at = %run.last_heartbeat_at, "another run is active");
                    return IngestionOutcome::active(&run);
                }
                Ok(_) => break,
            }
        }

        let stages = Stage::all(!self.config.skip_relations);
        let report =
            prerequisites::check(&*self.store, &self.data_dir, self.embedding_dim, &stages).await;
        report.log();
        if !report.passed() {
            return IngestionOutcome::PrerequisitesFailed(report);
        }

        let run = match self.state.acquire(force).await {
            Ok(LeaseOutcome::Acquired { run, .. }) => run,
            Ok(LeaseOutcome::ActiveElsewhere(run)) => return IngestionOutcome::active(&run),
            Ok(LeaseOutcome::AlreadyCompleted(run)) => {
                return IngestionOutcome::AlreadyCompleted { run_id: run.run_id }
            }
            Err(err) => {
                error!(error = %err, "could not acquire ingestion lease");
                return IngestionOutcome::Failed {
                    run_id: None,
                    error: err.to_string(),
                    summary: RunSummary::default(),
                };
            }
        };
        let run_id = run.run_id;

        let result = match self.execute(&run, stages).await {
            Ok(summary) => self.state.complete(summary).await.map(|_| ()),
            Err(err) => Err(err),
        };
        let summary = self.partial.lock().await.clone();
        summary.log(&run_id.to_string());

        match result {
            Ok(()) => {
                info!(run_id = %run_id, "ingestion completed");
                IngestionOutcome::Completed { run_id, summary }
            }
            Err(err) => {
                error!(run_id = %run_id, error = %err, "ingestion failed");
                if let Err(state_err) = self.state.fail(err.to_string(), summary.clone()).await {
                    warn!(error = %state_err, "could not mark run as failed");
                }
                IngestionOutcome::Failed {
                    run_id: Some(run_id),
                    error: err.to_string(),
                    summary,
                }
            }
        }
    }

    /// Schedule every pending stage, then apply the integrity threshold and
    /// verify stored counts.
    async fn execute(&self, run: &IngestionRun, stages: Vec<Stage>) -> Result<RunSummary> {
        let mut completed: BTreeSet<String> = run.completed_stages.clone();
        let (done, mut pending): (Vec<Stage>, Vec<Stage>) = stages
            .into_iter()
            .partition(|stage| completed.contains(&stage.name()));
        for stage in &done {
            info!(stage = %stage, "stage already checkpointed; skipping");
        }

        let runner = StageRunner {
            data_dir: &self.data_dir,
            config: &self.config,
            writer: &self.writer,
            embedder: &self.embedder,
            state: &self.state,
        };
        let max_in_flight = self.config.max_concurrent_stages.max(1);
        let mut in_flight = FuturesUnordered::new();
        let mut first_error: Option<EscoError> = None;

        loop {
            while first_error.is_none() && in_flight.len() < max_in_flight {
                let Some(pos) = pending.iter().position(|s| s.is_ready(&completed)) else {
                    break;
                };
                in_flight.push(runner.run(pending.remove(pos)));
            }
            let Some((stage, summary, result)) = in_flight.next().await else {
                break;
            };
            self.partial.lock().await.insert(stage.name(), summary);
            let result = match result {
                Ok(()) => self.state.checkpoint(&stage.name()).await,
                Err(err) => Err(err),
            };
            match result {
                Ok(()) => {
                    completed.insert(stage.name());
                }
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if !pending.is_empty() {
            let names: Vec<String> = pending.iter().map(Stage::name).collect();
            return Err(EscoError::State(format!(
                "stages never became eligible: {}",
                names.join(", ")
            )));
        }

        // Failing these checks revokes the affected checkpoints so a resumed
        // run redoes those stages.
        let summary = self.partial.lock().await.clone();
        if let Some(max) = self.config.max_dangling_relationships {
            let dangling = summary.integrity_warnings();
            if dangling > max {
                let relations: Vec<String> =
                    RelationKind::ALL.iter().map(RelationKind::stage_name).collect();
                self.state.revoke(&relations).await?;
                return Err(EscoError::IntegrityThreshold { dangling, max });
            }
        }
        self.verify(&summary).await?;
        Ok(summary)
    }

    /// Every entity kind that accepted rows in this run must have stored
    /// nodes. On failure the kind's stage and the relation stages that
    /// depend on it are revoked.
    async fn verify(&self, summary: &RunSummary) -> Result<()> {
        for kind in EntityKind::ALL {
            let accepted = summary
                .stage(&kind.stage_name())
                .map(|s| s.accepted())
                .unwrap_or(0);
            if accepted == 0 {
                continue;
            }
            let stored = self.store.count_entities(kind).await?;
            if stored == 0 {
                let mut revoked = vec![kind.stage_name()];
                revoked.extend(
                    RelationKind::ALL
                        .iter()
                        .filter(|rel| rel.depends_on().contains(&kind))
                        .map(RelationKind::stage_name),
                );
                self.state.revoke(&revoked).await?;
                return Err(EscoError::Verification(format!(
                    "{accepted} {kind} rows accepted but none are stored"
                )));
            }
            info!(kind = %kind, stored, "verified stored count");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_outcome() {
        let id = Uuid::new_v4();
        assert_eq!(
            IngestionOutcome::Completed {
                run_id: id,
                summary: RunSummary::default()
            }
            .exit_code(),
            0
        );
        assert_eq!(IngestionOutcome::AlreadyCompleted { run_id: id }.exit_code(), 0);
        assert_eq!(
            IngestionOutcome::ActiveElsewhere {
                run_id: id,
                last_heartbeat_at: Utc::now()
            }
            .exit_code(),
            1
        );
        assert_eq!(
            IngestionOutcome::PrerequisitesFailed(PrerequisiteReport::default()).exit_code(),
            2
        );
        assert_eq!(
            IngestionOutcome::Failed {
                run_id: None,
                error: String::new(),
                summary: RunSummary::default()
            }
            .exit_code(),
            3
        );
        assert_eq!(IngestionOutcome::TimedOut { run_id: Some(id) }.exit_code(), 4);
    }
}
