//! The persisted ingestion run record.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::summary::RunSummary;
use crate::errors::EscoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
    Stale,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::NotStarted => "NOT_STARTED",
            RunStatus::InProgress => "IN_PROGRESS",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Stale => "STALE",
        }
    }

    /// COMPLETED and FAILED records are never changed again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = EscoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_STARTED" => Ok(RunStatus::NotStarted),
            "IN_PROGRESS" => Ok(RunStatus::InProgress),
            "COMPLETED" => Ok(RunStatus::Completed),
            "FAILED" => Ok(RunStatus::Failed),
            "STALE" => Ok(RunStatus::Stale),
            other => Err(EscoError::State(format!("unknown run status {other:?}"))),
        }
    }
}

/// One attempt at building the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionRun {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Stage names (`entity:Skill`, `relation:SkillSkill`, …) already committed.
    pub completed_stages: BTreeSet<String>,
    pub error_summary: Option<String>,
    /// Run whose checkpoints this one inherited.
    pub resumed_from: Option<Uuid>,
    pub summary: Option<RunSummary>,
}

impl IngestionRun {
    /// A fresh IN_PROGRESS run starting now.
    pub fn start(now: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: RunStatus::InProgress,
            started_at: now,
            last_heartbeat_at: now,
            finished_at: None,
            completed_stages: BTreeSet::new(),
            error_summary: None,
            resumed_from: None,
            summary: None,
        }
    }

    /// Time since the last heartbeat, zero if the clock went backwards.
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_heartbeat_at).to_std().unwrap_or_default()
    }

    /// IN_PROGRESS with a heartbeat older than `threshold`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.status == RunStatus::InProgress && self.heartbeat_age(now) > threshold
    }

    pub fn is_stage_complete(&self, stage: &str) -> bool {
        self.completed_stages.contains(stage)
    }
}
