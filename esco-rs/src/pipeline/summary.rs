//! Per-stage and per-run counters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::nodes::RowSkip;

/// Counters for one stage (one entity kind or one relationship file).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSummary {
    pub rows_read: u64,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    /// Skip counts keyed by [`crate::nodes::SkipReason::key`].
    pub skip_reasons: BTreeMap<String, u64>,
    /// Records in a batch whose write was given up on.
    pub failed: u64,
    pub embedding_errors: u64,
    pub cache_hits: u64,
    /// Relationships dropped because an endpoint was not in the store.
    pub integrity_warnings: u64,
    pub batches: u64,
    pub elapsed_ms: u64,
}

impl StageSummary {
    pub fn record_skip(&mut self, skip: &RowSkip) {
        self.skipped += 1;
        *self.skip_reasons.entry(skip.reason.key()).or_default() += 1;
    }

    /// Rows that produced an entity or relationship.
    pub fn accepted(&self) -> u64 {
        self.rows_read.saturating_sub(self.skipped)
    }

    fn absorb(&mut self, other: &StageSummary) {
        self.rows_read += other.rows_read;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        for (reason, n) in &other.skip_reasons {
            *self.skip_reasons.entry(reason.clone()).or_default() += n;
        }
        self.failed += other.failed;
        self.embedding_errors += other.embedding_errors;
        self.cache_hits += other.cache_hits;
        self.integrity_warnings += other.integrity_warnings;
        self.batches += other.batches;
        self.elapsed_ms += other.elapsed_ms;
    }
}

/// Everything a run did, keyed by stage name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub stages: BTreeMap<String, StageSummary>,
}

impl RunSummary {
    pub fn stage(&self, name: &str) -> Option<&StageSummary> {
        self.stages.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, stage: StageSummary) {
        self.stages.insert(name.into(), stage);
    }

    pub fn totals(&self) -> StageSummary {
        let mut totals = StageSummary::default();
        for stage in self.stages.values() {
            totals.absorb(stage);
        }
        totals
    }

    /// Dangling relationships across all relation stages.
    pub fn integrity_warnings(&self) -> u64 {
        self.stages.values().map(|s| s.integrity_warnings).sum()
    }

    /// Emit one structured line per stage and one for the totals.
    pub fn log(&self, run_id: &str) {
        for (name, s) in &self.stages {
            info!(
                run_id,
                stage = %name,
                rows_read = s.rows_read,
                inserted = s.inserted,
                updated = s.updated,
                skipped = s.skipped,
                skip_reasons = ?s.skip_reasons,
                failed = s.failed,
                embedding_errors = s.embedding_errors,
                cache_hits = s.cache_hits,
                integrity_warnings = s.integrity_warnings,
                elapsed_ms = s.elapsed_ms,
                "stage summary"
            );
        }
        let t = self.totals();
        info!(
            run_id,
            stages = self.stages.len(),
            rows_read = t.rows_read,
            inserted = t.inserted,
            updated = t.updated,
            skipped = t.skipped,
            failed = t.failed,
            embedding_errors = t.embedding_errors,
            integrity_warnings = t.integrity_warnings,
            "run summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::SkipReason;

    #[test]
    fn skips_are_counted_by_reason() {
        let mut s = StageSummary {
            rows_read: 3,
            ..Default::default()
        };
        s.record_skip(&RowSkip::new(1, SkipReason::MissingIdentifier));
        s.record_skip(&RowSkip::new(2, SkipReason::MissingIdentifier));
        assert_eq!(s.skipped, 2);
        assert_eq!(s.skip_reasons["missing_identifier"], 2);
        assert_eq!(s.accepted(), 1);
    }

    #[test]
    fn totals_sum_every_stage() {
        let mut summary = RunSummary::default();
        let mut a = StageSummary {
            rows_read: 10,
            inserted: 8,
            ..Default::default()
        };
        a.record_skip(&RowSkip::new(1, SkipReason::MissingLabel));
        let b = StageSummary {
            rows_read: 5,
            updated: 4,
            integrity_warnings: 1,
            ..Default::default()
        };
        summary.insert("entity:Skill", a);
        summary.insert("relation:SkillSkill", b);

        let t = summary.totals();
        assert_eq!(t.rows_read, 15);
        assert_eq!(t.inserted, 8);
        assert_eq!(t.updated, 4);
        assert_eq!(t.skip_reasons["missing_label"], 1);
        assert_eq!(summary.integrity_warnings(), 1);
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let mut summary = RunSummary::default();
        summary.insert("entity:Skill", StageSummary::default());
        let json = serde_json::to_value(&summary).unwrap();
        assert!(json["stages"]["entity:Skill"].get("rowsRead").is_some());
        let back: RunSummary = serde_json::from_value(json).unwrap();
        assert_eq!(back, summary);
    }
}
