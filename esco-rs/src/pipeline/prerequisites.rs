//! Checks that must pass before a run is created.

use std::path::Path;

use tracing::{info, warn};

use super::stages::Stage;
use crate::driver::GraphStore;
use crate::errors::EscoError;
use crate::source::RowSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrerequisiteCheck {
    pub name: String,
    pub passed: bool,
    pub detail: Option<String>,
}

impl PrerequisiteCheck {
    fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            detail: None,
        }
    }

    fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrerequisiteReport {
    pub checks: Vec<PrerequisiteCheck>,
}

impl PrerequisiteReport {
    /// Report for a store that could not even be asked about run state.
    pub fn unreachable(err: &EscoError) -> Self {
        Self {
            checks: vec![PrerequisiteCheck::fail("store reachable", err.to_string())],
        }
    }

    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &PrerequisiteCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }

    pub fn log(&self) {
        for check in &self.checks {
            if check.passed {
                info!(check = %check.name, "prerequisite passed");
            } else {
                warn!(
                    check = %check.name,
                    detail = check.detail.as_deref().unwrap_or(""),
                    "prerequisite failed"
                );
            }
        }
    }
}

/// Run every check; later checks still run after an earlier failure so the
/// report is complete, except that schema checks need a reachable store.
pub async fn check<S: GraphStore>(
    store: &S,
    data_dir: &Path,
    embedding_dim: usize,
    stages: &[Stage],
) -> PrerequisiteReport {
    let mut checks = Vec::new();

    let reachable = match store.ping().await {
        Ok(()) => {
            checks.push(PrerequisiteCheck::pass("store reachable"));
            true
        }
        Err(err) => {
            checks.push(PrerequisiteCheck::fail("store reachable", err.to_string()));
            false
        }
    };

    if reachable {
        let schema = match store.ensure_schema(embedding_dim).await {
            Ok(()) => match store.schema_ready().await {
                Ok(true) => PrerequisiteCheck::pass("schema present"),
                Ok(false) => PrerequisiteCheck::fail(
                    "schema present",
                    "constraints or vector indexes are not online",
                ),
                Err(err) => PrerequisiteCheck::fail("schema present", err.to_string()),
            },
            Err(err) => PrerequisiteCheck::fail("schema present", err.to_string()),
        };
        checks.push(schema);
    }

    if !data_dir.is_dir() {
        checks.push(PrerequisiteCheck::fail(
            "data directory",
            format!("{} is not a directory", data_dir.display()),
        ));
        return PrerequisiteReport { checks };
    }
    checks.push(PrerequisiteCheck::pass("data directory"));

    for stage in stages {
        let name = format!("file {}", stage.file_name());
        let path = data_dir.join(stage.file_name());
        checks.push(match RowSource::open(&path, &stage.contract()) {
            Ok(_) => PrerequisiteCheck::pass(name),
            Err(err) => PrerequisiteCheck::fail(name, err.to_string()),
        });
    }

    PrerequisiteReport { checks }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::MemoryStore;
    use crate::nodes::EntityKind;
    use std::fs;

    #[tokio::test]
    async fn missing_directory_fails() {
        let store = MemoryStore::new();
        let report = check(
            &store,
            Path::new("/definitely/not/here"),
            8,
            &[Stage::Entity(EntityKind::Skill)],
        )
        .await;
        assert!(!report.passed());
        let failed: Vec<_> = report.failures().map(|c| c.name.as_str()).collect();
        assert_eq!(failed, vec!["data directory"]);
    }

    #[tokio::test]
    async fn missing_file_and_bad_header_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(EntityKind::Skill.file_name()),
            "conceptUri,description\n",
        )
        .unwrap();
        let store = MemoryStore::new();
        let report = check(
            &store,
            dir.path(),
            8,
            &[
                Stage::Entity(EntityKind::Skill),
                Stage::Entity(EntityKind::Occupation),
            ],
        )
        .await;
        assert_eq!(report.failures().count(), 2);
        let skill = report
            .checks
            .iter()
            .find(|c| c.name.contains(EntityKind::Skill.file_name()))
            .unwrap();
        assert!(skill.detail.as_deref().unwrap().contains("preferredLabel"));
    }

    #[tokio::test]
    async fn valid_inputs_pass_and_create_schema() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(EntityKind::Skill.file_name()),
            "conceptUri,preferredLabel\n",
        )
        .unwrap();
        let store = MemoryStore::new();
        let report = check(&store, dir.path(), 8, &[Stage::Entity(EntityKind::Skill)]).await;
        assert!(report.passed(), "{report:?}");
        assert!(store.schema_ready().await.unwrap());
    }
}
