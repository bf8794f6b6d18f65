#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tempfile::TempDir;

use esco_rs::driver::memory::MemoryStore;
use esco_rs::driver::{GraphStore, RunStateStore, UpsertCounts};
use esco_rs::edges::{EdgeType, RelationKind, Relationship};
use esco_rs::embedder::{Embedding, EmbedderClient};
use esco_rs::nodes::{Entity, EntityKind};
use esco_rs::pipeline::IngestionRun;
use esco_rs::{EscoConfig, EscoError, IngestionConfig, IngestionOutcome, Orchestrator, Result};

pub const DIM: usize = 3;

// ---------------------------------------------------------------------------
// Snapshot fixtures
// ---------------------------------------------------------------------------

pub fn skill_uri(id: &str) -> String {
    format!("http://data.europa.eu/esco/skill/{id}")
}

pub fn occupation_uri(id: &str) -> String {
    format!("http://data.europa.eu/esco/occupation/{id}")
}

pub const SKILLS_HEADER: &str = "conceptUri,preferredLabel,altLabels,description,skillType,reuseLevel";
pub const OCC_SKILL_HEADER: &str = "occupationUri,relationType,skillUri";
pub const SKILL_SKILL_HEADER: &str = "originalSkillUri,relationType,relatedSkillUri";

/// Temporary ESCO snapshot directory.
pub struct Snapshot {
    pub dir: TempDir,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp snapshot dir"),
        }
    }

    /// A small but complete snapshot: 3 skills, 1 occupation, 1 skill
    /// group, 1 ISCO group, 1 collection and one or two rows per relation
    /// file, including one self-loop.
    pub fn minimal() -> Self {
        let snap = Self::empty();
        snap.write(
            EntityKind::Skill.file_name(),
            &format!(
                "{SKILLS_HEADER}\n\
                 {},manage musical staff,\"coordinate music staff\nlead musicians\",Assign and manage staff tasks.,skill/competence,sector-specific\n\
                 {},perform music,,Play instruments.,skill/competence,cross-sector\n\
                 {},music theory,,,knowledge,\n",
                skill_uri("S1"),
                skill_uri("S2"),
                skill_uri("S3"),
            ),
        );
        snap.write(
            EntityKind::Occupation.file_name(),
            &format!(
                "conceptUri,preferredLabel,altLabels,description,iscoGroup,code\n\
                 {},music director,conductor,Leads an orchestra.,2652,2652.1\n",
                occupation_uri("O1"),
            ),
        );
        snap.write(
            EntityKind::SkillGroup.file_name(),
            "conceptUri,preferredLabel,code\nhttp://data.europa.eu/esco/skill/G1,artistic skills,S1.1\n",
        );
        snap.write(
            EntityKind::IscoGroup.file_name(),
            "conceptUri,preferredLabel,code\nhttp://data.europa.eu/esco/isco/C2652,Musicians,2652\n",
        );
        snap.write(
            EntityKind::SkillCollection.file_name(),
            "conceptUri,preferredLabel,collectionType\nhttp://data.europa.eu/esco/concept-scheme/K1,digital skills,collection\n",
        );
        snap.write(
            RelationKind::OccupationSkill.file_name(),
            &format!(
                "{OCC_SKILL_HEADER}\n{o},essential,{s1}\n{o},optional,{s2}\n",
                o = occupation_uri("O1"),
                s1 = skill_uri("S1"),
                s2 = skill_uri("S2"),
            ),
        );
        snap.write(
            RelationKind::SkillSkill.file_name(),
            &format!(
                "{SKILL_SKILL_HEADER}\n{s1},optional,{s2}\n{s3},optional,{s3}\n",
                s1 = skill_uri("S1"),
                s2 = skill_uri("S2"),
                s3 = skill_uri("S3"),
            ),
        );
        snap.write(
            RelationKind::SkillHierarchy.file_name(),
            &format!(
                "conceptType,conceptUri,broaderType,broaderUri\n\
                 KnowledgeSkillCompetence,{},SkillGroup,http://data.europa.eu/esco/skill/G1\n",
                skill_uri("S1"),
            ),
        );
        snap.write(
            RelationKind::OccupationHierarchy.file_name(),
            &format!(
                "conceptType,conceptUri,broaderType,broaderUri\n\
                 Occupation,{},ISCOGroup,http://data.europa.eu/esco/isco/C2652\n",
                occupation_uri("O1"),
            ),
        );
        snap.write(
            RelationKind::SkillCollectionMembership.file_name(),
            &format!(
                "collectionUri,skillUri\nhttp://data.europa.eu/esco/concept-scheme/K1,{}\n",
                skill_uri("S1"),
            ),
        );
        snap
    }

    /// Write a file relative to the snapshot root.
    pub fn write(&self, file: &str, content: &str) -> &Self {
        std::fs::write(self.dir.path().join(file), content).expect("write fixture file");
        self
    }

    pub fn remove(&self, file: &str) -> &Self {
        std::fs::remove_file(self.dir.path().join(file)).expect("remove fixture file");
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Configuration pointing at this snapshot with test-speed timings.
    pub fn config(&self) -> EscoConfig {
        EscoConfig {
            neo4j_password: "unused".to_string(),
            embedding_dim: DIM,
            data_dir: self.path().to_path_buf(),
            ingestion: IngestionConfig {
                batch_size: 2,
                retry_initial_interval_ms: 1,
                retry_max_interval_ms: 5,
                write_timeout_secs: 5,
                poll_interval_secs: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Embedder
// ---------------------------------------------------------------------------

/// Returns `[len, 1, 0]` per text; any call including a text containing
/// "poison" fails.
#[derive(Default)]
pub struct FakeEmbedder {
    pub calls: AtomicUsize,
}

impl EmbedderClient for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.embed_batch(&[text]).await?.remove(0))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if texts.iter().any(|t| t.contains("poison")) {
            return Err(EscoError::Embedder("poisoned input".to_string()));
        }
        Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0, 0.0]).collect())
    }

    fn dim(&self) -> usize {
        DIM
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// [`MemoryStore`] with injectable faults and a write log.
#[derive(Default)]
pub struct TestStore {
    pub inner: MemoryStore,
    /// Entity writes that still fail with a transient error.
    transient_failures: AtomicU32,
    write_delay: Option<Duration>,
    unreachable: bool,
    /// Report zero stored entities for every kind.
    hide_counts: bool,
    pub entity_writes: Mutex<Vec<EntityKind>>,
    pub relation_writes: Mutex<Vec<RelationKind>>,
    /// Persisted heartbeat seen at each entity write, and whether that
    /// kind's stage was already checkpointed.
    pub write_heartbeats: Mutex<Vec<(EntityKind, DateTime<Utc>, bool)>>,
    /// Relation writes that happened before their dependencies were
    /// checkpointed.
    pub ordering_violations: Mutex<Vec<String>>,
}

impl TestStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(times: u32) -> Arc<Self> {
        Arc::new(Self {
            transient_failures: AtomicU32::new(times),
            ..Default::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            write_delay: Some(delay),
            ..Default::default()
        })
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            unreachable: true,
            ..Default::default()
        })
    }

    pub fn hiding_counts() -> Arc<Self> {
        Arc::new(Self {
            hide_counts: true,
            ..Default::default()
        })
    }

    pub fn runs(&self) -> Vec<IngestionRun> {
        self.inner.runs()
    }

    pub fn latest(&self) -> IngestionRun {
        self.runs().pop().expect("at least one run")
    }

    fn down(&self) -> Result<()> {
        if self.unreachable {
            Err(EscoError::Driver("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

impl GraphStore for TestStore {
    async fn ping(&self) -> Result<()> {
        self.down()
    }

    async fn ensure_schema(&self, embedding_dim: usize) -> Result<()> {
        self.down()?;
        self.inner.ensure_schema(embedding_dim).await
    }

    async fn schema_ready(&self) -> Result<bool> {
        self.down()?;
        self.inner.schema_ready().await
    }

    async fn upsert_entities(
        &self,
        kind: EntityKind,
        entities: &[Entity],
        vectors: &[Option<Embedding>],
    ) -> Result<UpsertCounts> {
        self.down()?;
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(EscoError::Driver("connection reset by peer".to_string()));
        }
        if let Some(run) = self.inner.latest_run().await? {
            self.write_heartbeats.lock().unwrap().push((
                kind,
                run.last_heartbeat_at,
                run.is_stage_complete(&kind.stage_name()),
            ));
        }
        self.entity_writes.lock().unwrap().push(kind);
        self.inner.upsert_entities(kind, entities, vectors).await
    }

    async fn upsert_relationships(
        &self,
        kind: RelationKind,
        relationships: &[Relationship],
    ) -> Result<UpsertCounts> {
        self.down()?;
        let completed = self
            .inner
            .latest_run()
            .await?
            .map(|run| run.completed_stages)
            .unwrap_or_default();
        for dep in kind.depends_on() {
            if !completed.contains(&dep.stage_name()) {
                self.ordering_violations
                    .lock()
                    .unwrap()
                    .push(format!("{kind} written before {}", dep.stage_name()));
            }
        }
        self.relation_writes.lock().unwrap().push(kind);
        self.inner.upsert_relationships(kind, relationships).await
    }

    async fn count_entities(&self, kind: EntityKind) -> Result<u64> {
        if self.hide_counts {
            return Ok(0);
        }
        self.inner.count_entities(kind).await
    }

    async fn count_relationships(&self, edge_type: EdgeType) -> Result<u64> {
        self.inner.count_relationships(edge_type).await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl RunStateStore for TestStore {
    async fn latest_run(&self) -> Result<Option<IngestionRun>> {
        self.down()?;
        self.inner.latest_run().await
    }

    async fn save_run(&self, run: &IngestionRun) -> Result<()> {
        self.down()?;
        self.inner.save_run(run).await
    }
}

// ---------------------------------------------------------------------------
// Running
// ---------------------------------------------------------------------------

pub async fn ingest(store: &Arc<TestStore>, config: &EscoConfig) -> IngestionOutcome {
    Orchestrator::new(Arc::clone(store), Arc::new(FakeEmbedder::default()), config)
        .run()
        .await
}

pub async fn edge_count(store: &TestStore, edge_type: EdgeType) -> u64 {
    store.count_relationships(edge_type).await.unwrap()
}

pub async fn entity_count(store: &TestStore, kind: EntityKind) -> u64 {
    store.inner.count_entities(kind).await.unwrap()
}
