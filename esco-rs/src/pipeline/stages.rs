//! One stage = one file ingested as one entity or relation kind.
//!
//! Entity stages overlap embedding with writing: a producer turns rows into
//! deduplicated batches and embeds up to `embedding_workers` of them at once,
//! ordered by `buffered`, into a bounded channel; the consumer writes them in
//! file order. Both halves are polled by the same task through `join!`.
//! Relation stages need no embedding and write sequentially.

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::path::Path;
use std::time::Instant;

use futures::{stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::state::StateManager;
use super::summary::StageSummary;
use super::writer::{dedupe_last_wins, BatchWriter};
use crate::driver::{GraphStore, RunStateStore};
use crate::edges::{EdgeType, RelationKind, Relationship};
use crate::embedder::{EmbeddedBatch, EmbedderClient, EmbeddingStage};
use crate::errors::{EscoError, Result};
use crate::nodes::{Entity, EntityKind, RowSkip};
use crate::source::{ColumnContract, Row, RowSource};
use crate::types::IngestionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Entity(EntityKind),
    Relation(RelationKind),
}

impl Stage {
    /// Every stage in declaration order, entity kinds first.
    pub fn all(include_relations: bool) -> Vec<Stage> {
        let mut stages: Vec<Stage> = EntityKind::ALL.into_iter().map(Stage::Entity).collect();
        if include_relations {
            stages.extend(RelationKind::ALL.into_iter().map(Stage::Relation));
        }
        stages
    }

    /// Checkpoint name.
    pub fn name(&self) -> String {
        match self {
            Stage::Entity(kind) => kind.stage_name(),
            Stage::Relation(kind) => kind.stage_name(),
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Stage::Entity(kind) => kind.file_name(),
            Stage::Relation(kind) => kind.file_name(),
        }
    }

    pub fn contract(&self) -> ColumnContract {
        match self {
            Stage::Entity(kind) => kind.contract(),
            Stage::Relation(kind) => kind.contract(),
        }
    }

    /// Checkpoint names that must exist before this stage may start.
    pub fn dependencies(&self) -> Vec<String> {
        match self {
            Stage::Entity(_) => Vec::new(),
            Stage::Relation(kind) => kind.depends_on().iter().map(EntityKind::stage_name).collect(),
        }
    }

    pub fn is_ready<'a>(&self, completed: impl IntoIterator<Item = &'a String> + Clone) -> bool {
        self.dependencies()
            .iter()
            .all(|dep| completed.clone().into_iter().any(|done| done == dep))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Records that collapse to their last occurrence within a batch.
trait Keyed {
    type Key: Eq + Hash;
    fn dedupe_key(&self) -> Self::Key;
}

impl Keyed for Entity {
    type Key = String;
    fn dedupe_key(&self) -> String {
        self.uri.clone()
    }
}

impl Keyed for Relationship {
    type Key = (EntityKind, String, EdgeType, EntityKind, String);
    fn dedupe_key(&self) -> Self::Key {
        (
            self.source_kind,
            self.source_uri.clone(),
            self.edge_type,
            self.target_kind,
            self.target_uri.clone(),
        )
    }
}

/// Groups built records into deduplicated batches, counting rows and skips.
///
/// A read error ends the iteration and is kept for the caller.
struct Batches<T, F> {
    source: RowSource,
    size: usize,
    build: F,
    counts: StageSummary,
    error: Option<EscoError>,
    _item: PhantomData<fn() -> T>,
}

impl<T, F> Batches<T, F>
where
    T: Keyed,
    F: FnMut(&Row) -> std::result::Result<T, RowSkip>,
{
    fn new(source: RowSource, size: usize, build: F) -> Self {
        Self {
            source,
            size: size.max(1),
            build,
            counts: StageSummary::default(),
            error: None,
            _item: PhantomData,
        }
    }
}

impl<T, F> Iterator for Batches<T, F>
where
    T: Keyed,
    F: FnMut(&Row) -> std::result::Result<T, RowSkip>,
{
    type Item = Vec<T>;

    fn next(&mut self) -> Option<Vec<T>> {
        if self.error.is_some() {
            return None;
        }
        let mut batch = Vec::with_capacity(self.size);
        while batch.len() < self.size {
            match self.source.next() {
                None => break,
                Some(Err(err)) => {
                    self.error = Some(err);
                    return None;
                }
                Some(Ok(row)) => {
                    self.counts.rows_read += 1;
                    match (self.build)(&row) {
                        Ok(record) => batch.push(record),
                        Err(skip) => {
                            debug!(file = %self.source.path().display(), line = skip.line, reason = ?skip.reason, "row skipped");
                            self.counts.record_skip(&skip);
                        }
                    }
                }
            }
        }
        if batch.is_empty() {
            None
        } else {
            Some(dedupe_last_wins(batch, T::dedupe_key))
        }
    }
}

/// Everything a stage needs, borrowed from the orchestrator.
pub struct StageRunner<'a, S, E> {
    pub data_dir: &'a Path,
    pub config: &'a IngestionConfig,
    pub writer: &'a BatchWriter<S>,
    pub embedder: &'a EmbeddingStage<E>,
    pub state: &'a StateManager<S>,
}

impl<S, E> StageRunner<'_, S, E>
where
    S: GraphStore + RunStateStore,
    E: EmbedderClient,
{
    /// Run `stage` to the end of its file. The summary is returned even when
    /// the stage fails, covering what was done before the failure.
    pub async fn run(&self, stage: Stage) -> (Stage, StageSummary, Result<()>) {
        let started = Instant::now();
        info!(stage = %stage, file = stage.file_name(), "stage started");

        let (mut summary, result) = match stage {
            Stage::Entity(kind) => self.run_entities(kind).await,
            Stage::Relation(kind) => self.run_relations(kind).await,
        };
        summary.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match &result {
            Ok(()) => info!(
                stage = %stage,
                rows_read = summary.rows_read,
                inserted = summary.inserted,
                updated = summary.updated,
                skipped = summary.skipped,
                embedding_errors = summary.embedding_errors,
                integrity_warnings = summary.integrity_warnings,
                elapsed_ms = summary.elapsed_ms,
                "stage finished"
            ),
            Err(err) => error!(stage = %stage, error = %err, "stage failed"),
        }
        (stage, summary, result)
    }

    fn open(&self, stage: Stage) -> Result<RowSource> {
        RowSource::open(self.data_dir.join(stage.file_name()), &stage.contract())
    }

    async fn run_entities(&self, kind: EntityKind) -> (StageSummary, Result<()>) {
        let source = match self.open(Stage::Entity(kind)) {
            Ok(source) => source,
            Err(err) => return (StageSummary::default(), Err(err)),
        };
        let mut batches = Batches::new(source, self.config.batch_size, |row: &Row| kind.transform(row));
        let workers = self.config.embedding_workers.max(1);
        let (tx, mut rx) = mpsc::channel::<(Vec<Entity>, EmbeddedBatch)>(workers);

        let embedder = self.embedder;
        let rows = &mut batches;
        let producer = async move {
            let mut embedded = stream::iter(rows)
                .map(|batch| async move {
                    let vectors = embedder.embed(&batch).await;
                    (batch, vectors)
                })
                .buffered(workers);
            while let Some(item) = embedded.next().await {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        };

        let consumer = async move {
            let mut written = StageSummary::default();
            while let Some((entities, embedded)) = rx.recv().await {
                written.embedding_errors += embedded.failures;
                written.cache_hits += embedded.cache_hits;
                let result = self
                    .writer
                    .write_entities(kind, &entities, &embedded.vectors)
                    .await;
                match result {
                    Ok(w) => {
                        written.inserted += w.inserted;
                        written.updated += w.updated;
                        written.batches += 1;
                    }
                    Err(err) => {
                        written.failed += entities.len() as u64;
                        return (written, Err(err));
                    }
                }
                if let Err(err) = self.state.heartbeat().await {
                    return (written, Err(err));
                }
            }
            (written, Ok(()))
        };

        let ((), (written, result)) = tokio::join!(producer, consumer);
        let summary = merge(batches.counts, written);
        match (result, batches.error) {
            (Err(err), _) | (Ok(()), Some(err)) => (summary, Err(err)),
            (Ok(()), None) => (summary, Ok(())),
        }
    }

    async fn run_relations(&self, kind: RelationKind) -> (StageSummary, Result<()>) {
        let source = match self.open(Stage::Relation(kind)) {
            Ok(source) => source,
            Err(err) => return (StageSummary::default(), Err(err)),
        };
        let mut batches = Batches::new(source, self.config.batch_size, |row: &Row| kind.transform(row));
        let mut written = StageSummary::default();
        let mut failure = None;

        for rels in batches.by_ref() {
            match self.writer.write_relationships(kind, &rels).await {
                Ok(w) => {
                    written.inserted += w.inserted;
                    written.updated += w.updated;
                    written.integrity_warnings += w.missing_endpoints;
                    written.batches += 1;
                }
                Err(err) => {
                    written.failed += rels.len() as u64;
                    failure = Some(err);
                    break;
                }
            }
            if let Err(err) = self.state.heartbeat().await {
                failure = Some(err);
                break;
            }
        }

        if written.integrity_warnings > 0 {
            warn!(
                stage = %kind.stage_name(),
                dangling = written.integrity_warnings,
                "relationships skipped because an endpoint is not in the store"
            );
        }
        let summary = merge(batches.counts, written);
        match failure.or(batches.error) {
            Some(err) => (summary, Err(err)),
            None => (summary, Ok(())),
        }
    }
}

/// Reader-side counts plus writer-side counts.
fn merge(read: StageSummary, written: StageSummary) -> StageSummary {
    StageSummary {
        inserted: written.inserted,
        updated: written.updated,
        failed: written.failed,
        embedding_errors: written.embedding_errors,
        cache_hits: written.cache_hits,
        integrity_warnings: written.integrity_warnings,
        batches: written.batches,
        ..read
    }
}
