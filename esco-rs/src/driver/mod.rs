//! Store abstraction.
//!
//! Defines the [`GraphStore`] trait (taxonomy nodes, edges, vectors and
//! schema) and the [`RunStateStore`] trait (ingestion run records), plus two
//! backends:
//! - [`neo4j::Neo4jDriver`]: Neo4j over Bolt via `neo4rs`
//! - [`memory::MemoryStore`]: in-process maps, for tests and dry runs

pub mod memory;
pub mod neo4j;

use crate::edges::{EdgeType, RelationKind, Relationship};
use crate::embedder::Embedding;
use crate::errors::Result;
use crate::nodes::{Entity, EntityKind};
use crate::pipeline::run::IngestionRun;

/// Outcome of one upsert call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub inserted: u64,
    pub updated: u64,
    /// Relationships not written because an endpoint was not found.
    pub missing_endpoints: u64,
}

impl std::ops::AddAssign for UpsertCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.updated += rhs.updated;
        self.missing_endpoints += rhs.missing_endpoints;
    }
}

/// Target store for the taxonomy graph.
///
/// Every write is an idempotent upsert keyed by `(kind, uri)` for entities
/// and `(source, type, target)` for relationships.
#[allow(async_fn_in_trait)]
pub trait GraphStore: Send + Sync {
    /// Health check: verify connectivity.
    async fn ping(&self) -> Result<()>;

    /// Create uniqueness constraints and vector indexes if absent.
    async fn ensure_schema(&self, embedding_dim: usize) -> Result<()>;

    /// Whether every constraint and index [`GraphStore::ensure_schema`]
    /// creates is present and usable.
    async fn schema_ready(&self) -> Result<bool>;

    /// Upsert `entities` of one kind. `vectors` is index-aligned; `None`
    /// clears any stored vector.
    async fn upsert_entities(
        &self,
        kind: EntityKind,
        entities: &[Entity],
        vectors: &[Option<Embedding>],
    ) -> Result<UpsertCounts>;

    /// Upsert relationships whose endpoints both exist; count the rest as
    /// missing.
    async fn upsert_relationships(
        &self,
        kind: RelationKind,
        relationships: &[Relationship],
    ) -> Result<UpsertCounts>;

    async fn count_entities(&self, kind: EntityKind) -> Result<u64>;

    async fn count_relationships(&self, edge_type: EdgeType) -> Result<u64>;

    /// Release connections.
    async fn close(&self) -> Result<()>;
}

/// Persistence for [`IngestionRun`] records.
#[allow(async_fn_in_trait)]
pub trait RunStateStore: Send + Sync {
    /// The most recently started run, if any.
    async fn latest_run(&self) -> Result<Option<IngestionRun>>;

    /// Insert or overwrite the record with `run.run_id`.
    async fn save_run(&self, run: &IngestionRun) -> Result<()>;
}

impl<T: GraphStore> GraphStore for std::sync::Arc<T> {
    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }

    async fn ensure_schema(&self, embedding_dim: usize) -> Result<()> {
        (**self).ensure_schema(embedding_dim).await
    }

    async fn schema_ready(&self) -> Result<bool> {
        (**self).schema_ready().await
    }

    async fn upsert_entities(
        &self,
        kind: EntityKind,
        entities: &[Entity],
        vectors: &[Option<Embedding>],
    ) -> Result<UpsertCounts> {
        (**self).upsert_entities(kind, entities, vectors).await
    }

    async fn upsert_relationships(
        &self,
        kind: RelationKind,
        relationships: &[Relationship],
    ) -> Result<UpsertCounts> {
        (**self).upsert_relationships(kind, relationships).await
    }

    async fn count_entities(&self, kind: EntityKind) -> Result<u64> {
        (**self).count_entities(kind).await
    }

    async fn count_relationships(&self, edge_type: EdgeType) -> Result<u64> {
        (**self).count_relationships(edge_type).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

impl<T: RunStateStore> RunStateStore for std::sync::Arc<T> {
    async fn latest_run(&self) -> Result<Option<IngestionRun>> {
        (**self).latest_run().await
    }

    async fn save_run(&self, run: &IngestionRun) -> Result<()> {
        (**self).save_run(run).await
    }
}
