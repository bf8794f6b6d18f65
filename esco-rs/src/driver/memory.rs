//! In-memory store backed by [`DashMap`].
//!
//! Implements the same upsert semantics as the Neo4j backend: entities keyed
//! by `(kind, uri)`, relationships written only when both endpoints exist.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dashmap::DashMap;
use uuid::Uuid;

use super::{GraphStore, RunStateStore, UpsertCounts};
use crate::edges::{EdgeType, RelationKind, Relationship};
use crate::embedder::Embedding;
use crate::errors::{EscoError, Result};
use crate::nodes::{Entity, EntityKind};
use crate::pipeline::run::IngestionRun;
use crate::utils::similarity::cosine_similarity;

/// An entity as held by the store, with its vector.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntity {
    pub entity: Entity,
    pub embedding: Option<Embedding>,
}

type EdgeKey = (EntityKind, String, EdgeType, EntityKind, String);

#[derive(Debug, Default)]
pub struct MemoryStore {
    entities: DashMap<(EntityKind, String), StoredEntity>,
    relationships: DashMap<EdgeKey, Relationship>,
    runs: DashMap<Uuid, IngestionRun>,
    schema: AtomicBool,
    embedding_dim: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(&self, kind: EntityKind, uri: &str) -> Option<StoredEntity> {
        self.entities
            .get(&(kind, uri.to_string()))
            .map(|e| e.value().clone())
    }

    pub fn entities(&self, kind: EntityKind) -> Vec<StoredEntity> {
        let mut out: Vec<StoredEntity> = self
            .entities
            .iter()
            .filter(|e| e.key().0 == kind)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.entity.uri.cmp(&b.entity.uri));
        out
    }

    /// All stored relationships, sorted by key.
    pub fn relationships(&self) -> Vec<Relationship> {
        let mut out: Vec<Relationship> =
            self.relationships.iter().map(|r| r.value().clone()).collect();
        out.sort_by(|a, b| a.key().cmp(&b.key()));
        out
    }

    pub fn has_relationship(
        &self,
        source_uri: &str,
        edge_type: EdgeType,
        target_uri: &str,
    ) -> bool {
        self.relationships.iter().any(|r| {
            r.source_uri == source_uri && r.edge_type == edge_type && r.target_uri == target_uri
        })
    }

    /// Every run record, oldest first.
    pub fn runs(&self) -> Vec<IngestionRun> {
        let mut out: Vec<IngestionRun> = self.runs.iter().map(|r| r.value().clone()).collect();
        out.sort_by_key(|r| r.started_at);
        out
    }

    /// The `k` entities of `kind` whose vectors are closest to `query` by
    /// cosine similarity, best first.
    pub fn nearest(&self, kind: EntityKind, query: &[f32], k: usize) -> Vec<(String, f32)> {
        let mut scored: Vec<(String, f32)> = self
            .entities
            .iter()
            .filter(|e| e.key().0 == kind)
            .filter_map(|e| {
                e.value()
                    .embedding
                    .as_ref()
                    .map(|v| (e.key().1.clone(), cosine_similarity(query, v)))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        scored
    }
}

impl GraphStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn ensure_schema(&self, embedding_dim: usize) -> Result<()> {
        self.embedding_dim.store(embedding_dim, Ordering::SeqCst);
        self.schema.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn schema_ready(&self) -> Result<bool> {
        Ok(self.schema.load(Ordering::SeqCst))
    }

    async fn upsert_entities(
        &self,
        kind: EntityKind,
        entities: &[Entity],
        vectors: &[Option<Embedding>],
    ) -> Result<UpsertCounts> {
        if entities.len() != vectors.len() {
            return Err(EscoError::Validation(format!(
                "{} entities but {} vectors",
                entities.len(),
                vectors.len()
            )));
        }
        let dim = self.embedding_dim.load(Ordering::SeqCst);
        let mut counts = UpsertCounts::default();
        for (entity, vector) in entities.iter().zip(vectors) {
            if let Some(v) = vector {
                if dim != 0 && v.len() != dim {
                    return Err(EscoError::Validation(format!(
                        "vector for {} has dimension {}, index expects {dim}",
                        entity.uri,
                        v.len()
                    )));
                }
            }
            let stored = StoredEntity {
                entity: entity.clone(),
                embedding: vector.clone(),
            };
            match self.entities.insert((kind, entity.uri.clone()), stored) {
                Some(_) => counts.updated += 1,
                None => counts.inserted += 1,
            }
        }
        Ok(counts)
    }

    async fn upsert_relationships(
        &self,
        _kind: RelationKind,
        relationships: &[Relationship],
    ) -> Result<UpsertCounts> {
        let mut counts = UpsertCounts::default();
        for rel in relationships {
            let source = (rel.source_kind, rel.source_uri.clone());
            let target = (rel.target_kind, rel.target_uri.clone());
            if !self.entities.contains_key(&source) || !self.entities.contains_key(&target) {
                counts.missing_endpoints += 1;
                continue;
            }
            let key = (
                rel.source_kind,
                rel.source_uri.clone(),
                rel.edge_type,
                rel.target_kind,
                rel.target_uri.clone(),
            );
            match self.relationships.insert(key, rel.clone()) {
                Some(_) => counts.updated += 1,
                None => counts.inserted += 1,
            }
        }
        Ok(counts)
    }

    async fn count_entities(&self, kind: EntityKind) -> Result<u64> {
        Ok(self.entities.iter().filter(|e| e.key().0 == kind).count() as u64)
    }

    async fn count_relationships(&self, edge_type: EdgeType) -> Result<u64> {
        Ok(self
            .relationships
            .iter()
            .filter(|r| r.key().2 == edge_type)
            .count() as u64)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl RunStateStore for MemoryStore {
    async fn latest_run(&self) -> Result<Option<IngestionRun>> {
        Ok(self.runs().pop())
    }

    async fn save_run(&self, run: &IngestionRun) -> Result<()> {
        self.runs.insert(run.run_id, run.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Row;
    use chrono::{Duration, Utc};

    fn entity(kind: EntityKind, uri: &str, label: &str) -> Entity {
        let mut pairs = vec![("conceptUri", uri), ("preferredLabel", label)];
        if kind == EntityKind::IscoGroup {
            pairs.push(("code", "25"));
        }
        kind.transform(&Row::from_pairs(1, &pairs)).unwrap()
    }

    #[tokio::test]
    async fn upsert_counts_inserts_then_updates() {
        let store = MemoryStore::new();
        let batch = vec![entity(EntityKind::Skill, "s1", "a"), entity(EntityKind::Skill, "s2", "b")];
        let first = store
            .upsert_entities(EntityKind::Skill, &batch, &[None, None])
            .await
            .unwrap();
        assert_eq!((first.inserted, first.updated), (2, 0));

        let second = store
            .upsert_entities(EntityKind::Skill, &batch[..1], &[Some(vec![1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!((second.inserted, second.updated), (0, 1));
        assert_eq!(store.count_entities(EntityKind::Skill).await.unwrap(), 2);
        assert!(store.entity(EntityKind::Skill, "s1").unwrap().embedding.is_some());
    }

    #[tokio::test]
    async fn absent_vector_clears_stored_vector() {
        let store = MemoryStore::new();
        let batch = vec![entity(EntityKind::Skill, "s1", "a")];
        store
            .upsert_entities(EntityKind::Skill, &batch, &[Some(vec![1.0])])
            .await
            .unwrap();
        store
            .upsert_entities(EntityKind::Skill, &batch, &[None])
            .await
            .unwrap();
        assert!(store.entity(EntityKind::Skill, "s1").unwrap().embedding.is_none());
    }

    #[tokio::test]
    async fn relationships_need_both_endpoints() {
        let store = MemoryStore::new();
        store
            .upsert_entities(
                EntityKind::Skill,
                &[entity(EntityKind::Skill, "s1", "a")],
                &[None],
            )
            .await
            .unwrap();
        store
            .upsert_entities(
                EntityKind::Occupation,
                &[entity(EntityKind::Occupation, "o1", "x")],
                &[None],
            )
            .await
            .unwrap();

        let rel = |skill: &str| Relationship {
            source_uri: skill.into(),
            source_kind: EntityKind::Skill,
            target_uri: "o1".into(),
            target_kind: EntityKind::Occupation,
            edge_type: EdgeType::EssentialFor,
            relation_type: None,
        };
        let counts = store
            .upsert_relationships(RelationKind::OccupationSkill, &[rel("s1"), rel("missing")])
            .await
            .unwrap();
        assert_eq!(counts.inserted, 1);
        assert_eq!(counts.missing_endpoints, 1);
        assert!(store.has_relationship("s1", EdgeType::EssentialFor, "o1"));
        assert_eq!(store.count_relationships(EdgeType::EssentialFor).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn nearest_ranks_by_cosine() {
        let store = MemoryStore::new();
        let batch = vec![
            entity(EntityKind::Skill, "near", "a"),
            entity(EntityKind::Skill, "far", "b"),
            entity(EntityKind::Skill, "none", "c"),
        ];
        store
            .upsert_entities(
                EntityKind::Skill,
                &batch,
                &[Some(vec![1.0, 0.1]), Some(vec![0.0, 1.0]), None],
            )
            .await
            .unwrap();
        let hits = store.nearest(EntityKind::Skill, &[1.0, 0.0], 5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "near");
    }

    #[tokio::test]
    async fn wrong_dimension_rejected_after_schema() {
        let store = MemoryStore::new();
        store.ensure_schema(3).await.unwrap();
        assert!(store.schema_ready().await.unwrap());
        let result = store
            .upsert_entities(
                EntityKind::Skill,
                &[entity(EntityKind::Skill, "s1", "a")],
                &[Some(vec![1.0])],
            )
            .await;
        assert!(matches!(result, Err(EscoError::Validation(_))));
    }

    #[tokio::test]
    async fn latest_run_is_most_recently_started() {
        let store = MemoryStore::new();
        assert!(store.latest_run().await.unwrap().is_none());
        let now = Utc::now();
        let older = IngestionRun::start(now - Duration::hours(1));
        let newer = IngestionRun::start(now);
        store.save_run(&newer).await.unwrap();
        store.save_run(&older).await.unwrap();
        assert_eq!(store.latest_run().await.unwrap().unwrap().run_id, newer.run_id);
        assert_eq!(store.runs().len(), 2);
    }
}
