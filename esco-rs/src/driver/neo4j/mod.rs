//! Neo4j graph driver implementation.
//!
//! Uses `neo4rs` 0.8 for async, pooled Bolt connections. Batches are sent as
//! a single `UNWIND $rows` statement each; relationship batches are split by
//! `(source label, type, target label)` because hierarchy files mix endpoint
//! kinds.

pub mod cypher;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use neo4rs::{query, BoltType, ConfigBuilder, Graph, Query};
use tracing::{debug, info};
use uuid::Uuid;

use super::{GraphStore, RunStateStore, UpsertCounts};
use crate::edges::{EdgeType, RelationKind, Relationship};
use crate::embedder::Embedding;
use crate::errors::{EscoError, Result};
use crate::nodes::{Entity, EntityKind};
use crate::pipeline::run::{IngestionRun, RunStatus};
use crate::types::EscoConfig;
use crate::utils::datetime::{format_timestamp, parse_timestamp};

/// Neo4j backend for [`GraphStore`] and [`RunStateStore`].
pub struct Neo4jDriver {
    graph: Graph,
}

impl Neo4jDriver {
    /// Open a connection pool using the `NEO4J_*` settings of `config`.
    pub async fn connect(config: &EscoConfig) -> Result<Self> {
        let mut builder = ConfigBuilder::default()
            .uri(config.neo4j_uri.as_str())
            .user(config.neo4j_user.as_str())
            .password(config.neo4j_password.as_str())
            .max_connections(config.neo4j_max_connections);
        if let Some(db) = &config.neo4j_database {
            builder = builder.db(db.as_str());
        }
        let graph = Graph::connect(builder.build()?).await?;
        info!(uri = %config.neo4j_uri, max_connections = config.neo4j_max_connections, "connected to Neo4j");
        Ok(Self { graph })
    }

    /// Run `q` and return its single result row.
    async fn single_row(&self, q: Query) -> Result<neo4rs::Row> {
        let mut stream = self.graph.execute(q).await?;
        stream
            .next()
            .await?
            .ok_or_else(|| EscoError::Driver("query returned no rows".to_string()))
    }
}

fn entity_row(entity: &Entity, vector: &Option<Embedding>) -> BoltType {
    let props: HashMap<String, BoltType> = entity
        .attributes
        .scalars()
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.map(str::to_string).into()))
        .collect();
    let embedding: Option<Vec<f64>> = vector
        .as_ref()
        .map(|v| v.iter().map(|x| f64::from(*x)).collect());

    let mut row: HashMap<String, BoltType> = HashMap::new();
    row.insert("uri".into(), entity.uri.clone().into());
    row.insert("preferredLabel".into(), entity.preferred_label.clone().into());
    row.insert("description".into(), entity.description.clone().into());
    row.insert("altLabels".into(), entity.alt_labels.clone().into());
    row.insert("embedding".into(), embedding.into());
    row.insert("props".into(), props.into());
    row.into()
}

fn relationship_row(rel: &Relationship) -> BoltType {
    let mut row: HashMap<String, BoltType> = HashMap::new();
    row.insert("source".into(), rel.source_uri.clone().into());
    row.insert("target".into(), rel.target_uri.clone().into());
    row.insert("relationType".into(), rel.relation_type.clone().into());
    row.into()
}

fn to_u64(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

impl GraphStore for Neo4jDriver {
    async fn ping(&self) -> Result<()> {
        self.graph.run(query("RETURN 1")).await?;
        Ok(())
    }

    async fn ensure_schema(&self, embedding_dim: usize) -> Result<()> {
        for stmt in cypher::schema_statements(embedding_dim) {
            debug!(statement = %stmt, "applying schema");
            self.graph.run(query(&stmt)).await?;
        }
        Ok(())
    }

    async fn schema_ready(&self) -> Result<bool> {
        let names = cypher::schema_object_names();
        let expected = names.len() as i64;
        let row = self
            .single_row(query(cypher::SCHEMA_READY).param("names", names))
            .await?;
        let online: i64 = row.get("online")?;
        Ok(online == expected)
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
        if entities.is_empty() {
            return Ok(UpsertCounts::default());
        }
        let rows: Vec<BoltType> = entities
            .iter()
            .zip(vectors)
            .map(|(e, v)| entity_row(e, v))
            .collect();
        let row = self
            .single_row(query(&cypher::upsert_entities(kind)).param("rows", rows))
            .await?;
        Ok(UpsertCounts {
            inserted: to_u64(row.get("inserted")?),
            updated: to_u64(row.get("updated")?),
            missing_endpoints: 0,
        })
    }

    async fn upsert_relationships(
        &self,
        _kind: RelationKind,
        relationships: &[Relationship],
    ) -> Result<UpsertCounts> {
        let mut groups: BTreeMap<(EntityKind, EdgeType, EntityKind), Vec<&Relationship>> =
            BTreeMap::new();
        for rel in relationships {
            groups
                .entry((rel.source_kind, rel.edge_type, rel.target_kind))
                .or_default()
                .push(rel);
        }

        let mut counts = UpsertCounts::default();
        for ((source, edge_type, target), rels) in groups {
            let sent = rels.len() as u64;
            let rows: Vec<BoltType> = rels.into_iter().map(relationship_row).collect();
            let row = self
                .single_row(
                    query(&cypher::upsert_relationships(source, edge_type, target))
                        .param("rows", rows),
                )
                .await?;
            let matched = to_u64(row.get("matched")?);
            let updated = to_u64(row.get("updated")?);
            counts += UpsertCounts {
                inserted: matched.saturating_sub(updated),
                updated,
                missing_endpoints: sent.saturating_sub(matched),
            };
        }
        Ok(counts)
    }

    async fn count_entities(&self, kind: EntityKind) -> Result<u64> {
        let row = self.single_row(query(&cypher::count_entities(kind))).await?;
        Ok(to_u64(row.get("total")?))
    }

    async fn count_relationships(&self, edge_type: EdgeType) -> Result<u64> {
        let row = self
            .single_row(query(&cypher::count_relationships(edge_type)))
            .await?;
        Ok(to_u64(row.get("total")?))
    }

    async fn close(&self) -> Result<()> {
        // neo4rs releases pooled connections on drop.
        debug!("closing Neo4j driver");
        Ok(())
    }
}

fn parse_required_ts(field: &str, raw: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(raw)
        .ok_or_else(|| EscoError::State(format!("run record has invalid {field}: {raw:?}")))
}

impl RunStateStore for Neo4jDriver {
    async fn latest_run(&self) -> Result<Option<IngestionRun>> {
        let mut stream = self.graph.execute(query(cypher::LATEST_RUN)).await?;
        let Some(row) = stream.next().await? else {
            return Ok(None);
        };

        let run_id: String = row.get("runId")?;
        let status: String = row.get("status")?;
        let started_at: String = row.get("startedAt")?;
        let heartbeat: String = row.get("lastHeartbeatAt")?;
        let finished_at: Option<String> = row.get("finishedAt")?;
        let completed_stages: Option<Vec<String>> = row.get("completedStages")?;
        let error_summary: Option<String> = row.get("errorSummary")?;
        let resumed_from: Option<String> = row.get("resumedFrom")?;
        let summary: Option<String> = row.get("summary")?;

        let parse_uuid = |raw: &str| {
            Uuid::parse_str(raw)
                .map_err(|e| EscoError::State(format!("run record has invalid id {raw:?}: {e}")))
        };

        Ok(Some(IngestionRun {
            run_id: parse_uuid(&run_id)?,
            status: status.parse::<RunStatus>()?,
            started_at: parse_required_ts("startedAt", &started_at)?,
            last_heartbeat_at: parse_required_ts("lastHeartbeatAt", &heartbeat)?,
            finished_at: finished_at.as_deref().and_then(parse_timestamp),
            completed_stages: completed_stages.unwrap_or_default().into_iter().collect(),
            error_summary,
            resumed_from: resumed_from.as_deref().map(parse_uuid).transpose()?,
            summary: summary.as_deref().map(serde_json::from_str).transpose()?,
        }))
    }

    async fn save_run(&self, run: &IngestionRun) -> Result<()> {
        let summary = run.summary.as_ref().map(serde_json::to_string).transpose()?;
        let stages: Vec<String> = run.completed_stages.iter().cloned().collect();
        let q = query(cypher::SAVE_RUN)
            .param("runId", run.run_id.to_string())
            .param("status", run.status.as_str())
            .param("startedAt", format_timestamp(&run.started_at))
            .param("lastHeartbeatAt", format_timestamp(&run.last_heartbeat_at))
            .param("finishedAt", run.finished_at.as_ref().map(format_timestamp))
            .param("completedStages", stages)
            .param("errorSummary", run.error_summary.clone())
            .param("resumedFrom", run.resumed_from.map(|id| id.to_string()))
            .param("summary", summary);
        self.graph.run(q).await?;
        Ok(())
    }
}
