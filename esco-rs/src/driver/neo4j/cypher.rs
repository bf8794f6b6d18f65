//! Cypher text for the Neo4j backend.
//!
//! Labels and relationship types come from closed enums and are spliced into
//! the query text; every value travels as a parameter.

use crate::edges::EdgeType;
use crate::nodes::EntityKind;

/// Name of the `uri` uniqueness constraint for `kind`.
pub fn constraint_name(kind: EntityKind) -> String {
    format!("esco_{}_uri", kind.label().to_ascii_lowercase())
}

/// Name of the vector index on `kind`'s `embedding` property.
pub fn vector_index_name(kind: EntityKind) -> String {
    format!("esco_{}_embedding", kind.label().to_ascii_lowercase())
}

pub const RUN_CONSTRAINT_NAME: &str = "esco_ingestion_run_id";

/// Every index/constraint name the schema consists of.
pub fn schema_object_names() -> Vec<String> {
    let mut names: Vec<String> = EntityKind::ALL
        .iter()
        .flat_map(|k| [constraint_name(*k), vector_index_name(*k)])
        .collect();
    names.push(RUN_CONSTRAINT_NAME.to_string());
    names
}

/// Idempotent DDL statements creating the full schema.
pub fn schema_statements(embedding_dim: usize) -> Vec<String> {
    let mut stmts = Vec::new();
    for kind in EntityKind::ALL {
        let label = kind.label();
        stmts.push(format!(
            "CREATE CONSTRAINT {} IF NOT EXISTS FOR (n:{label}) REQUIRE n.uri IS UNIQUE",
            constraint_name(kind)
        ));
        stmts.push(format!(
            "CREATE VECTOR INDEX {} IF NOT EXISTS FOR (n:{label}) ON (n.embedding) \
             OPTIONS {{indexConfig: {{`vector.dimensions`: {embedding_dim}, \
             `vector.similarity_function`: 'cosine'}}}}",
            vector_index_name(kind)
        ));
    }
    stmts.push(format!(
        "CREATE CONSTRAINT {RUN_CONSTRAINT_NAME} IF NOT EXISTS \
         FOR (r:IngestionRun) REQUIRE r.runId IS UNIQUE"
    ));
    stmts
}

/// Count schema objects that exist and are ONLINE.
pub const SCHEMA_READY: &str = "SHOW INDEXES YIELD name, state \
     WHERE name IN $names AND state = 'ONLINE' \
     RETURN count(*) AS online";

/// Upsert one batch of `$rows` for `kind`, reporting inserted/updated.
///
/// Each row: `uri`, `preferredLabel`, `description`, `altLabels`,
/// `embedding` (null clears) and `props` (kind-specific scalars).
pub fn upsert_entities(kind: EntityKind) -> String {
    let label = kind.label();
    format!(
        "UNWIND $rows AS row \
         OPTIONAL MATCH (existing:{label} {{uri: row.uri}}) \
         WITH row, existing IS NOT NULL AS existed \
         MERGE (n:{label} {{uri: row.uri}}) \
         SET n.preferredLabel = row.preferredLabel, \
             n.description = row.description, \
             n.altLabels = row.altLabels, \
             n.embedding = row.embedding, \
             n += row.props \
         RETURN sum(CASE WHEN existed THEN 0 ELSE 1 END) AS inserted, \
                sum(CASE WHEN existed THEN 1 ELSE 0 END) AS updated"
    )
}

/// Upsert `$rows` (`source`, `target`, `relationType`) as `edge_type`
/// between existing nodes. Rows whose endpoints do not match produce no
/// output, so `rows - matched` is the dangling count.
pub fn upsert_relationships(source: EntityKind, edge_type: EdgeType, target: EntityKind) -> String {
    format!(
        "UNWIND $rows AS row \
         MATCH (s:{src} {{uri: row.source}}) \
         MATCH (t:{dst} {{uri: row.target}}) \
         OPTIONAL MATCH (s)-[existing:{rel}]->(t) \
         WITH s, t, row, count(existing) > 0 AS existed \
         MERGE (s)-[r:{rel}]->(t) \
         SET r.relationType = row.relationType \
         RETURN count(r) AS matched, \
                sum(CASE WHEN existed THEN 1 ELSE 0 END) AS updated",
        src = source.label(),
        dst = target.label(),
        rel = edge_type.as_str(),
    )
}

pub fn count_entities(kind: EntityKind) -> String {
    format!("MATCH (n:{}) RETURN count(n) AS total", kind.label())
}

pub fn count_relationships(edge_type: EdgeType) -> String {
    format!("MATCH ()-[r:{}]->() RETURN count(r) AS total", edge_type.as_str())
}

pub const SAVE_RUN: &str = "MERGE (r:IngestionRun {runId: $runId}) \
     SET r.status = $status, \
         r.startedAt = $startedAt, \
         r.lastHeartbeatAt = $lastHeartbeatAt, \
         r.finishedAt = $finishedAt, \
         r.completedStages = $completedStages, \
         r.errorSummary = $errorSummary, \
         r.resumedFrom = $resumedFrom, \
         r.summary = $summary";

pub const LATEST_RUN: &str = "MATCH (r:IngestionRun) \
     RETURN r.runId AS runId, r.status AS status, r.startedAt AS startedAt, \
            r.lastHeartbeatAt AS lastHeartbeatAt, r.finishedAt AS finishedAt, \
            r.completedStages AS completedStages, r.errorSummary AS errorSummary, \
            r.resumedFrom AS resumedFrom, r.summary AS summary \
     ORDER BY r.startedAt DESC LIMIT 1";
