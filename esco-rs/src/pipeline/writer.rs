//! Batched, retried store writes.
//!
//! Every call is one upsert of one batch. Each attempt is bounded by the
//! write timeout; timeouts and transient store errors are retried with
//! exponential back-off until the attempt budget runs out, at which point the
//! batch fails with [`EscoError::Write`].

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use backoff::{future::retry, ExponentialBackoffBuilder};
use tracing::warn;

use crate::driver::{GraphStore, UpsertCounts};
use crate::edges::{RelationKind, Relationship};
use crate::embedder::Embedding;
use crate::errors::{EscoError, Result};
use crate::nodes::{Entity, EntityKind};
use crate::types::IngestionConfig;

/// Outcome of one committed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteResult {
    pub inserted: u64,
    pub updated: u64,
    pub missing_endpoints: u64,
}

impl From<UpsertCounts> for WriteResult {
    fn from(c: UpsertCounts) -> Self {
        Self {
            inserted: c.inserted,
            updated: c.updated,
            missing_endpoints: c.missing_endpoints,
        }
    }
}

/// Keep only the last occurrence of each key, in order of those last
/// occurrences.
pub fn dedupe_last_wins<T, K, F>(items: Vec<T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut last: HashMap<K, usize> = HashMap::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        last.insert(key(item), idx);
    }
    items
        .into_iter()
        .enumerate()
        .filter(|(idx, item)| last.get(&key(item)) == Some(idx))
        .map(|(_, item)| item)
        .collect()
}

pub struct BatchWriter<S> {
    store: Arc<S>,
    max_attempts: u32,
    initial_interval: Duration,
    max_interval: Duration,
    timeout: Duration,
}

impl<S: GraphStore> BatchWriter<S> {
    pub fn new(store: Arc<S>, config: &IngestionConfig) -> Self {
        Self {
            store,
            max_attempts: config.max_write_attempts.max(1),
            initial_interval: config.retry_initial_interval(),
            max_interval: config.retry_max_interval(),
            timeout: config.write_timeout(),
        }
    }

    pub async fn write_entities(
        &self,
        kind: EntityKind,
        entities: &[Entity],
        vectors: &[Option<Embedding>],
    ) -> Result<WriteResult> {
        self.with_retry(&kind.stage_name(), entities.len(), || {
            self.store.upsert_entities(kind, entities, vectors)
        })
        .await
        .map(WriteResult::from)
    }

    pub async fn write_relationships(
        &self,
        kind: RelationKind,
        relationships: &[Relationship],
    ) -> Result<WriteResult> {
        self.with_retry(&kind.stage_name(), relationships.len(), || {
            self.store.upsert_relationships(kind, relationships)
        })
        .await
        .map(WriteResult::from)
    }

    async fn with_retry<F, Fut>(&self, stage: &str, records: usize, op: F) -> Result<UpsertCounts>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<UpsertCounts>>,
    {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(None)
            .build();

        let max_attempts = self.max_attempts;
        let timeout = self.timeout;
        let mut attempts = 0u32;

        let result = retry(policy, || {
            attempts += 1;
            let attempt = attempts;
            let fut = op();
            async move {
                let err = match tokio::time::timeout(timeout, fut).await {
                    Ok(Ok(counts)) => return Ok(counts),
                    Ok(Err(err)) => err,
                    Err(_) => EscoError::Driver(format!(
                        "write timed out after {}s",
                        timeout.as_secs_f64()
                    )),
                };
                if err.is_transient() && attempt < max_attempts {
                    warn!(stage, attempt, max_attempts, records, error = %err, "batch write failed; retrying");
                    Err(backoff::Error::transient(err))
                } else {
                    Err(backoff::Error::permanent(err))
                }
            }
        })
        .await;

        result.map_err(|err| EscoError::Write {
            stage: stage.to_string(),
            attempts,
            records,
            message: err.to_string(),
        })
    }
}
