//! Embedding stage: turns a batch of entities into a parallel batch of
//! optional vectors.
//!
//! Cache hits skip the backend. Misses are sent in chunks of
//! `embedding_batch_size`, each call holding one permit of a semaphore shared
//! by every stage of the run. A chunk that fails (or answers with the wrong
//! number of vectors) is retried one text at a time, so one bad text costs
//! only its own vector.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::cache::EmbeddingCache;
use super::{Embedding, EmbedderClient};
use crate::errors::{EscoError, Result};
use crate::nodes::Entity;
use crate::types::IngestionConfig;
use crate::utils::similarity::normalize_l2;

/// Vectors for one entity batch, index-aligned with the input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddedBatch {
    pub vectors: Vec<Option<Embedding>>,
    /// Items written without a vector because the backend failed for them.
    pub failures: u64,
    pub cache_hits: u64,
}

pub struct EmbeddingStage<E> {
    client: Arc<E>,
    cache: EmbeddingCache,
    permits: Arc<Semaphore>,
    chunk_size: usize,
    enabled: bool,
}

impl<E> Clone for EmbeddingStage<E> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            cache: self.cache.clone(),
            permits: Arc::clone(&self.permits),
            chunk_size: self.chunk_size,
            enabled: self.enabled,
        }
    }
}

impl<E: EmbedderClient> EmbeddingStage<E> {
    /// `model` only namespaces cache keys; the client decides what it calls.
    pub fn new(client: Arc<E>, model: &str, config: &IngestionConfig) -> Self {
        Self {
            client,
            cache: EmbeddingCache::new(model, config.embedding_cache_capacity),
            permits: Arc::new(Semaphore::new(config.embedding_workers.max(1))),
            chunk_size: config.embedding_batch_size.max(1),
            enabled: config.embeddings_enabled,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Embed `entities`, never failing as a whole.
    pub async fn embed(&self, entities: &[Entity]) -> EmbeddedBatch {
        let mut batch = EmbeddedBatch {
            vectors: vec![None; entities.len()],
            ..Default::default()
        };
        if !self.enabled || entities.is_empty() {
            return batch;
        }

        let texts: Vec<String> = entities.iter().map(Entity::embedding_text).collect();

        let mut misses: Vec<usize> = Vec::new();
        for (idx, text) in texts.iter().enumerate() {
            match self.cache.get(text).await {
                Some(vector) => {
                    batch.vectors[idx] = Some(vector);
                    batch.cache_hits += 1;
                }
                None => misses.push(idx),
            }
        }

        let chunks = misses
            .chunks(self.chunk_size)
            .map(|chunk| self.embed_chunk(chunk, &texts));
        for results in join_all(chunks).await {
            for (idx, result) in results {
                match result {
                    Ok(vector) => {
                        self.cache.insert(&texts[idx], vector.clone()).await;
                        batch.vectors[idx] = Some(vector);
                    }
                    Err(err) => {
                        warn!(uri = %entities[idx].uri, kind = %entities[idx].kind, error = %err, "embedding failed; writing without vector");
                        batch.failures += 1;
                    }
                }
            }
        }

        debug!(
            total = entities.len(),
            cache_hits = batch.cache_hits,
            failures = batch.failures,
            "embedded batch"
        );
        batch
    }

    /// Embed the texts at `indices`, falling back to one call per text when
    /// the chunk call fails.
    async fn embed_chunk(
        &self,
        indices: &[usize],
        texts: &[String],
    ) -> Vec<(usize, Result<Embedding>)> {
        let chunk: Vec<&str> = indices.iter().map(|&i| texts[i].as_str()).collect();

        match self.call(&chunk).await {
            Ok(vectors) if vectors.len() == chunk.len() => indices
                .iter()
                .copied()
                .zip(vectors)
                .map(|(idx, v)| (idx, self.finish(v)))
                .collect(),
            outcome => {
                if let Err(err) = &outcome {
                    debug!(size = chunk.len(), error = %err, "chunk call failed; retrying per item");
                } else {
                    debug!(size = chunk.len(), "chunk returned wrong vector count; retrying per item");
                }
                let mut results = Vec::with_capacity(indices.len());
                for (&idx, text) in indices.iter().zip(&chunk) {
                    let single = self.call(&[*text]).await.and_then(|mut vs| {
                        if vs.len() == 1 {
                            Ok(vs.remove(0))
                        } else {
                            Err(EscoError::Embedder(format!(
                                "expected 1 vector, got {}",
                                vs.len()
                            )))
                        }
                    });
                    results.push((idx, single.and_then(|v| self.finish(v))));
                }
                results
            }
        }
    }

    async fn call(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| EscoError::Embedder(e.to_string()))?;
        self.client.embed_batch(texts).await
    }

    /// Check the dimension and L2-normalize.
    fn finish(&self, mut vector: Embedding) -> Result<Embedding> {
        let expected = self.client.dim();
        if vector.len() != expected {
            return Err(EscoError::Embedder(format!(
                "expected dimension {expected}, got {}",
                vector.len()
            )));
        }
        normalize_l2(&mut vector);
        Ok(vector)
    }
}
