//! Content-addressed embedding cache.

use moka::future::Cache;

use super::Embedding;

/// Hex MD5 of `model` followed by `text`.
///
/// Folding the model name in keeps vectors from different models apart when
/// one cache outlives a configuration change.
pub fn cache_key(model: &str, text: &str) -> String {
    use md5::{Digest, Md5};
    let mut h = Md5::new();
    h.update(model.as_bytes());
    h.update(text.as_bytes());
    format!("{:x}", h.finalize())
}

/// Bounded cache of normalized vectors keyed by [`cache_key`].
#[derive(Clone)]
pub struct EmbeddingCache {
    model: String,
    inner: Cache<String, Embedding>,
}

impl EmbeddingCache {
    pub fn new(model: impl Into<String>, max_capacity: u64) -> Self {
        Self {
            model: model.into(),
            inner: Cache::builder().max_capacity(max_capacity).build(),
        }
    }

    pub async fn get(&self, text: &str) -> Option<Embedding> {
        self.inner.get(&cache_key(&self.model, text)).await
    }

    pub async fn insert(&self, text: &str, embedding: Embedding) {
        self.inner
            .insert(cache_key(&self.model, text), embedding)
            .await;
    }
}
