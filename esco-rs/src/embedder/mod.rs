//! Embedding generation.
//!
//! - [`EmbedderClient`]: text-to-vector backend abstraction
//! - [`openai::OpenAiEmbedder`]: OpenAI-compatible HTTP backend via `async-openai`
//! - [`stage::EmbeddingStage`]: cache + bounded concurrency + per-item failure
//!   isolation over any client

pub mod cache;
pub mod openai;
pub mod stage;

pub use stage::{EmbeddedBatch, EmbeddingStage};

use crate::errors::Result;

/// A vector embedding (f32 components).
pub type Embedding = Vec<f32>;

/// Trait for text-to-vector embedding clients.
#[allow(async_fn_in_trait)]
pub trait EmbedderClient: Send + Sync {
    /// Generate an embedding for a single text string.
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Generate embeddings for a batch of texts, one per input, in order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>>;

    /// Returns the dimensionality of embeddings produced by this client.
    fn dim(&self) -> usize;
}
