//! # esco-rs
//!
//! Ingestion engine for the [ESCO](https://esco.ec.europa.eu) taxonomy: loads
//! the CSV snapshot (occupations, skills, groups, collections and their typed
//! relations) into a graph store with vector embeddings.
//!
//! ## Architecture
//!
//! - **Streaming sources**: CSV files are read lazily with a header contract
//! - **Closed builders**: one transform per entity/relation kind, skips are values
//! - **Embedding stage**: content-hash cache, bounded concurrency, per-item isolation
//! - **Resumable runs**: lease + heartbeat + per-stage checkpoints in the store
//! - **Dependency-ordered scheduling**: relations only after their endpoints commit

pub mod edges;
pub mod errors;
pub mod nodes;
pub mod source;
pub mod types;

pub mod driver;
pub mod embedder;

pub mod pipeline;
pub mod utils;

pub use driver::{GraphStore, RunStateStore};
pub use errors::{EscoError, Result};
pub use pipeline::orchestrator::{IngestionOutcome, Orchestrator};
pub use types::{EscoConfig, IngestionConfig};
