//! Relationship (edge) types for the taxonomy graph.
//!
//! - [`RelationKind`]: one variant per relationship file, with its builder
//!   and the entity kinds it depends on
//! - [`Relationship`]: a typed, directed edge between two concepts
//! - [`EdgeType`]: the stored relationship type

pub mod relation;

pub use relation::{isco_group_uri, EdgeType, RelationKind, Relationship};
