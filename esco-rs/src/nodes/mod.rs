//! Entity (node) types for the taxonomy graph.
//!
//! - [`EntityKind`]: the closed set of ESCO concept kinds, with the row builder
//! - [`Entity`]: a concept ready to be embedded and written
//! - [`RowSkip`]: a rejected row and its [`SkipReason`]

pub mod entity;
pub mod skip;

pub use entity::{Entity, EntityAttributes, EntityKind};
pub use skip::{RowSkip, SkipReason};
