//! Shared utilities.
//!
//! Includes:
//! - Timestamp formatting/parsing for persisted run records
//! - Label and whitespace normalization for CSV cells
//! - Vector helpers (cosine similarity, L2 normalization)

pub mod datetime;
pub mod similarity;
pub mod text;

pub use datetime::{format_timestamp, parse_timestamp};
pub use similarity::{cosine_similarity, normalize_l2};
pub use text::{non_empty, normalize_whitespace, split_alt_labels, truncate_with_ellipsis};
