//! Recoverable row rejections.

/// Why a row produced no entity or relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Blank concept URI.
    MissingIdentifier,
    /// Blank preferred label.
    MissingLabel,
    /// A kind-specific required value is blank.
    MissingField(&'static str),
    /// Source and target are the same concept on a non-reflexive edge.
    SelfLoop,
    /// The discriminator column holds a value with no edge mapping.
    UnknownDiscriminator,
    /// A hierarchy row names an endpoint type outside the file's pillar.
    UnknownEndpointType,
    /// Source or target URI is blank.
    MissingEndpoint,
}

impl SkipReason {
    /// Stable key used when counting reasons in the run summary.
    pub fn key(&self) -> String {
        match self {
            SkipReason::MissingIdentifier => "missing_identifier".to_string(),
            SkipReason::MissingLabel => "missing_label".to_string(),
            SkipReason::MissingField(field) => format!("missing_field:{field}"),
            SkipReason::SelfLoop => "self_loop".to_string(),
            SkipReason::UnknownDiscriminator => "unknown_discriminator".to_string(),
            SkipReason::UnknownEndpointType => "unknown_endpoint_type".to_string(),
            SkipReason::MissingEndpoint => "missing_endpoint".to_string(),
        }
    }
}

/// A row the builders rejected, with its 1-based data line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("row {line} skipped: {}", reason.key())]
pub struct RowSkip {
    pub line: u64,
    pub reason: SkipReason,
}

impl RowSkip {
    pub fn new(line: u64, reason: SkipReason) -> Self {
        Self { line, reason }
    }
}
