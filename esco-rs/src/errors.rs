//! Error types for esco-rs.

use std::path::PathBuf;

/// Alias for Results returning [`EscoError`].
pub type Result<T> = std::result::Result<T, EscoError>;

/// Top-level error type for esco-rs.
///
/// Row-level problems never surface here: they are recovered locally as
/// [`crate::nodes::RowSkip`] values and counted in the run summary.
#[derive(Debug, thiserror::Error)]
pub enum EscoError {
    #[error("Schema mismatch in '{}': missing required columns {missing:?}", path.display())]
    SchemaMismatch { path: PathBuf, missing: Vec<String> },

    #[error("CSV error in '{}': {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("IO error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Embedder error: {0}")]
    Embedder(String),

    #[error("Write failed for {stage} after {attempts} attempts ({records} records): {message}")]
    Write {
        stage: String,
        attempts: u32,
        records: usize,
        message: String,
    },

    #[error("Invalid state transition: {0}")]
    State(String),

    #[error("Referential integrity threshold exceeded: {dangling} dangling relationships (max {max})")]
    IntegrityThreshold { dangling: u64, max: u64 },

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EscoError {
    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        EscoError::Csv {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EscoError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a store call failing with this error is worth retrying.
    ///
    /// Connection, timeout and server-side failures surface as
    /// [`EscoError::Driver`]; everything else is a bug in the request.
    pub fn is_transient(&self) -> bool {
        matches!(self, EscoError::Driver(_))
    }
}

impl From<neo4rs::Error> for EscoError {
    fn from(err: neo4rs::Error) -> Self {
        EscoError::Driver(err.to_string())
    }
}

impl From<neo4rs::DeError> for EscoError {
    fn from(err: neo4rs::DeError) -> Self {
        EscoError::Driver(format!("unexpected result shape: {err}"))
    }
}
