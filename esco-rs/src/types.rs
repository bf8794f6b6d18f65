//! Configuration types loaded from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::EscoError;

/// Central configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EscoConfig {
    /// Neo4j connection URI (e.g. `bolt://localhost:7687`).
    #[validate(length(min = 1))]
    pub neo4j_uri: String,

    /// Neo4j username.
    pub neo4j_user: String,

    /// Neo4j password.
    #[validate(length(min = 1))]
    pub neo4j_password: String,

    /// Target database; the server default when unset.
    pub neo4j_database: Option<String>,

    /// Size of the bolt connection pool shared by concurrent stage writers.
    #[validate(range(min = 1))]
    pub neo4j_max_connections: usize,

    /// API key for the embedding backend. May be empty when embeddings are
    /// disabled.
    pub openai_api_key: String,

    /// Base URL of an OpenAI-compatible embeddings API. `None` uses the
    /// public OpenAI endpoint.
    pub embedding_api_base: Option<String>,

    /// Embedding model name.
    #[validate(length(min = 1))]
    pub embedding_model: String,

    /// Embedding vector dimension.
    #[validate(range(min = 1))]
    pub embedding_dim: usize,

    /// Directory containing the ESCO CSV snapshot.
    pub data_dir: PathBuf,

    #[validate(nested)]
    pub ingestion: IngestionConfig,
}

/// Engine knobs. Every field has a documented default and an `ESCO_*`
/// override.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IngestionConfig {
    /// Records per store write (`ESCO_BATCH_SIZE`, default 100).
    #[validate(range(min = 1))]
    pub batch_size: usize,

    /// Texts per embedding backend call (`ESCO_EMBEDDING_BATCH_SIZE`, default 32).
    #[validate(range(min = 1))]
    pub embedding_batch_size: usize,

    /// Concurrent embedding calls across all stages (`ESCO_EMBEDDING_WORKERS`, default 4).
    #[validate(range(min = 1))]
    pub embedding_workers: usize,

    /// Entries kept in the embedding cache (`ESCO_EMBEDDING_CACHE_CAPACITY`, default 10000).
    pub embedding_cache_capacity: u64,

    /// When false, entities are written without vectors (`ESCO_EMBEDDINGS_ENABLED`, default true).
    pub embeddings_enabled: bool,

    /// Attempts per batch write, including the first (`ESCO_MAX_WRITE_ATTEMPTS`, default 5).
    #[validate(range(min = 1))]
    pub max_write_attempts: u32,

    /// First retry delay in milliseconds (`ESCO_RETRY_INITIAL_INTERVAL_MS`, default 500).
    #[validate(range(min = 1))]
    pub retry_initial_interval_ms: u64,

    /// Retry delay cap in milliseconds (`ESCO_RETRY_MAX_INTERVAL_MS`, default 10000).
    #[validate(range(min = 1))]
    pub retry_max_interval_ms: u64,

    /// Per-attempt write timeout in seconds (`ESCO_WRITE_TIMEOUT_SECS`, default 60).
    #[validate(range(min = 1))]
    pub write_timeout_secs: u64,

    /// Heartbeat age after which an IN_PROGRESS run counts as stale
    /// (`ESCO_STALENESS_THRESHOLD_SECS`, default 7200).
    #[validate(range(min = 1))]
    pub staleness_threshold_secs: u64,

    /// Stages running at once (`ESCO_MAX_CONCURRENT_STAGES`, default 2).
    #[validate(range(min = 1))]
    pub max_concurrent_stages: usize,

    /// Ingest entities only (`ESCO_SKIP_RELATIONS`, default false).
    pub skip_relations: bool,

    /// Start from scratch even after a completed run (`ESCO_FORCE_REINGEST`, default false).
    pub force_reingest: bool,

    /// Inherit checkpoints from a FAILED previous run (`ESCO_RESUME_FAILED_RUNS`, default true).
    pub resume_failed_runs: bool,

    /// Poll an active run until it ends instead of exiting
    /// (`ESCO_WAIT_FOR_ACTIVE_RUN`, default false).
    pub wait_for_active_run: bool,

    /// Seconds between polls while waiting (`ESCO_POLL_INTERVAL_SECS`, default 30).
    #[validate(range(min = 1))]
    pub poll_interval_secs: u64,

    /// Fail the run when dangling relationships exceed this count
    /// (`ESCO_MAX_DANGLING_RELATIONSHIPS`, unset by default).
    pub max_dangling_relationships: Option<u64>,

    /// Wall-clock budget for the whole run in seconds (`ESCO_TIME_BUDGET_SECS`, unset by default).
    pub time_budget_secs: Option<u64>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            embedding_batch_size: 32,
            embedding_workers: 4,
            embedding_cache_capacity: 10_000,
            embeddings_enabled: true,
            max_write_attempts: 5,
            retry_initial_interval_ms: 500,
            retry_max_interval_ms: 10_000,
            write_timeout_secs: 60,
            staleness_threshold_secs: 7_200,
            max_concurrent_stages: 2,
            skip_relations: false,
            force_reingest: false,
            resume_failed_runs: true,
            wait_for_active_run: false,
            poll_interval_secs: 30,
            max_dangling_relationships: None,
            time_budget_secs: None,
        }
    }
}

impl IngestionConfig {
    pub fn retry_initial_interval(&self) -> Duration {
        Duration::from_millis(self.retry_initial_interval_ms)
    }

    pub fn retry_max_interval(&self) -> Duration {
        Duration::from_millis(self.retry_max_interval_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_secs.map(Duration::from_secs)
    }
}

impl Default for EscoConfig {
    fn default() -> Self {
        Self {
            neo4j_uri: "bolt://localhost:7687".to_string(),
            neo4j_user: "neo4j".to_string(),
            neo4j_password: String::new(),
            neo4j_database: None,
            neo4j_max_connections: 16,
            openai_api_key: String::new(),
            embedding_api_base: None,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dim: 1536,
            data_dir: PathBuf::from("data"),
            ingestion: IngestionConfig::default(),
        }
    }
}

impl EscoConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` first (non-fatal if `.env` is absent),
    /// then reads each variable from the process environment. Required
    /// variables (`NEO4J_PASSWORD`, `ESCO_DATA_DIR`, and `OPENAI_API_KEY`
    /// unless `ESCO_EMBEDDINGS_ENABLED=false`) return an
    /// [`EscoError::Validation`] naming the variable when absent or empty.
    pub fn from_env() -> crate::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = IngestionConfig::default();

        let ingestion = IngestionConfig {
            batch_size: parse_or(&get, "ESCO_BATCH_SIZE", defaults.batch_size)?,
            embedding_batch_size: parse_or(
                &get,
                "ESCO_EMBEDDING_BATCH_SIZE",
                defaults.embedding_batch_size,
            )?,
            embedding_workers: parse_or(&get, "ESCO_EMBEDDING_WORKERS", defaults.embedding_workers)?,
            embedding_cache_capacity: parse_or(
                &get,
                "ESCO_EMBEDDING_CACHE_CAPACITY",
                defaults.embedding_cache_capacity,
            )?,
            embeddings_enabled: bool_or(&get, "ESCO_EMBEDDINGS_ENABLED", defaults.embeddings_enabled)?,
            max_write_attempts: parse_or(&get, "ESCO_MAX_WRITE_ATTEMPTS", defaults.max_write_attempts)?,
            retry_initial_interval_ms: parse_or(
                &get,
                "ESCO_RETRY_INITIAL_INTERVAL_MS",
                defaults.retry_initial_interval_ms,
            )?,
            retry_max_interval_ms: parse_or(
                &get,
                "ESCO_RETRY_MAX_INTERVAL_MS",
                defaults.retry_max_interval_ms,
            )?,
            write_timeout_secs: parse_or(&get, "ESCO_WRITE_TIMEOUT_SECS", defaults.write_timeout_secs)?,
            staleness_threshold_secs: parse_or(
                &get,
                "ESCO_STALENESS_THRESHOLD_SECS",
                defaults.staleness_threshold_secs,
            )?,
            max_concurrent_stages: parse_or(
                &get,
                "ESCO_MAX_CONCURRENT_STAGES",
                defaults.max_concurrent_stages,
            )?,
            skip_relations: bool_or(&get, "ESCO_SKIP_RELATIONS", defaults.skip_relations)?,
            force_reingest: bool_or(&get, "ESCO_FORCE_REINGEST", defaults.force_reingest)?,
            resume_failed_runs: bool_or(&get, "ESCO_RESUME_FAILED_RUNS", defaults.resume_failed_runs)?,
            wait_for_active_run: bool_or(
                &get,
                "ESCO_WAIT_FOR_ACTIVE_RUN",
                defaults.wait_for_active_run,
            )?,
            poll_interval_secs: parse_or(&get, "ESCO_POLL_INTERVAL_SECS", defaults.poll_interval_secs)?,
            max_dangling_relationships: parse_opt(&get, "ESCO_MAX_DANGLING_RELATIONSHIPS")?,
            time_budget_secs: parse_opt(&get, "ESCO_TIME_BUDGET_SECS")?,
        };

        let neo4j_password = get("NEO4J_PASSWORD").ok_or_else(|| {
            EscoError::Validation("NEO4J_PASSWORD is required".to_string())
        })?;

        let data_dir = get("ESCO_DATA_DIR")
            .map(PathBuf::from)
            .ok_or_else(|| EscoError::Validation("ESCO_DATA_DIR is required".to_string()))?;

        let openai_api_key = match get("OPENAI_API_KEY") {
            Some(key) => key,
            None if !ingestion.embeddings_enabled => String::new(),
            None => {
                return Err(EscoError::Validation(
                    "OPENAI_API_KEY is required when embeddings are enabled".to_string(),
                ))
            }
        };

        let config = Self {
            neo4j_uri: get("NEO4J_URI").unwrap_or_else(|| "bolt://localhost:7687".to_string()),
            neo4j_user: get("NEO4J_USER").unwrap_or_else(|| "neo4j".to_string()),
            neo4j_password,
            neo4j_database: get("NEO4J_DATABASE"),
            neo4j_max_connections: parse_or(&get, "NEO4J_MAX_CONNECTIONS", 16)?,
            openai_api_key,
            embedding_api_base: get("EMBEDDING_API_BASE"),
            embedding_model: get("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            embedding_dim: parse_or(&get, "EMBEDDING_DIM", 1536)?,
            data_dir,
            ingestion,
        };

        config
            .validate()
            .map_err(|e| EscoError::Validation(e.to_string()))?;

        Ok(config)
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> crate::Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(get, key)?.unwrap_or(default))
}

fn parse_opt<T, G>(get: &G, key: &str) -> crate::Result<Option<T>>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| EscoError::Validation(format!("{key} has an invalid value: {raw:?}"))),
        None => Ok(None),
    }
}

fn bool_or<G>(get: &G, key: &str, default: bool) -> crate::Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(EscoError::Validation(format!(
                "{key} must be a boolean, got {v:?}"
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Builds a config from a fixed set of variables, ignoring the process env.
    fn load(vars: &[(&str, &str)]) -> crate::Result<EscoConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EscoConfig::from_lookup(|key| map.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("NEO4J_PASSWORD", "secret"),
        ("OPENAI_API_KEY", "sk-test"),
        ("ESCO_DATA_DIR", "/data/esco"),
    ];

    #[test]
    fn test_config_defaults() {
        let config = load(&REQUIRED).expect("config should load");
        assert_eq!(config.neo4j_uri, "bolt://localhost:7687");
        assert_eq!(config.neo4j_user, "neo4j");
        assert_eq!(config.neo4j_max_connections, 16);
        assert_eq!(config.embedding_dim, 1536);
        assert_eq!(config.embedding_model, "text-embedding-3-small");
        assert!(config.embedding_api_base.is_none());
        assert_eq!(config.data_dir, PathBuf::from("/data/esco"));

        let ing = &config.ingestion;
        assert_eq!(ing.batch_size, 100);
        assert_eq!(ing.max_write_attempts, 5);
        assert_eq!(ing.staleness_threshold(), Duration::from_secs(7200));
        assert!(ing.resume_failed_runs);
        assert!(!ing.force_reingest);
        assert!(ing.max_dangling_relationships.is_none());
        assert!(ing.time_budget().is_none());
    }

    #[test]
    fn test_config_custom_values() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("NEO4J_URI", "bolt://db.example.com:7687"),
            ("NEO4J_DATABASE", "esco"),
            ("EMBEDDING_API_BASE", "http://localhost:11434/v1"),
            ("EMBEDDING_DIM", "768"),
            ("ESCO_BATCH_SIZE", "250"),
            ("ESCO_SKIP_RELATIONS", "true"),
            ("ESCO_RESUME_FAILED_RUNS", "0"),
            ("ESCO_MAX_DANGLING_RELATIONSHIPS", "10"),
            ("ESCO_TIME_BUDGET_SECS", "3600"),
        ]);
        let config = load(&vars).expect("config should load");
        assert_eq!(config.neo4j_uri, "bolt://db.example.com:7687");
        assert_eq!(config.neo4j_database.as_deref(), Some("esco"));
        assert_eq!(
            config.embedding_api_base.as_deref(),
            Some("http://localhost:11434/v1")
        );
        assert_eq!(config.embedding_dim, 768);
        assert_eq!(config.ingestion.batch_size, 250);
        assert!(config.ingestion.skip_relations);
        assert!(!config.ingestion.resume_failed_runs);
        assert_eq!(config.ingestion.max_dangling_relationships, Some(10));
        assert_eq!(
            config.ingestion.time_budget(),
            Some(Duration::from_secs(3600))
        );
    }

    #[test]
    fn test_config_missing_password() {
        let result = load(&[("OPENAI_API_KEY", "sk"), ("ESCO_DATA_DIR", "/d")]);
        match result {
            Err(EscoError::Validation(msg)) => assert!(msg.contains("NEO4J_PASSWORD")),
            other => panic!("expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_config_missing_data_dir() {
        let result = load(&[("NEO4J_PASSWORD", "pw"), ("OPENAI_API_KEY", "sk")]);
        match result {
            Err(EscoError::Validation(msg)) => assert!(msg.contains("ESCO_DATA_DIR")),
            other => panic!("expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_api_key_optional_when_embeddings_disabled() {
        let vars = [
            ("NEO4J_PASSWORD", "pw"),
            ("ESCO_DATA_DIR", "/d"),
            ("ESCO_EMBEDDINGS_ENABLED", "false"),
        ];
        let config = load(&vars).expect("config should load");
        assert!(!config.ingestion.embeddings_enabled);
        assert!(config.openai_api_key.is_empty());

        let result = load(&vars[..2]);
        match result {
            Err(EscoError::Validation(msg)) => assert!(msg.contains("OPENAI_API_KEY")),
            other => panic!("expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_config_invalid_number_names_variable() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("EMBEDDING_DIM", "not-a-number"));
        match load(&vars) {
            Err(EscoError::Validation(msg)) => assert!(msg.contains("EMBEDDING_DIM")),
            other => panic!("expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_config_zero_values_rejected() {
        for (key, value) in [
            ("EMBEDDING_DIM", "0"),
            ("ESCO_BATCH_SIZE", "0"),
            ("ESCO_MAX_WRITE_ATTEMPTS", "0"),
        ] {
            let mut vars = REQUIRED.to_vec();
            vars.push((key, value));
            assert!(load(&vars).is_err(), "{key}=0 should be rejected");
        }
    }

    #[test]
    fn test_invalid_boolean() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("ESCO_FORCE_REINGEST", "maybe"));
        match load(&vars) {
            Err(EscoError::Validation(msg)) => assert!(msg.contains("ESCO_FORCE_REINGEST")),
            other => panic!("expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("ESCO_BATCH_SIZE", "  "));
        let config = load(&vars).expect("config should load");
        assert_eq!(config.ingestion.batch_size, 100);
    }
}
