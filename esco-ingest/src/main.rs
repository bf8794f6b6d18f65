use std::sync::Arc;

use esco_rs::driver::neo4j::Neo4jDriver;
use esco_rs::embedder::openai::OpenAiEmbedder;
use esco_rs::{EscoConfig, GraphStore, IngestionOutcome, Orchestrator};
use tracing::{error, info, warn};

/// Exit code for anything an operator has to fix before a retry can succeed.
const PREREQUISITES_FAILED: i32 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("esco_ingest=info".parse()?)
                .add_directive("esco_rs=info".parse()?),
        )
        .json()
        .init();

    info!("esco-ingest starting");

    // ── Config ────────────────────────────────────────────────────────────────
    let config = match EscoConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(PREREQUISITES_FAILED);
        }
    };

    info!(
        data_dir = %config.data_dir.display(),
        neo4j_uri = %config.neo4j_uri,
        model = %config.embedding_model,
        embedding_dim = config.embedding_dim,
        embeddings_enabled = config.ingestion.embeddings_enabled,
        force = config.ingestion.force_reingest,
        "configuration loaded"
    );

    // ── Store + embedder ──────────────────────────────────────────────────────
    let store = match Neo4jDriver::connect(&config).await {
        Ok(driver) => Arc::new(driver),
        Err(e) => {
            error!(error = %e, "cannot connect to Neo4j");
            std::process::exit(PREREQUISITES_FAILED);
        }
    };
    let embedder = Arc::new(OpenAiEmbedder::from_config(&config));

    // ── Run ───────────────────────────────────────────────────────────────────
    let orchestrator = Orchestrator::new(Arc::clone(&store), embedder, &config);
    let outcome = orchestrator.run().await;

    match &outcome {
        IngestionOutcome::Completed { run_id, .. } => info!(%run_id, "ingestion completed"),
        IngestionOutcome::AlreadyCompleted { run_id } => {
            info!(%run_id, "nothing to do: taxonomy already ingested")
        }
        IngestionOutcome::ActiveElsewhere {
            run_id,
            last_heartbeat_at,
        } => warn!(%run_id, %last_heartbeat_at, "another ingestion is in progress"),
        IngestionOutcome::PrerequisitesFailed(report) => {
            for check in report.failures() {
                error!(check = %check.name, detail = check.detail.as_deref().unwrap_or(""), "prerequisite failed");
            }
        }
        IngestionOutcome::Failed { run_id, error, .. } => {
            error!(run_id = ?run_id, %error, "ingestion failed")
        }
        IngestionOutcome::TimedOut { run_id } => error!(run_id = ?run_id, "time budget exceeded"),
    }

    if let Err(e) = store.close().await {
        warn!(error = %e, "error closing store");
    }

    let code = outcome.exit_code();
    info!(exit_code = code, "esco-ingest finished");
    std::process::exit(code);
}
