//! Ingestion pipeline.
//!
//! A run moves through these steps:
//! 1. **Observe** the latest run record (completed, active, stale, failed)
//! 2. **Prerequisites**: store reachable, schema online, input files valid
//! 3. **Lease**: start an IN_PROGRESS run, inheriting checkpoints when resuming
//! 4. **Stages**: one per file, entity kinds first, relations once their
//!    endpoints' stages are checkpointed
//! 5. **Verify** stored counts and close the run with its summary

pub mod orchestrator;
pub mod prerequisites;
pub mod run;
pub mod stages;
pub mod state;
pub mod summary;
pub mod writer;

pub use orchestrator::{IngestionOutcome, Orchestrator};
pub use prerequisites::{PrerequisiteCheck, PrerequisiteReport};
pub use run::{IngestionRun, RunStatus};
pub use stages::Stage;
pub use state::{LeaseOutcome, Observation, StateManager};
pub use summary::{RunSummary, StageSummary};
pub use writer::{dedupe_last_wins, BatchWriter, WriteResult};
