use async_trait::async_trait;
use cadence_core::model::{ExecutionLog, Pipeline, RunStatus};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::PipelineError;

/// Terminal record of one run, written in a single transaction together
/// with the pipeline's `last_run_at`, `last_status` and `next_run_at`.
#[derive(Debug, Clone)]
pub struct RunFinish {
    pub execution_id: Uuid,
    pub pipeline_id: Uuid,
    pub status: RunStatus,
    pub progress: i32,
    pub finished_at: DateTime<Utc>,
    pub rows_processed: i64,
    pub bytes_processed: i64,
    pub quality_violations: i32,
    pub error: Option<String>,
    pub logs: Vec<ExecutionLog>,
    /// `None` when the pipeline has no schedule.
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Durable state used by the executor.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn get_pipeline(&self, id: Uuid) -> Result<Pipeline, PipelineError>;

    /// Insert the run row if it does not exist yet.
    async fn begin_run(
        &self,
        execution_id: Uuid,
        pipeline_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<(), PipelineError>;

    async fn update_progress(
        &self,
        execution_id: Uuid,
        progress: i32,
        status: RunStatus,
    ) -> Result<(), PipelineError>;

    async fn finish_run(&self, finish: &RunFinish) -> Result<(), PipelineError>;
}
