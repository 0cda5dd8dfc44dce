//! PostgreSQL persistence for pipelines and their runs.

use async_trait::async_trait;
use cadence_core::model::{Pipeline, PipelineRun, RunStatus};
use cadence_pipeline::{PipelineError, PipelineStore, RunFinish};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

const PIPELINE_COLUMNS: &str = "id, name, description, owner, source_type, source_config, \
    connection_ref, source_query, destination_type, destination_config, transformation_steps, \
    quality_rules, row_limit, schedule, timezone, is_active, last_run_at, last_status, \
    next_run_at, created_at, updated_at";

const RUN_COLUMNS: &str = "id, pipeline_id, status, progress, started_at, finished_at, \
    rows_processed, bytes_processed, quality_violations, error, logs";

#[derive(Clone)]
pub struct PgPipelineStore {
    pool: PgPool,
}

impl PgPipelineStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, p: &Pipeline) -> Result<(), PipelineError> {
        sqlx::query(&format!(
            "INSERT INTO pipelines ({PIPELINE_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)"
        ))
        .bind(p.id)
        .bind(&p.name)
        .bind(&p.description)
        .bind(&p.owner)
        .bind(p.source_type.as_str())
        .bind(Json(&p.source_config))
        .bind(p.connection_ref)
        .bind(&p.source_query)
        .bind(p.destination_type.as_str())
        .bind(Json(&p.destination_config))
        .bind(Json(&p.transformation_steps))
        .bind(Json(&p.quality_rules))
        .bind(p.row_limit)
        .bind(&p.schedule)
        .bind(&p.timezone)
        .bind(p.is_active)
        .bind(p.last_run_at)
        .bind(&p.last_status)
        .bind(p.next_run_at)
        .bind(p.created_at)
        .bind(p.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update(&self, p: &Pipeline) -> Result<(), PipelineError> {
        let result = sqlx::query(
            "UPDATE pipelines SET name = $2, description = $3, source_type = $4, \
             source_config = $5, connection_ref = $6, source_query = $7, destination_type = $8, \
             destination_config = $9, transformation_steps = $10, quality_rules = $11, \
             row_limit = $12, schedule = $13, timezone = $14, is_active = $15, next_run_at = $16, \
             updated_at = $17 WHERE id = $1",
        )
        .bind(p.id)
        .bind(&p.name)
        .bind(&p.description)
        .bind(p.source_type.as_str())
        .bind(Json(&p.source_config))
        .bind(p.connection_ref)
        .bind(&p.source_query)
        .bind(p.destination_type.as_str())
        .bind(Json(&p.destination_config))
        .bind(Json(&p.transformation_steps))
        .bind(Json(&p.quality_rules))
        .bind(p.row_limit)
        .bind(&p.schedule)
        .bind(&p.timezone)
        .bind(p.is_active)
        .bind(p.next_run_at)
        .bind(p.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(PipelineError::NotFound(p.id));
        }
        Ok(())
    }

    pub async fn delete(&self, id: Uuid, owner: &str) -> Result<(), PipelineError> {
        let result = sqlx::query("DELETE FROM pipelines WHERE id = $1 AND owner = $2")
            .bind(id)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(PipelineError::NotFound(id));
        }
        Ok(())
    }

    pub async fn list(&self, owner: &str) -> Result<Vec<Pipeline>, PipelineError> {
        let rows = sqlx::query_as::<_, Pipeline>(&format!(
            "SELECT {PIPELINE_COLUMNS} FROM pipelines WHERE owner = $1 ORDER BY created_at DESC"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Runs of one pipeline, newest first.
    pub async fn list_runs(
        &self,
        pipeline_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PipelineRun>, PipelineError> {
        let rows = sqlx::query_as::<_, PipelineRun>(&format!(
            "SELECT {RUN_COLUMNS} FROM pipeline_runs WHERE pipeline_id = $1 \
             ORDER BY started_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(pipeline_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>, PipelineError> {
        let run = sqlx::query_as::<_, PipelineRun>(&format!(
            "SELECT {RUN_COLUMNS} FROM pipeline_runs WHERE id = $1"
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }

    /// Scheduled, active pipelines whose next run is unset or reached.
    /// Pipelines without a schedule only run when started by hand.
    pub async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, PipelineError> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM pipelines WHERE is_active \
             AND schedule IS NOT NULL AND schedule <> '' \
             AND (next_run_at IS NULL OR next_run_at <= $1) \
             ORDER BY next_run_at ASC NULLS FIRST",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

#[async_trait]
impl PipelineStore for PgPipelineStore {
    async fn get_pipeline(&self, id: Uuid) -> Result<Pipeline, PipelineError> {
        sqlx::query_as::<_, Pipeline>(&format!(
            "SELECT {PIPELINE_COLUMNS} FROM pipelines WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(PipelineError::NotFound(id))
    }

    async fn begin_run(
        &self,
        execution_id: Uuid,
        pipeline_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO pipeline_runs (id, pipeline_id, status, progress, started_at) \
             VALUES ($1, $2, $3, 0, $4)",
        )
        .bind(execution_id)
        .bind(pipeline_id)
        .bind(RunStatus::Processing.as_str())
        .bind(started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_progress(
        &self,
        execution_id: Uuid,
        progress: i32,
        status: RunStatus,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            "UPDATE pipeline_runs SET progress = GREATEST(progress, $2), status = $3 WHERE id = $1",
        )
        .bind(execution_id)
        .bind(progress)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Run row, logs and the pipeline's run columns in one transaction.
    async fn finish_run(&self, finish: &RunFinish) -> Result<(), PipelineError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE pipeline_runs SET status = $2, progress = $3, finished_at = $4, \
             rows_processed = $5, bytes_processed = $6, quality_violations = $7, error = $8, \
             logs = $9 WHERE id = $1",
        )
        .bind(finish.execution_id)
        .bind(finish.status.as_str())
        .bind(finish.progress)
        .bind(finish.finished_at)
        .bind(finish.rows_processed)
        .bind(finish.bytes_processed)
        .bind(finish.quality_violations)
        .bind(&finish.error)
        .bind(Json(&finish.logs))
        .execute(&mut *tx)
        .await?;

        let last_status = if finish.status == RunStatus::Completed {
            "SUCCESS"
        } else {
            "FAILED"
        };
        sqlx::query(
            "UPDATE pipelines SET last_run_at = $2, last_status = $3, next_run_at = $4, \
             updated_at = $2 WHERE id = $1",
        )
        .bind(finish.pipeline_id)
        .bind(finish.finished_at)
        .bind(last_status)
        .bind(finish.next_run_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
