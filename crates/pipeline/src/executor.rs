//! Staged pipeline execution: INIT, EXTRACT, TRANSFORM, VALIDATE, LOAD.
//!
//! Each stage checks the run's cancellation token on entry. Progress only
//! advances after a stage succeeds, so a failure leaves it where the
//! failing stage started.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cadence_core::model::{ExecutionLog, LogLevel, Pipeline, RunStatus};
use cadence_core::{schedule, ErrorKind, Row};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::extract::Extractor;
use crate::load::Loader;
use crate::quality::{self, Violation};
use crate::registry::{RunRegistry, RunSnapshot};
use crate::store::{PipelineStore, RunFinish};
use crate::transform;

/// Violations logged one by one before the rest are summarised.
const MAX_LOGGED_VIOLATIONS: usize = 100;

/// Days before retrying a pipeline whose next run could not be computed.
const SCHEDULE_RETRY_DAYS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stage {
    Init,
    Extract,
    Transform,
    Validate,
    Load,
    Complete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "INIT",
            Stage::Extract => "EXTRACT",
            Stage::Transform => "TRANSFORM",
            Stage::Validate => "VALIDATE",
            Stage::Load => "LOAD",
            Stage::Complete => "COMPLETE",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one run, as persisted and returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub pipeline_id: Uuid,
    pub status: RunStatus,
    pub progress: i32,
    pub rows_processed: i64,
    pub bytes_processed: i64,
    pub rows_loaded: u64,
    pub quality_violations: i32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub failed_stage: Option<Stage>,
    pub duration_ms: u64,
    pub logs: Vec<ExecutionLog>,
}

impl ExecutionResult {
    fn new(execution_id: Uuid, pipeline_id: Uuid) -> Self {
        Self {
            execution_id,
            pipeline_id,
            status: RunStatus::Processing,
            progress: 0,
            rows_processed: 0,
            bytes_processed: 0,
            rows_loaded: 0,
            quality_violations: 0,
            violations: Vec::new(),
            error: None,
            error_kind: None,
            failed_stage: None,
            duration_ms: 0,
            logs: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Mutable state threaded through the stages.
struct RunState {
    result: ExecutionResult,
    stage: Stage,
    /// Set once INIT has read the pipeline row.
    loaded: bool,
    /// `(cron, timezone)` of a scheduled pipeline.
    schedule: Option<(String, String)>,
}

pub struct PipelineExecutor {
    store: Arc<dyn PipelineStore>,
    extractor: Extractor,
    loader: Arc<dyn Loader>,
    registry: Arc<RunRegistry>,
    timeout: Duration,
}

impl PipelineExecutor {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        extractor: Extractor,
        loader: Arc<dyn Loader>,
        registry: Arc<RunRegistry>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            extractor,
            loader,
            registry,
            timeout,
        }
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Start a run in the background and hand back its execution id.
    pub fn spawn(
        self: &Arc<Self>,
        pipeline_id: Uuid,
        parent: &CancellationToken,
    ) -> (Uuid, JoinHandle<ExecutionResult>) {
        let execution_id = Uuid::new_v4();
        let this = Arc::clone(self);
        let parent = parent.clone();
        let handle =
            tokio::spawn(async move { this.execute(pipeline_id, execution_id, &parent).await });
        (execution_id, handle)
    }

    /// Cancel an active run. `false` when it is not running here.
    pub fn cancel(&self, execution_id: Uuid) -> bool {
        self.registry.cancel(execution_id)
    }

    pub fn status(&self, execution_id: Uuid) -> Option<RunSnapshot> {
        self.registry.snapshot(execution_id)
    }

    /// Run a pipeline to a terminal state. Never returns an error: failures
    /// are recorded on the result and in the run row.
    pub async fn execute(
        &self,
        pipeline_id: Uuid,
        execution_id: Uuid,
        parent: &CancellationToken,
    ) -> ExecutionResult {
        let cancel = parent.child_token();
        let started_at = Utc::now();
        let clock = Instant::now();

        self.registry
            .register(execution_id, pipeline_id, started_at, cancel.clone());
        if let Err(e) = self.store.begin_run(execution_id, pipeline_id, started_at).await {
            warn!(%execution_id, error = %e, "failed to record run start");
        }

        let mut run = RunState {
            result: ExecutionResult::new(execution_id, pipeline_id),
            stage: Stage::Init,
            loaded: false,
            schedule: None,
        };

        let outcome = match tokio::time::timeout(self.timeout, self.stages(&mut run, &cancel)).await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                cancel.cancel();
                Err(PipelineError::Cancelled)
            }
        };

        run.result.duration_ms = clock.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => {
                run.result.status = RunStatus::Completed;
                run.stage = Stage::Complete;
                let msg = format!(
                    "Pipeline execution completed in {}ms",
                    run.result.duration_ms
                );
                self.log(&mut run, LogLevel::Info, msg, None);
                info!(
                    %pipeline_id,
                    %execution_id,
                    rows = run.result.rows_processed,
                    duration_ms = run.result.duration_ms,
                    "pipeline run completed"
                );
            }
            Err(e) => self.fail(&mut run, e),
        }

        self.registry.remove(execution_id);
        self.finish(&run, started_at).await;
        run.result
    }

    async fn stages(
        &self,
        run: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        // ── INIT ──
        run.stage = Stage::Init;
        self.log(run, LogLevel::Info, "Loading pipeline configuration", None);
        let pipeline = self.store.get_pipeline(run.result.pipeline_id).await?;
        run.loaded = true;
        run.schedule = pipeline
            .schedule
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| (s.to_string(), pipeline.timezone.clone()));
        self.log(
            run,
            LogLevel::Info,
            format!(
                "Pipeline '{}' loaded, source type: {}",
                pipeline.name, pipeline.source_type
            ),
            None,
        );
        check(cancel)?;
        self.advance(run, 10, RunStatus::Extracting).await;

        // ── EXTRACT ──
        run.stage = Stage::Extract;
        self.log(
            run,
            LogLevel::Info,
            format!("Connecting to {} source", pipeline.source_type),
            None,
        );
        let extracted = self.extractor.extract(&pipeline, cancel).await?;
        run.result.rows_processed = extracted.rows.len() as i64;
        run.result.bytes_processed = extracted.bytes as i64;
        self.log(
            run,
            LogLevel::Info,
            format!(
                "Extracted {} rows ({} bytes)",
                extracted.rows.len(),
                extracted.bytes
            ),
            Some(json!({ "columns": extracted.columns })),
        );
        check(cancel)?;
        self.advance(run, 40, RunStatus::Transforming).await;

        // ── TRANSFORM ──
        run.stage = Stage::Transform;
        let rows = self.transform(run, &pipeline, extracted.rows, cancel).await?;
        check(cancel)?;
        self.advance(run, 65, RunStatus::Transforming).await;

        // ── VALIDATE ──
        run.stage = Stage::Validate;
        self.validate(run, &pipeline, &rows)?;
        check(cancel)?;
        self.advance(run, 75, RunStatus::Loading).await;

        // ── LOAD ──
        run.stage = Stage::Load;
        if rows.is_empty() {
            self.log(run, LogLevel::Info, "No rows to load, skipping", None);
        } else {
            self.log(
                run,
                LogLevel::Info,
                format!(
                    "Loading {} rows to destination ({})",
                    rows.len(),
                    pipeline.destination_type
                ),
                None,
            );
            let written = self.loader.load(&pipeline, &rows, cancel).await?;
            run.result.rows_loaded = written;
            self.log(
                run,
                LogLevel::Info,
                format!("Successfully loaded {written} rows to destination"),
                None,
            );
        }
        self.advance(run, 100, RunStatus::Completed).await;
        Ok(())
    }

    async fn transform(
        &self,
        run: &mut RunState,
        pipeline: &Pipeline,
        mut rows: Vec<Row>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, PipelineError> {
        let steps = transform::ordered(&pipeline.transformation_steps);
        if steps.is_empty() {
            self.log(
                run,
                LogLevel::Info,
                "No transformation steps configured, skipping",
                None,
            );
            return Ok(rows);
        }

        let total = steps.len();
        self.log(
            run,
            LogLevel::Info,
            format!("Applying {total} transformation steps"),
            None,
        );
        for (k, step) in steps.into_iter().enumerate() {
            check(cancel)?;
            self.log(
                run,
                LogLevel::Info,
                format!("Step {}/{}: {}", k + 1, total, step.step_type),
                Some(step.config.clone()),
            );
            rows = transform::apply_step(rows, step)?;
            let progress = 40 + (20 * (k as i32 + 1)) / total as i32;
            self.advance(run, progress, RunStatus::Transforming).await;
        }

        run.result.rows_processed = rows.len() as i64;
        self.log(
            run,
            LogLevel::Info,
            format!("Transformations complete. Rows after transforms: {}", rows.len()),
            None,
        );
        Ok(rows)
    }

    fn validate(
        &self,
        run: &mut RunState,
        pipeline: &Pipeline,
        rows: &[Row],
    ) -> Result<(), PipelineError> {
        if pipeline.quality_rules.is_empty() {
            return Ok(());
        }
        self.log(
            run,
            LogLevel::Info,
            format!("Running {} quality rules", pipeline.quality_rules.len()),
            None,
        );

        let violations = quality::validate(rows, &pipeline.quality_rules);
        run.result.quality_violations = violations.len() as i32;
        if violations.is_empty() {
            self.log(run, LogLevel::Info, "All quality rules passed", None);
            return Ok(());
        }

        self.log(
            run,
            LogLevel::Warn,
            format!("{} quality violations found", violations.len()),
            None,
        );
        for v in violations.iter().take(MAX_LOGGED_VIOLATIONS) {
            let details = serde_json::to_value(v).ok();
            self.log(run, LogLevel::Warn, v.message.clone(), details);
        }
        if violations.len() > MAX_LOGGED_VIOLATIONS {
            let rest = violations.len() - MAX_LOGGED_VIOLATIONS;
            self.log(
                run,
                LogLevel::Warn,
                format!("... and {rest} more violations"),
                None,
            );
        }

        let failure = quality::first_failure(&violations).map(|v| PipelineError::QualityFailure {
            rule_type: v.rule_type.to_string(),
            column: v.column.clone(),
        });
        run.result.violations = violations;
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn advance(&self, run: &mut RunState, progress: i32, status: RunStatus) {
        let progress = run.result.progress.max(progress);
        run.result.progress = progress;
        run.result.status = status;
        let execution_id = run.result.execution_id;
        self.registry.update(execution_id, progress, status);
        if let Err(e) = self.store.update_progress(execution_id, progress, status).await {
            warn!(%execution_id, error = %e, "failed to persist run progress");
        }
    }

    fn log(
        &self,
        run: &mut RunState,
        level: LogLevel,
        message: impl Into<String>,
        details: Option<Value>,
    ) {
        let entry = ExecutionLog {
            timestamp: Utc::now(),
            level,
            step: run.stage.as_str().to_string(),
            message: message.into(),
            details,
        };
        debug!(
            execution_id = %run.result.execution_id,
            step = %entry.step,
            "{}",
            entry.message
        );
        self.registry.push_log(run.result.execution_id, entry.clone());
        run.result.logs.push(entry);
    }

    /// Record the failure; the stored error names the failing stage.
    fn fail(&self, run: &mut RunState, e: PipelineError) {
        let message = format!("{}: {e}", run.stage);
        run.result.status = RunStatus::Failed;
        run.result.error = Some(message.clone());
        run.result.error_kind = Some(e.kind());
        run.result.failed_stage = Some(run.stage);
        self.log(
            run,
            LogLevel::Error,
            message.clone(),
            Some(json!({ "kind": e.kind() })),
        );
        error!(
            pipeline_id = %run.result.pipeline_id,
            execution_id = %run.result.execution_id,
            stage = %run.stage,
            error = %message,
            "pipeline run failed"
        );
    }

    async fn finish(&self, run: &RunState, started_at: DateTime<Utc>) {
        let finished_at = Utc::now();
        let next_run_at = next_run_after(run, finished_at);
        debug!(
            execution_id = %run.result.execution_id,
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            "recording run outcome"
        );

        let finish = RunFinish {
            execution_id: run.result.execution_id,
            pipeline_id: run.result.pipeline_id,
            status: run.result.status,
            progress: run.result.progress,
            finished_at,
            rows_processed: run.result.rows_processed,
            bytes_processed: run.result.bytes_processed,
            quality_violations: run.result.quality_violations,
            error: run.result.error.clone(),
            logs: run.result.logs.clone(),
            next_run_at,
        };
        if let Err(e) = self.store.finish_run(&finish).await {
            error!(execution_id = %finish.execution_id, error = %e, "failed to record run outcome");
        }
    }
}

/// `None` only for a loaded pipeline without a schedule. A run that never
/// read its schedule, or whose schedule yields no next fire, is retried a
/// day later rather than on every tick.
fn next_run_after(run: &RunState, finished_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let retry = finished_at + chrono::Duration::days(SCHEDULE_RETRY_DAYS);
    if !run.loaded {
        return Some(retry);
    }
    let (expr, tz) = run.schedule.as_ref()?;
    Some(schedule::next_run(expr, tz, finished_at).unwrap_or_else(|e| {
        warn!(pipeline_id = %run.result.pipeline_id, error = %e, "cannot compute next run, retrying in a day");
        retry
    }))
}

fn check(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}
