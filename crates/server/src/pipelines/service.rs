//! Pipeline CRUD, run control and the due-pipeline job.

use std::sync::Arc;

use cadence_core::model::{
    ConnectionDirectory, DestinationType, Pipeline, PipelineRun, QualityRule, SourceType,
};
use cadence_core::schedule::next_run;
use cadence_core::{AuditSink, ValidationResult};
use cadence_pipeline::{ExecutionResult, PipelineError, PipelineExecutor, PipelineStore};
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::PgPipelineStore;
use super::types::{CreatePipelineRequest, QualityRuleRequest, RunView, UpdatePipelineRequest};
use super::validation::{validate_create, validate_update};
use crate::inflight::InFlight;

pub struct PipelineService {
    store: Arc<PgPipelineStore>,
    executor: Arc<PipelineExecutor>,
    connections: Arc<dyn ConnectionDirectory>,
    audit: Arc<dyn AuditSink>,
}

impl PipelineService {
    pub fn new(
        store: Arc<PgPipelineStore>,
        executor: Arc<PipelineExecutor>,
        connections: Arc<dyn ConnectionDirectory>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            executor,
            connections,
            audit,
        }
    }

    // ── CRUD ────────────────────────────────────────────────────────

    pub async fn create_pipeline(
        &self,
        owner: &str,
        req: CreatePipelineRequest,
    ) -> Result<Pipeline, PipelineError> {
        rejected(validate_create(&req))?;
        if let Some(id) = req.connection_ref {
            self.connections.get(id).await?;
        }
        let pipeline = build_pipeline(owner, req, Utc::now())?;
        self.store.insert(&pipeline).await?;
        info!(pipeline_id = %pipeline.id, name = %pipeline.name, "pipeline created");
        self.audit.record(
            "pipeline.created",
            &json!({"pipeline_id": pipeline.id, "owner": owner}),
        );
        Ok(pipeline)
    }

    pub async fn update_pipeline(
        &self,
        id: Uuid,
        owner: &str,
        req: UpdatePipelineRequest,
    ) -> Result<Pipeline, PipelineError> {
        rejected(validate_update(&req))?;
        let mut pipeline = self.get_pipeline(id, owner).await?;
        if let Some(conn) = req.connection_ref {
            self.connections.get(conn).await?;
        }
        apply_update(&mut pipeline, req, Utc::now())?;
        self.store.update(&pipeline).await?;
        self.audit
            .record("pipeline.updated", &json!({"pipeline_id": id, "owner": owner}));
        Ok(pipeline)
    }

    pub async fn delete_pipeline(&self, id: Uuid, owner: &str) -> Result<(), PipelineError> {
        self.store.delete(id, owner).await?;
        info!(pipeline_id = %id, "pipeline deleted");
        self.audit
            .record("pipeline.deleted", &json!({"pipeline_id": id, "owner": owner}));
        Ok(())
    }

    pub async fn get_pipeline(&self, id: Uuid, owner: &str) -> Result<Pipeline, PipelineError> {
        let pipeline = self.store.get_pipeline(id).await?;
        if pipeline.owner != owner {
            return Err(PipelineError::NotFound(id));
        }
        Ok(pipeline)
    }

    pub async fn list_pipelines(&self, owner: &str) -> Result<Vec<Pipeline>, PipelineError> {
        self.store.list(owner).await
    }

    pub async fn list_runs(
        &self,
        pipeline_id: Uuid,
        owner: &str,
        page: Option<i64>,
        page_size: Option<i64>,
    ) -> Result<Vec<PipelineRun>, PipelineError> {
        self.get_pipeline(pipeline_id, owner).await?;
        let (limit, offset) = cadence_rules::request::page_window(page, page_size);
        self.store.list_runs(pipeline_id, limit, offset).await
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<PipelineRun, PipelineError> {
        self.store
            .get_run(run_id)
            .await?
            .ok_or(PipelineError::NotFound(run_id))
    }

    // ── Runs ────────────────────────────────────────────────────────

    /// Run to a terminal state under the pipeline deadline.
    pub async fn execute_pipeline(
        &self,
        pipeline_id: Uuid,
        execution_id: Uuid,
        parent: &CancellationToken,
    ) -> ExecutionResult {
        self.executor.execute(pipeline_id, execution_id, parent).await
    }

    /// Spawn a run and return its execution id.
    pub async fn start_pipeline(
        &self,
        pipeline_id: Uuid,
        parent: &CancellationToken,
    ) -> Result<Uuid, PipelineError> {
        self.store.get_pipeline(pipeline_id).await?;
        if self.executor.registry().is_running(pipeline_id) {
            return Err(PipelineError::Config(format!(
                "pipeline {pipeline_id} is already running"
            )));
        }
        let (execution_id, _handle) = self.executor.spawn(pipeline_id, parent);
        info!(%pipeline_id, %execution_id, "pipeline run started");
        Ok(execution_id)
    }

    /// `false` when the run is not active in this process.
    pub fn cancel_run(&self, execution_id: Uuid) -> bool {
        let cancelled = self.executor.cancel(execution_id);
        if cancelled {
            info!(%execution_id, "pipeline run cancelled");
        }
        cancelled
    }

    pub async fn run_status(&self, execution_id: Uuid) -> Result<RunView, PipelineError> {
        if let Some(snapshot) = self.executor.status(execution_id) {
            return Ok(RunView::Live(snapshot));
        }
        self.get_run(execution_id).await.map(RunView::Stored)
    }

    /// Spawn a run for every due pipeline not already running.
    pub async fn process_due_pipelines(
        &self,
        now: DateTime<Utc>,
        guard: &InFlight,
        parent: &CancellationToken,
    ) -> Result<usize, PipelineError> {
        let due = self.store.find_due(now).await?;
        let mut dispatched = 0;
        for pipeline_id in due {
            if self.executor.registry().is_running(pipeline_id) {
                debug!(%pipeline_id, "pipeline already running, skipping");
                continue;
            }
            let Some(claim) = guard.claim(pipeline_id) else {
                continue;
            };
            let executor = Arc::clone(&self.executor);
            let parent = parent.clone();
            tokio::spawn(async move {
                let _claim = claim;
                let result = executor.execute(pipeline_id, Uuid::new_v4(), &parent).await;
                if result.succeeded() {
                    debug!(%pipeline_id, rows = result.rows_processed, "scheduled pipeline completed");
                } else {
                    warn!(
                        category = "cron_pipelines",
                        %pipeline_id,
                        error = result.error.as_deref().unwrap_or_default(),
                        "scheduled pipeline failed"
                    );
                }
            });
            dispatched += 1;
        }
        Ok(dispatched)
    }
}

// ── Pure helpers ────────────────────────────────────────────────────

fn rejected(result: ValidationResult) -> Result<(), PipelineError> {
    if result.valid {
        Ok(())
    } else {
        Err(PipelineError::Config(result.summary()))
    }
}

fn rules(requests: &[QualityRuleRequest]) -> Result<Vec<QualityRule>, PipelineError> {
    requests
        .iter()
        .enumerate()
        .map(|(i, r)| {
            r.to_rule(i)
                .ok_or_else(|| PipelineError::Config(format!("quality_rules[{i}] is invalid")))
        })
        .collect()
}

fn schedule_or_none(schedule: Option<String>) -> Option<String> {
    schedule
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn compute_next_run(
    schedule: Option<&str>,
    timezone: &str,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, PipelineError> {
    match schedule {
        Some(s) => Ok(Some(next_run(s, timezone, now)?)),
        None => Ok(None),
    }
}

pub fn build_pipeline(
    owner: &str,
    req: CreatePipelineRequest,
    now: DateTime<Utc>,
) -> Result<Pipeline, PipelineError> {
    let source_type: SourceType = req.source_type.parse()?;
    let destination_type: DestinationType = req.destination_type.parse()?;
    let timezone = req
        .timezone
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "UTC".to_string());
    let schedule = schedule_or_none(req.schedule);
    let next_run_at = compute_next_run(schedule.as_deref(), &timezone, now)?;

    Ok(Pipeline {
        id: Uuid::new_v4(),
        name: req.name.trim().to_string(),
        description: req.description,
        owner: owner.to_string(),
        source_type,
        source_config: req.source_config,
        connection_ref: req.connection_ref,
        source_query: req.source_query,
        destination_type,
        destination_config: req.destination_config,
        transformation_steps: req.transformation_steps,
        quality_rules: rules(&req.quality_rules)?,
        row_limit: req.row_limit.unwrap_or(0),
        schedule,
        timezone,
        is_active: true,
        last_run_at: None,
        last_status: None,
        next_run_at,
        created_at: now,
        updated_at: now,
    })
}

pub fn apply_update(
    p: &mut Pipeline,
    req: UpdatePipelineRequest,
    now: DateTime<Utc>,
) -> Result<(), PipelineError> {
    let reschedule =
        req.schedule.is_some() || req.timezone.is_some() || req.is_active == Some(true);

    if let Some(name) = req.name {
        p.name = name.trim().to_string();
    }
    if let Some(description) = req.description {
        p.description = Some(description);
    }
    if let Some(t) = req.source_type {
        p.source_type = t.parse()?;
    }
    if let Some(cfg) = req.source_config {
        p.source_config = cfg;
    }
    if let Some(conn) = req.connection_ref {
        p.connection_ref = Some(conn);
    }
    if let Some(query) = req.source_query {
        p.source_query = Some(query);
    }
    if let Some(t) = req.destination_type {
        p.destination_type = t.parse()?;
    }
    if let Some(cfg) = req.destination_config {
        p.destination_config = cfg;
    }
    if let Some(steps) = req.transformation_steps {
        p.transformation_steps = steps;
    }
    if let Some(r) = req.quality_rules {
        p.quality_rules = rules(&r)?;
    }
    if let Some(limit) = req.row_limit {
        p.row_limit = limit;
    }
    if let Some(schedule) = req.schedule {
        p.schedule = schedule_or_none(Some(schedule));
    }
    if let Some(tz) = req.timezone {
        p.timezone = if tz.trim().is_empty() {
            "UTC".to_string()
        } else {
            tz.trim().to_string()
        };
    }
    if let Some(active) = req.is_active {
        p.is_active = active;
    }
    if reschedule {
        p.next_run_at = compute_next_run(p.schedule.as_deref(), &p.timezone, now)?;
    }
    p.updated_at = now;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::model::{QualityRuleType, RuleSeverity, WriteMode};
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn request() -> CreatePipelineRequest {
        serde_json::from_value(json!({
            "name": "  orders hourly ",
            "source_type": "postgres",
            "source_config": {"host": "db.internal"},
            "source_query": "SELECT * FROM orders",
            "destination_type": "internal_raw",
            "quality_rules": [{"column": "id", "rule_type": "UNIQUE", "severity": "FAIL"}],
            "schedule": "1h"
        }))
        .unwrap()
    }

    #[test]
    fn build_applies_defaults() {
        let p = build_pipeline("ops", request(), t0()).unwrap();
        assert_eq!(p.name, "orders hourly");
        assert_eq!(p.source_type, SourceType::Postgres);
        assert_eq!(p.destination_type, DestinationType::InternalRaw);
        assert_eq!(p.destination_config.write_mode, WriteMode::Append);
        assert_eq!(p.timezone, "UTC");
        assert_eq!(p.effective_row_limit(), 100_000);
        assert_eq!(p.next_run_at, Some(t0() + Duration::hours(1)));
        assert_eq!(p.quality_rules[0].rule_type, QualityRuleType::Unique);
        assert_eq!(p.quality_rules[0].severity, RuleSeverity::Fail);
    }

    #[test]
    fn unscheduled_pipeline_has_no_next_run() {
        let mut req = request();
        req.schedule = Some("  ".into());
        let p = build_pipeline("ops", req, t0()).unwrap();
        assert!(p.schedule.is_none());
        assert!(p.next_run_at.is_none());
    }

    #[test]
    fn clearing_the_schedule_clears_next_run() {
        let mut p = build_pipeline("ops", request(), t0()).unwrap();
        let req = UpdatePipelineRequest {
            schedule: Some(String::new()),
            ..Default::default()
        };
        apply_update(&mut p, req, t0()).unwrap();
        assert!(p.schedule.is_none());
        assert!(p.next_run_at.is_none());
    }

    #[test]
    fn update_keeps_next_run_for_unrelated_fields() {
        let mut p = build_pipeline("ops", request(), t0()).unwrap();
        let req = UpdatePipelineRequest {
            row_limit: Some(500),
            ..Default::default()
        };
        apply_update(&mut p, req, t0() + Duration::minutes(10)).unwrap();
        assert_eq!(p.row_limit, 500);
        assert_eq!(p.next_run_at, Some(t0() + Duration::hours(1)));
    }

    #[test]
    fn invalid_create_is_a_config_error() {
        let mut req = request();
        req.source_type = "ORACLE".into();
        let err = rejected(validate_create(&req)).unwrap_err();
        assert!(matches!(err, PipelineError::Config(ref m) if m.contains("source_type")));
    }
}
