//! Background jobs: due-work dispatch on a fixed tick plus hourly and
//! daily maintenance, each with a manual trigger.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadence_core::schedule::CronExpr;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::inflight::InFlight;
use crate::maintenance;
use crate::reports::CleanupSummary;
use crate::state::AppState;

const HOURLY: &str = "0 * * * *";
const IDLE_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Job {
    Alerts,
    Reports,
    Pipelines,
    Shares,
    Tokens,
    Views,
    Budgets,
    Cleanup,
}

impl Job {
    /// Log category used for this job's failures.
    pub fn category(&self) -> &'static str {
        match self {
            Job::Alerts => "cron_alerts",
            Job::Reports => "cron_scheduled_reports",
            Job::Pipelines => "cron_pipelines",
            Job::Shares => "cron_shares_cleanup",
            Job::Tokens => "cron_embed_tokens_cleanup",
            Job::Views => "cron_view_refresh",
            Job::Budgets => "cron_budget_reset",
            Job::Cleanup => "cron_report_cleanup",
        }
    }
}

pub struct CronService {
    state: Arc<AppState>,
    report_guard: InFlight,
    pipeline_guard: InFlight,
    stop: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CronService {
    pub fn new(state: Arc<AppState>) -> Arc<Self> {
        let stop = state.shutdown.child_token();
        Arc::new(Self {
            state,
            report_guard: InFlight::new(),
            pipeline_guard: InFlight::new(),
            stop,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn every job loop.
    pub fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let scheduler = &self.state.config.scheduler;
        let tick = Duration::from_secs(scheduler.tick_secs.max(1));
        let hourly = CronExpr::parse(HOURLY)?;
        let daily = CronExpr::parse(&format!("0 {} * * *", scheduler.report_cleanup_hour))?;
        let tz = scheduler.tz();

        let mut handles = vec![
            self.spawn_ticking(Job::Alerts, tick),
            self.spawn_ticking(Job::Reports, tick),
            self.spawn_ticking(Job::Pipelines, tick),
        ];
        for job in [Job::Shares, Job::Tokens, Job::Views, Job::Budgets] {
            handles.push(self.spawn_cron(job, hourly.clone(), tz));
        }
        handles.push(self.spawn_cron(Job::Cleanup, daily, tz));

        match self.tasks.lock() {
            Ok(mut tasks) => tasks.extend(handles),
            Err(_) => anyhow::bail!("cron task list lock poisoned"),
        }
        info!(
            tick_secs = tick.as_secs(),
            report_cleanup_hour = scheduler.report_cleanup_hour,
            timezone = %tz,
            "cron service started"
        );
        Ok(())
    }

    /// Stop the loops. Runs already dispatched are cancelled through the
    /// shared shutdown token, not here.
    pub async fn stop(&self) {
        self.stop.cancel();
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            let _ = task.await;
        }
        info!("cron service stopped");
    }

    fn spawn_ticking(self: &Arc<Self>, job: Job, every: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = this.stop.cancelled() => break,
                    _ = tokio::time::sleep(every) => {}
                }
                this.tick(job).await;
            }
            debug!(?job, "job loop stopped");
        })
    }

    fn spawn_cron(self: &Arc<Self>, job: Job, expr: CronExpr, tz: Tz) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let Some(wait) = until_next(&expr, tz, Utc::now()) else {
                    warn!(category = job.category(), cron = %expr, "no future fire time, job disabled");
                    break;
                };
                tokio::select! {
                    _ = this.stop.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                this.tick(job).await;
            }
            debug!(?job, "job loop stopped");
        })
    }

    async fn tick(&self, job: Job) {
        match self.run_job(job).await {
            Ok(summary) => debug!(category = job.category(), "{summary}"),
            Err(e) => warn!(category = job.category(), error = %e, "cron job failed"),
        }
    }

    /// Run one job once and describe what it did.
    pub async fn run_job(&self, job: Job) -> anyhow::Result<String> {
        match job {
            Job::Alerts => self.run_alerts_now().await.map(|n| format!("{n} alert checks started")),
            Job::Reports => self.run_reports_now().await.map(|n| format!("{n} reports started")),
            Job::Pipelines => self
                .run_pipelines_now()
                .await
                .map(|n| format!("{n} pipeline runs started")),
            Job::Shares => self.run_shares_cleanup_now().await.map(|n| format!("{n} shares expired")),
            Job::Tokens => self
                .run_embed_tokens_cleanup_now()
                .await
                .map(|n| format!("{n} expired embed tokens")),
            Job::Views => self.run_view_refresh_now().await.map(|()| "views refreshed".to_string()),
            Job::Budgets => self.run_budget_reset_now().await.map(|()| "budgets reset".to_string()),
            Job::Cleanup => self.run_report_cleanup_now().await.map(|s| {
                format!("{} report runs and {} files removed", s.runs_deleted, s.files_removed)
            }),
        }
    }

    // ── Manual triggers ──────────────────────────────────────────────

    pub async fn run_alerts_now(&self) -> anyhow::Result<usize> {
        let n = self
            .state
            .alerts
            .process_due_alerts(Utc::now(), &self.state.shutdown)
            .await?;
        Ok(n)
    }

    pub async fn run_reports_now(&self) -> anyhow::Result<usize> {
        let n = self
            .state
            .reports
            .process_due_reports(Utc::now(), &self.report_guard, &self.state.shutdown)
            .await?;
        Ok(n)
    }

    pub async fn run_pipelines_now(&self) -> anyhow::Result<usize> {
        let n = self
            .state
            .pipelines
            .process_due_pipelines(Utc::now(), &self.pipeline_guard, &self.state.shutdown)
            .await?;
        let queue = self.state.queue.stats();
        debug!(pending = queue.pending, in_flight = queue.in_flight, "admission queue");
        Ok(n)
    }

    pub async fn run_shares_cleanup_now(&self) -> anyhow::Result<u64> {
        let n = maintenance::expire_shares(&self.state.pool).await?;
        if n > 0 {
            info!(expired = n, "expired shares");
        }
        Ok(n)
    }

    pub async fn run_embed_tokens_cleanup_now(&self) -> anyhow::Result<i64> {
        let n = maintenance::count_expired_embed_tokens(&self.state.pool).await?;
        if n > 0 {
            info!(expired = n, "expired embed tokens found");
        }
        Ok(n)
    }

    pub async fn run_view_refresh_now(&self) -> anyhow::Result<()> {
        maintenance::refresh_views(&self.state.pool).await?;
        Ok(())
    }

    pub async fn run_budget_reset_now(&self) -> anyhow::Result<()> {
        maintenance::reset_budgets(&self.state.pool).await?;
        Ok(())
    }

    pub async fn run_report_cleanup_now(&self) -> anyhow::Result<CleanupSummary> {
        Ok(self.state.reports.cleanup_old_reports(Utc::now()).await?)
    }

    /// Wait until every dispatched alert check, report and pipeline run
    /// has finished.
    pub async fn wait_idle(&self) {
        while self.state.alerts.running() + self.report_guard.len() + self.pipeline_guard.len() > 0 {
            tokio::time::sleep(IDLE_POLL).await;
        }
    }
}

/// Time from `now` until the next fire of `expr` read as wall-clock time
/// in `tz`.
pub fn until_next(expr: &CronExpr, tz: Tz, now: DateTime<Utc>) -> Option<Duration> {
    let next = expr.next_after(&now.with_timezone(&tz))?;
    (next.with_timezone(&Utc) - now).to_std().ok()
}
