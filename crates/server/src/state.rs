//! Process-wide wiring: pool, admission queue, executors and services.

use std::sync::{Arc, Mutex};

use cadence_core::model::{ChannelType, ConnectionDirectory};
use cadence_core::{AuditSink, Config, TracingAuditSink};
use cadence_notify::{ChannelRegistry, Dispatcher, TemplateRenderer};
use cadence_pipeline::{Extractor, PipelineExecutor, RunRegistry, SqlLoader};
use cadence_queue::{AdmissionQueue, SqlSourceExecutor};
use cadence_rules::AlertEvaluator;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::alerts::{AlertService, PgAlertStore};
use crate::directory::PgConnectionDirectory;
use crate::handoff::HandoffNotifier;
use crate::pipelines::{PgPipelineStore, PipelineService};
use crate::reports::{
    spawn_delivery_log, FileArtifactWriter, Outbox, PgReportStore, ReportRunner, ReportService,
};

const OUTBOX_CAPACITY: usize = 256;

pub struct AppState {
    pub config: Config,
    pub pool: PgPool,
    pub queue: AdmissionQueue,
    pub alerts: Arc<AlertService>,
    pub pipelines: Arc<PipelineService>,
    pub reports: Arc<ReportService>,
    /// Root of every run's cancellation token.
    pub shutdown: CancellationToken,
    queue_task: Mutex<Option<JoinHandle<()>>>,
    delivery_task: Mutex<Option<JoinHandle<()>>>,
}

impl AppState {
    /// Wire every service against `pool` and start the admission queue
    /// dispatcher and the delivery outbox consumer.
    pub fn build(config: Config, pool: PgPool) -> Arc<Self> {
        let shutdown = CancellationToken::new();
        let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
        let connections: Arc<dyn ConnectionDirectory> =
            Arc::new(PgConnectionDirectory::new(pool.clone()));

        let queue = AdmissionQueue::new(Arc::new(SqlSourceExecutor::new()), &config.queue);
        let queue_task = queue.start(shutdown.clone());

        // ── Alerts ──
        let registry = ChannelRegistry::new(&config.notify, Arc::new(TemplateRenderer::new()))
            .with_external(ChannelType::Email, Arc::new(HandoffNotifier::new("email")))
            .with_external(ChannelType::Inapp, Arc::new(HandoffNotifier::new("inapp")));
        let alert_store = Arc::new(PgAlertStore::new(pool.clone()));
        let evaluator = Arc::new(AlertEvaluator::new(
            alert_store.clone(),
            queue.clone(),
            connections.clone(),
            Arc::new(Dispatcher::new(registry)),
            audit.clone(),
            config.scheduler.alert_timeout(),
        ));
        let alerts = Arc::new(AlertService::new(alert_store, evaluator, audit.clone()));

        // ── Pipelines ──
        let pipeline_store = Arc::new(PgPipelineStore::new(pool.clone()));
        let executor = Arc::new(PipelineExecutor::new(
            pipeline_store.clone(),
            Extractor::new(queue.clone(), connections.clone()),
            Arc::new(SqlLoader::new(pool.clone(), connections.clone())),
            Arc::new(RunRegistry::new()),
            config.scheduler.pipeline_timeout(),
        ));
        let pipelines = Arc::new(PipelineService::new(
            pipeline_store,
            executor,
            connections.clone(),
            audit.clone(),
        ));

        // ── Reports ──
        let report_store = Arc::new(PgReportStore::new(pool.clone()));
        let (outbox, outbox_rx) = Outbox::channel(OUTBOX_CAPACITY);
        let delivery_task = spawn_delivery_log(outbox_rx);
        let writer = FileArtifactWriter::new(
            config.reports.export_dir.clone(),
            queue.clone(),
            connections,
            report_store.clone(),
        );
        let runner = Arc::new(ReportRunner::new(
            report_store.clone(),
            Arc::new(writer),
            outbox,
            config.reports.clone(),
            config.scheduler.report_timeout(),
            audit.clone(),
        ));
        let reports = Arc::new(ReportService::new(
            report_store,
            runner,
            config.reports.retention_days,
            audit,
        ));

        info!("services wired");
        Arc::new(Self {
            config,
            pool,
            queue,
            alerts,
            pipelines,
            reports,
            shutdown,
            queue_task: Mutex::new(Some(queue_task)),
            delivery_task: Mutex::new(Some(delivery_task)),
        })
    }

    /// Cancel every run, stop the queue dispatcher and close the pool.
    pub async fn close(&self) {
        self.shutdown.cancel();
        if let Some(task) = take(&self.queue_task) {
            let _ = task.await;
        }
        // The outbox consumer only ends once every sender is gone.
        if let Some(task) = take(&self.delivery_task) {
            task.abort();
        }
        self.pool.close().await;
        info!("shutdown complete");
    }
}

fn take(slot: &Mutex<Option<JoinHandle<()>>>) -> Option<JoinHandle<()>> {
    match slot.lock() {
        Ok(mut slot) => slot.take(),
        Err(_) => {
            warn!("task slot lock poisoned");
            None
        }
    }
}
