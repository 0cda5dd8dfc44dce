//! Process-wide map of running pipeline executions.

use std::collections::HashMap;
use std::sync::Mutex;

use cadence_core::model::{ExecutionLog, RunStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

struct ActiveRun {
    pipeline_id: Uuid,
    status: RunStatus,
    progress: i32,
    started_at: DateTime<Utc>,
    logs: Vec<ExecutionLog>,
    cancel: CancellationToken,
}

/// Point-in-time copy of an active run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub execution_id: Uuid,
    pub pipeline_id: Uuid,
    pub status: RunStatus,
    pub progress: i32,
    pub started_at: DateTime<Utc>,
    pub logs: Vec<ExecutionLog>,
}

/// Entries are added on dispatch and removed when the run reaches a
/// terminal state. The lock is never held across an await.
#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<Uuid, ActiveRun>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut HashMap<Uuid, ActiveRun>) -> R) -> Option<R> {
        match self.runs.lock() {
            Ok(mut runs) => Some(f(&mut runs)),
            Err(_) => {
                warn!("run registry lock poisoned");
                None
            }
        }
    }

    pub fn register(
        &self,
        execution_id: Uuid,
        pipeline_id: Uuid,
        started_at: DateTime<Utc>,
        cancel: CancellationToken,
    ) {
        self.with(|runs| {
            runs.insert(
                execution_id,
                ActiveRun {
                    pipeline_id,
                    status: RunStatus::Processing,
                    progress: 0,
                    started_at,
                    logs: Vec::new(),
                    cancel,
                },
            )
        });
    }

    /// Progress never moves backwards.
    pub fn update(&self, execution_id: Uuid, progress: i32, status: RunStatus) {
        self.with(|runs| {
            if let Some(run) = runs.get_mut(&execution_id) {
                run.progress = run.progress.max(progress);
                run.status = status;
            }
        });
    }

    pub fn push_log(&self, execution_id: Uuid, entry: ExecutionLog) {
        self.with(|runs| {
            if let Some(run) = runs.get_mut(&execution_id) {
                run.logs.push(entry);
            }
        });
    }

    /// Fire the run's cancellation token. `false` when the id is unknown.
    pub fn cancel(&self, execution_id: Uuid) -> bool {
        self.with(|runs| match runs.get(&execution_id) {
            Some(run) => {
                run.cancel.cancel();
                true
            }
            None => false,
        })
        .unwrap_or(false)
    }

    pub fn remove(&self, execution_id: Uuid) {
        self.with(|runs| runs.remove(&execution_id));
    }

    pub fn snapshot(&self, execution_id: Uuid) -> Option<RunSnapshot> {
        self.with(|runs| {
            runs.get(&execution_id).map(|run| RunSnapshot {
                execution_id,
                pipeline_id: run.pipeline_id,
                status: run.status,
                progress: run.progress,
                started_at: run.started_at,
                logs: run.logs.clone(),
            })
        })
        .flatten()
    }

    pub fn is_running(&self, pipeline_id: Uuid) -> bool {
        self.with(|runs| runs.values().any(|r| r.pipeline_id == pipeline_id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.with(|runs| runs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_and_monotone_progress() {
        let reg = RunRegistry::new();
        let (exec, pipe) = (Uuid::new_v4(), Uuid::new_v4());
        reg.register(exec, pipe, Utc::now(), CancellationToken::new());
        assert!(reg.is_running(pipe));

        reg.update(exec, 40, RunStatus::Transforming);
        reg.update(exec, 10, RunStatus::Transforming);
        let snap = reg.snapshot(exec).unwrap();
        assert_eq!(snap.progress, 40);
        assert_eq!(snap.status, RunStatus::Transforming);

        reg.remove(exec);
        assert!(reg.snapshot(exec).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn cancel_fires_token() {
        let reg = RunRegistry::new();
        let token = CancellationToken::new();
        let exec = Uuid::new_v4();
        reg.register(exec, Uuid::new_v4(), Utc::now(), token.clone());
        assert!(reg.cancel(exec));
        assert!(token.is_cancelled());
        assert!(!reg.cancel(Uuid::new_v4()));
    }
}
