//! Per-item dispatch guard shared by the due-work jobs.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::warn;
use uuid::Uuid;

/// Ids with a run currently dispatched. A tick skips ids it cannot claim.
#[derive(Clone, Default)]
pub struct InFlight {
    ids: Arc<Mutex<HashSet<Uuid>>>,
}

/// Held by the dispatched task; releases the id on drop.
pub struct Claim {
    id: Uuid,
    ids: Arc<Mutex<HashSet<Uuid>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when `id` is already running.
    pub fn claim(&self, id: Uuid) -> Option<Claim> {
        let mut ids = match self.ids.lock() {
            Ok(ids) => ids,
            Err(_) => {
                warn!("in-flight set lock poisoned");
                return None;
            }
        };
        ids.insert(id).then(|| Claim {
            id,
            ids: Arc::clone(&self.ids),
        })
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.ids.lock().map(|ids| ids.contains(&id)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().map(|ids| ids.len()).unwrap_or(0)
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if let Ok(mut ids) = self.ids.lock() {
            ids.remove(&self.id);
        }
    }
}
