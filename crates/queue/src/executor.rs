use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::request::{QueryRequest, QueryResult};

/// Runs one admitted query.
///
/// Implementations report SQL failures through [`QueryResult::error`] and
/// should stop at their next await point once `cancel` fires.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, request: &QueryRequest, cancel: &CancellationToken) -> QueryResult;
}
