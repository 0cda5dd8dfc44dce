//! ETL pipelines: PostgreSQL store, request validation and the service
//! wrapping the pipeline executor.

mod service;
mod store;
mod types;
mod validation;

pub use service::PipelineService;
pub use store::PgPipelineStore;
pub use types::{CreatePipelineRequest, QualityRuleRequest, RunView, UpdatePipelineRequest};
