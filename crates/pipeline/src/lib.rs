//! ETL pipeline execution: extract through the admission queue, apply
//! ordered transforms, validate, then load.

pub mod condition;
pub mod error;
pub mod executor;
pub mod extract;
pub mod load;
pub mod quality;
pub mod registry;
pub mod store;
pub mod transform;

pub use condition::evaluate_condition;
pub use error::PipelineError;
pub use executor::{ExecutionResult, PipelineExecutor, Stage};
pub use extract::{Extracted, Extractor};
pub use load::{Loader, SqlLoader};
pub use quality::Violation;
pub use registry::{RunRegistry, RunSnapshot};
pub use store::{PipelineStore, RunFinish};
