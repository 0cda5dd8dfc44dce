//! Query admission for every source query the scheduler runs.

pub mod admission;
pub mod error;
pub mod executor;
pub mod request;
pub mod source;

pub use admission::{AdmissionQueue, QueueStats, Ticket};
pub use error::QueueError;
pub use executor::QueryExecutor;
pub use request::{Priority, QueryRequest, QueryResult};
pub use source::SqlSourceExecutor;
