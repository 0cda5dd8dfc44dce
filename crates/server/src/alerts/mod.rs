//! Threshold alerts: PostgreSQL store and the service used by the CLI and
//! the cron service.

mod service;
mod store;

pub use service::AlertService;
pub use store::PgAlertStore;
