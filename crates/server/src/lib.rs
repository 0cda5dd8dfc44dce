//! Scheduler service: PostgreSQL stores, the alert / pipeline / report
//! services, the cron service and the maintenance jobs.

pub mod alerts;
pub mod cli;
pub mod cron;
pub mod db;
pub mod directory;
pub mod handoff;
pub mod inflight;
pub mod maintenance;
pub mod page;
pub mod pipelines;
pub mod reports;
pub mod state;
