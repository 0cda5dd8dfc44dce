//! Scheduled reports: store, artifact writer, delivery outbox, the run
//! lifecycle and the service on top.

mod artifact;
mod delivery;
mod runner;
mod service;
mod store;
mod types;
mod validation;

#[cfg(test)]
mod test_support;

pub use artifact::{Artifact, ArtifactRequest, ArtifactWriter, FileArtifactWriter};
pub use delivery::{spawn_delivery_log, DeliveryIntent, Outbox};
pub use runner::{CleanupSummary, ReportRunner};
pub use service::ReportService;
pub use store::{PgReportStore, ReportStore};
pub use types::{
    CreateReportRequest, PreviewRequest, PreviewResponse, ReportError, TriggerResponse,
    UpdateReportRequest,
};
