//! Report delivery. Email is sent by an external mailer that consumes
//! [`DeliveryIntent`]s from the outbox channel.

use std::path::PathBuf;

use cadence_core::model::{Recipient, RecipientRole, ScheduledReport};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use super::artifact::Artifact;
use super::types::ReportError;

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryIntent {
    pub report_id: Uuid,
    pub run_id: Uuid,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment: PathBuf,
    pub content_type: &'static str,
    pub download_url: String,
}

impl DeliveryIntent {
    pub fn recipients(&self) -> impl Iterator<Item = &String> {
        self.to.iter().chain(&self.cc).chain(&self.bcc)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SplitRecipients {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
}

pub fn split_recipients(recipients: &[Recipient]) -> SplitRecipients {
    let mut split = SplitRecipients::default();
    for r in recipients {
        let email = r.email.trim().to_string();
        if email.is_empty() {
            continue;
        }
        match r.role {
            RecipientRole::To => split.to.push(email),
            RecipientRole::Cc => split.cc.push(email),
            RecipientRole::Bcc => split.bcc.push(email),
        }
    }
    split
}

pub fn download_url(base_url: &str, run_id: Uuid) -> String {
    format!(
        "{}/api/scheduled-reports/runs/{run_id}/download",
        base_url.trim_end_matches('/')
    )
}

pub fn build_intent(
    report: &ScheduledReport,
    run_id: Uuid,
    artifact: &Artifact,
    base_url: &str,
) -> Result<DeliveryIntent, ReportError> {
    let SplitRecipients { to, cc, bcc } = split_recipients(&report.recipients);
    if to.is_empty() {
        return Err(ReportError::Delivery("No recipients configured".into()));
    }
    let subject = non_empty(report.subject.as_deref())
        .map(str::to_string)
        .unwrap_or_else(|| format!("[Scheduled Report] {}", report.name));
    let body = non_empty(report.message.as_deref())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Please find attached the scheduled report: {}", report.name));

    Ok(DeliveryIntent {
        report_id: report.id,
        run_id,
        to,
        cc,
        bcc,
        subject,
        body,
        attachment: artifact.path.clone(),
        content_type: artifact.format.content_type(),
        download_url: download_url(base_url, run_id),
    })
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Sending half of the delivery channel.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<DeliveryIntent>,
}

impl Outbox {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DeliveryIntent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub async fn send(&self, intent: DeliveryIntent) -> Result<(), ReportError> {
        self.tx
            .send(intent)
            .await
            .map_err(|e| ReportError::Delivery(format!("Failed to send email: {e}")))
    }
}

/// Drain the outbox into the log until every sender is dropped.
pub fn spawn_delivery_log(mut rx: mpsc::Receiver<DeliveryIntent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(intent) = rx.recv().await {
            info!(
                report_id = %intent.report_id,
                run_id = %intent.run_id,
                to = ?intent.to,
                cc = intent.cc.len(),
                bcc = intent.bcc.len(),
                subject = %intent.subject,
                attachment = %intent.attachment.display(),
                "report delivery handed off"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::model::ReportFormat;

    use crate::reports::test_support::report;

    fn artifact() -> Artifact {
        Artifact {
            path: PathBuf::from("/tmp/report_abcd1234.csv"),
            size: 10,
            format: ReportFormat::Csv,
        }
    }

    fn recipient(email: &str, role: RecipientRole) -> Recipient {
        Recipient {
            email: email.into(),
            role,
        }
    }

    #[test]
    fn splits_by_role_and_skips_blanks() {
        let split = split_recipients(&[
            recipient("a@example.com", RecipientRole::To),
            recipient(" ", RecipientRole::To),
            recipient("b@example.com", RecipientRole::Cc),
            recipient("c@example.com", RecipientRole::Bcc),
        ]);
        assert_eq!(split.to, vec!["a@example.com"]);
        assert_eq!(split.cc, vec!["b@example.com"]);
        assert_eq!(split.bcc, vec!["c@example.com"]);
    }

    #[test]
    fn defaults_subject_and_body() {
        let r = report();
        let run_id = Uuid::new_v4();
        let intent = build_intent(&r, run_id, &artifact(), "https://bi.example.com/").unwrap();
        assert_eq!(intent.subject, format!("[Scheduled Report] {}", r.name));
        assert!(intent.body.ends_with(&r.name));
        assert_eq!(intent.content_type, "text/csv");
        assert_eq!(
            intent.download_url,
            format!("https://bi.example.com/api/scheduled-reports/runs/{run_id}/download")
        );
    }

    #[test]
    fn cc_only_is_not_deliverable() {
        let mut r = report();
        r.recipients = vec![recipient("b@example.com", RecipientRole::Cc)];
        let err = build_intent(&r, Uuid::new_v4(), &artifact(), "http://x").unwrap_err();
        assert_eq!(err.to_string(), "No recipients configured");
    }

    #[tokio::test]
    async fn closed_outbox_fails_delivery() {
        let (outbox, rx) = Outbox::channel(1);
        drop(rx);
        let intent = build_intent(&report(), Uuid::new_v4(), &artifact(), "http://x").unwrap();
        let err = outbox.send(intent).await.unwrap_err();
        assert!(err.to_string().starts_with("Failed to send email:"));
    }
}
