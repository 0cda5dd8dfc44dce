//! Slack and Teams incoming-webhook notifiers.
//!
//! Both accept a minimal `{"text": ...}` payload.

use serde::Deserialize;

use crate::retry::RetryPolicy;
use crate::traits::{Notification, Notifier, NotifyError};
use crate::webhook::{expand_env, http_client};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Slack,
    Teams,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Slack => "slack",
            ChatKind::Teams => "teams",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatConfig {
    pub webhook_url: String,
}

#[derive(Debug)]
pub struct ChatNotifier {
    kind: ChatKind,
    webhook_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl ChatNotifier {
    pub fn new(kind: ChatKind, config: ChatConfig, retry: RetryPolicy) -> Result<Self, NotifyError> {
        let webhook_url = expand_env(config.webhook_url.trim())?;
        if webhook_url.is_empty() {
            return Err(NotifyError::Config(format!(
                "{} channel needs a webhook_url",
                kind.as_str()
            )));
        }
        Ok(Self {
            kind,
            webhook_url,
            client: http_client()?,
            retry,
        })
    }

    fn payload(&self, notification: &Notification) -> serde_json::Value {
        let text = match self.kind {
            ChatKind::Slack => format!("*{}*\n{}", notification.subject, notification.body),
            ChatKind::Teams => format!("**{}**\n\n{}", notification.subject, notification.body),
        };
        serde_json::json!({ "text": text })
    }

    async fn post(&self, payload: &serde_json::Value) -> Result<(), NotifyError> {
        let response = self.client.post(&self.webhook_url).json(payload).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait::async_trait]
impl Notifier for ChatNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = self.payload(notification);
        self.retry
            .run(self.kind.as_str(), || self.post(&payload))
            .await?;
        tracing::debug!(channel = self.kind.as_str(), "chat notification delivered");
        Ok(())
    }

    fn channel_name(&self) -> &str {
        self.kind.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templating::{sample_context, TemplateRenderer};
    use std::time::Duration;

    fn notifier(kind: ChatKind) -> ChatNotifier {
        ChatNotifier::new(
            kind,
            ChatConfig {
                webhook_url: "https://hooks.example.com/x".into(),
            },
            RetryPolicy::new(2, Duration::from_millis(5)),
        )
        .unwrap()
    }

    #[test]
    fn payload_is_a_single_text_field() {
        let n = TemplateRenderer::new().notification(sample_context()).unwrap();
        let slack = notifier(ChatKind::Slack).payload(&n);
        let obj = slack.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert!(obj["text"]
            .as_str()
            .unwrap()
            .starts_with("*[CRITICAL] Alert triggered: Queue depth*\n"));

        let teams = notifier(ChatKind::Teams).payload(&n);
        assert!(teams["text"].as_str().unwrap().starts_with("**[CRITICAL]"));
    }

    #[test]
    fn missing_url_is_a_config_error() {
        let err = ChatNotifier::new(
            ChatKind::Teams,
            ChatConfig::default(),
            RetryPolicy::new(2, Duration::ZERO),
        )
        .unwrap_err();
        assert!(err.to_string().contains("teams channel needs a webhook_url"));
        assert_eq!(notifier(ChatKind::Slack).channel_name(), "slack");
    }
}
