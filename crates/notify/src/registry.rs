//! Builds a notifier for each channel type.
//!
//! Webhook, Slack and Teams notifiers are built from the channel's stored
//! config. Email and in-app delivery belong to external services, which
//! register their own [`Notifier`] implementations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cadence_core::config::NotifyConfig;
use cadence_core::model::ChannelType;
use serde_json::Value;

use crate::chat::{ChatConfig, ChatKind, ChatNotifier};
use crate::retry::RetryPolicy;
use crate::templating::TemplateRenderer;
use crate::traits::{Notifier, NotifyError};
use crate::webhook::{WebhookConfig, WebhookNotifier};

pub struct ChannelRegistry {
    renderer: Arc<TemplateRenderer>,
    webhook_retry: RetryPolicy,
    chat_retry: RetryPolicy,
    external: HashMap<ChannelType, Arc<dyn Notifier>>,
}

impl ChannelRegistry {
    pub fn new(config: &NotifyConfig, renderer: Arc<TemplateRenderer>) -> Self {
        let backoff = Duration::from_millis(config.backoff_ms);
        Self {
            renderer,
            webhook_retry: RetryPolicy::new(config.webhook_max_attempts, backoff),
            chat_retry: RetryPolicy::new(config.chat_max_attempts, backoff),
            external: HashMap::new(),
        }
    }

    /// Register the delivery service for an externally handled channel.
    pub fn with_external(mut self, channel: ChannelType, notifier: Arc<dyn Notifier>) -> Self {
        self.external.insert(channel, notifier);
        self
    }

    pub fn renderer(&self) -> &Arc<TemplateRenderer> {
        &self.renderer
    }

    pub fn build(
        &self,
        channel: ChannelType,
        config: &Value,
    ) -> Result<Arc<dyn Notifier>, NotifyError> {
        match channel {
            ChannelType::Webhook => {
                let cfg: WebhookConfig = parse(channel, config)?;
                Ok(Arc::new(WebhookNotifier::from_config(
                    cfg,
                    self.renderer.clone(),
                    self.webhook_retry,
                )?))
            }
            ChannelType::Slack | ChannelType::Teams => {
                let kind = if channel == ChannelType::Slack {
                    ChatKind::Slack
                } else {
                    ChatKind::Teams
                };
                let cfg: ChatConfig = parse(channel, config)?;
                Ok(Arc::new(ChatNotifier::new(kind, cfg, self.chat_retry)?))
            }
            ChannelType::Email | ChannelType::Inapp => {
                self.external.get(&channel).cloned().ok_or_else(|| {
                    NotifyError::Config(format!("no notifier registered for channel '{channel}'"))
                })
            }
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(
    channel: ChannelType,
    config: &Value,
) -> Result<T, NotifyError> {
    serde_json::from_value(config.clone())
        .map_err(|e| NotifyError::Config(format!("invalid {channel} channel config: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> ChannelRegistry {
        ChannelRegistry::new(&NotifyConfig::default(), Arc::new(TemplateRenderer::new()))
    }

    #[test]
    fn builds_http_channels_from_config() {
        let reg = registry();
        let hook = reg
            .build(ChannelType::Webhook, &json!({"url": "https://example.com/hook"}))
            .unwrap();
        assert_eq!(hook.channel_name(), "webhook");
        let slack = reg
            .build(ChannelType::Slack, &json!({"webhook_url": "https://hooks.slack.test/a"}))
            .unwrap();
        assert_eq!(slack.channel_name(), "slack");
    }

    #[test]
    fn malformed_config_names_the_channel() {
        let err = registry()
            .build(ChannelType::Teams, &json!({"url": 3}))
            .err()
            .unwrap();
        assert!(err.to_string().contains("invalid teams channel config"));
    }

    #[test]
    fn external_channels_need_registration() {
        let err = registry().build(ChannelType::Email, &json!({})).err().unwrap();
        assert!(matches!(err, NotifyError::Config(_)));
        assert!(err.to_string().contains("'email'"));
    }
}
