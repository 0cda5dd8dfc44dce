//! Alert delivery to an arbitrary HTTP endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::Deserialize;

use crate::retry::RetryPolicy;
use crate::templating::TemplateRenderer;
use crate::traits::{Notification, Notifier, NotifyError};

/// Upper bound on one HTTP attempt, connect included.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn http_client() -> Result<reqwest::Client, NotifyError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| NotifyError::Config(format!("http client: {e}")))
}

/// Stored config of a `webhook` channel.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// minijinja template for the request body, rendered with the alert
    /// context. Without one the whole notification is sent as JSON.
    #[serde(default)]
    pub body_template: Option<String>,
}

/// Sends one request per notification. `${NAME}` references in the URL and
/// header values are expanded from the environment when the notifier is
/// built, so a missing secret fails the channel up front.
#[derive(Debug)]
pub struct WebhookNotifier {
    endpoint: String,
    method: Method,
    headers: HeaderMap,
    body_template: Option<String>,
    renderer: Arc<TemplateRenderer>,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl WebhookNotifier {
    pub fn from_config(
        config: WebhookConfig,
        renderer: Arc<TemplateRenderer>,
        retry: RetryPolicy,
    ) -> Result<Self, NotifyError> {
        let endpoint = expand_env(config.url.trim())?;
        if endpoint.is_empty() {
            return Err(NotifyError::Config("webhook channel needs a url".into()));
        }

        let method = match config.method.as_deref().map(str::trim) {
            None | Some("") => Method::POST,
            Some(m) => Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                .map_err(|_| NotifyError::Config(format!("unsupported HTTP method '{m}'")))?,
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, raw) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| NotifyError::Config(format!("bad header name '{name}'")))?;
            let value = HeaderValue::from_str(&expand_env(raw)?)
                .map_err(|_| NotifyError::Config(format!("bad value for header '{name}'")))?;
            headers.insert(name, value);
        }

        if let Some(template) = &config.body_template {
            renderer
                .validate(template)
                .map_err(|e| NotifyError::Config(format!("body_template: {e}")))?;
        }

        Ok(Self {
            endpoint,
            method,
            headers,
            body_template: config.body_template,
            renderer,
            client: http_client()?,
            retry,
        })
    }

    fn render_body(&self, notification: &Notification) -> Result<String, NotifyError> {
        if let Some(template) = &self.body_template {
            return self.renderer.render(template, &notification.context);
        }
        serde_json::to_string(notification)
            .map_err(|e| NotifyError::Config(format!("notification is not serializable: {e}")))
    }

    async fn attempt(&self, body: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .request(self.method.clone(), &self.endpoint)
            .headers(self.headers.clone())
            .body(body.to_owned())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(endpoint = %self.endpoint, %status, "webhook accepted alert");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(endpoint = %self.endpoint, %status, "webhook rejected alert");
        Err(NotifyError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let body = self.render_body(notification)?;
        self.retry.run("webhook", || self.attempt(&body)).await
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}

/// Replace every `${NAME}` with the value of environment variable `NAME`.
/// A lone `$` passes through untouched.
pub(crate) fn expand_env(input: &str) -> Result<String, NotifyError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| NotifyError::Config(format!("unterminated '${{' in '{input}'")))?;
        let name = &after[..end];
        let value = std::env::var(name)
            .map_err(|_| NotifyError::Config(format!("environment variable {name} is not set")))?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templating::sample_context;

    fn build(config: WebhookConfig) -> Result<WebhookNotifier, NotifyError> {
        WebhookNotifier::from_config(
            config,
            Arc::new(TemplateRenderer::new()),
            RetryPolicy::new(3, Duration::from_millis(10)),
        )
    }

    fn at(url: &str) -> WebhookConfig {
        WebhookConfig {
            url: url.into(),
            ..Default::default()
        }
    }

    #[test]
    fn expands_environment_references() {
        std::env::set_var("CADENCE_HOOK_HOST", "hooks.internal");
        assert_eq!(
            expand_env("https://${CADENCE_HOOK_HOST}/alerts?cost=$5").unwrap(),
            "https://hooks.internal/alerts?cost=$5"
        );
        std::env::remove_var("CADENCE_HOOK_HOST");
    }

    #[test]
    fn missing_or_unterminated_references_fail() {
        let missing = expand_env("${CADENCE_NEVER_SET_VAR}").unwrap_err();
        assert!(missing.to_string().contains("CADENCE_NEVER_SET_VAR"));
        assert!(matches!(expand_env("https://${HOST"), Err(NotifyError::Config(_))));
    }

    #[test]
    fn method_defaults_to_post_and_is_case_insensitive() {
        assert_eq!(build(at("https://hooks.internal")).unwrap().method, Method::POST);

        let mut cfg = at("https://hooks.internal");
        cfg.method = Some("patch".into());
        assert_eq!(build(cfg).unwrap().method, Method::PATCH);

        let mut cfg = at("https://hooks.internal");
        cfg.method = Some("NO SPACES".into());
        assert!(build(cfg).is_err());
    }

    #[test]
    fn blank_url_is_a_config_error() {
        assert!(matches!(build(at("   ")), Err(NotifyError::Config(_))));
    }

    #[test]
    fn header_values_are_expanded() {
        std::env::set_var("CADENCE_HOOK_TOKEN", "tok-789");
        let mut cfg = at("https://hooks.internal");
        cfg.headers = HashMap::from([
            ("Authorization".to_string(), "Bearer ${CADENCE_HOOK_TOKEN}".to_string()),
            ("X-Source".to_string(), "cadence".to_string()),
        ]);
        let notifier = build(cfg).unwrap();
        assert_eq!(notifier.headers["authorization"], "Bearer tok-789");
        assert_eq!(notifier.headers["x-source"], "cadence");
        assert_eq!(notifier.headers[CONTENT_TYPE], "application/json");
        std::env::remove_var("CADENCE_HOOK_TOKEN");
    }

    #[test]
    fn body_template_is_checked_then_rendered() {
        let mut broken = at("https://hooks.internal");
        broken.body_template = Some("{% if %}".into());
        assert!(matches!(build(broken), Err(NotifyError::Config(_))));

        let mut cfg = at("https://hooks.internal");
        cfg.body_template = Some(r#"{"value": {{ alert.value }}}"#.into());
        let notifier = build(cfg).unwrap();
        let n = TemplateRenderer::new().notification(sample_context()).unwrap();
        assert_eq!(notifier.render_body(&n).unwrap(), r#"{"value": 150.0}"#);
    }

    #[test]
    fn without_a_template_the_notification_is_sent_as_json() {
        let notifier = build(at("https://hooks.internal")).unwrap();
        let n = TemplateRenderer::new().notification(sample_context()).unwrap();
        let body: serde_json::Value =
            serde_json::from_str(&notifier.render_body(&n).unwrap()).unwrap();
        assert_eq!(body["subject"], n.subject);
        assert_eq!(body["context"]["threshold"], 100.0);
    }
}
