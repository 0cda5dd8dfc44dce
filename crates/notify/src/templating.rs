//! Minijinja template rendering for alert notifications.
//!
//! Templates are arbitrary strings (channel body templates come from user
//! config), so a fresh [`minijinja::Environment`] is created per render call.

use std::collections::HashMap;

use crate::traits::{Notification, NotifyError};

pub const DEFAULT_SUBJECT: &str = "[{{ alert.severity | upper }}] Alert triggered: {{ alert.name }}";

pub const DEFAULT_BODY: &str = "\
{{ alert.message }}

Alert: {{ alert.name }}
Condition: {{ alert.target_column }} {{ alert.operator }} {{ alert.threshold | round(2) }}
Value: {{ alert.value | round(2) }}
Checked at: {{ alert.checked_at }}";

/// Alert data exposed to templates and serialized into webhook payloads.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AlertContext {
    pub alert_id: String,
    pub history_id: String,
    pub name: String,
    pub description: Option<String>,
    pub severity: String,
    pub target_column: String,
    pub operator: String,
    pub threshold: f64,
    pub value: f64,
    pub state: String,
    /// History message, e.g. `Alert triggered: value greater than 100 (...)`.
    pub message: String,
    /// ISO 8601.
    pub checked_at: String,
}

#[derive(Debug, Clone, serde::Serialize)]
struct TemplateContext<'a> {
    alert: &'a AlertContext,
    now: String,
}

#[derive(Debug, Default)]
pub struct TemplateRenderer {
    _private: (),
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self { _private: () }
    }

    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.add_filter("round", round_filter);
        env.add_filter("lower", lower_filter);
        env.add_filter("upper", upper_filter);
        env.add_function("env", env_function);
        env
    }

    /// Render a template string against an alert context.
    pub fn render(&self, template_str: &str, alert: &AlertContext) -> Result<String, NotifyError> {
        let ctx = TemplateContext {
            alert,
            now: chrono::Utc::now().to_rfc3339(),
        };
        Self::build_env()
            .render_str(template_str, &ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }

    /// Syntax check only; nothing is evaluated.
    pub fn validate(&self, template_str: &str) -> Result<(), NotifyError> {
        let env = Self::build_env();
        env.template_from_str(template_str)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        Ok(())
    }

    /// Render the default subject and body into a deliverable notification.
    pub fn notification(&self, context: AlertContext) -> Result<Notification, NotifyError> {
        let subject = self.render(DEFAULT_SUBJECT, &context)?;
        let body = self.render(DEFAULT_BODY, &context)?;
        let metadata = HashMap::from([
            ("alert_id".to_string(), context.alert_id.clone()),
            ("history_id".to_string(), context.history_id.clone()),
            ("severity".to_string(), context.severity.clone()),
        ]);
        Ok(Notification {
            subject,
            body,
            metadata,
            context,
        })
    }
}

fn round_filter(value: f64, decimals: Option<u32>) -> String {
    let n = decimals.unwrap_or(0);
    format!("{:.prec$}", value, prec = n as usize)
}

fn lower_filter(value: String) -> String {
    value.to_lowercase()
}

fn upper_filter(value: String) -> String {
    value.to_uppercase()
}

/// Missing variables render as the empty string.
fn env_function(name: String) -> String {
    match std::env::var(&name) {
        Ok(val) => val,
        Err(_) => {
            tracing::warn!(var = %name, "environment variable not found, rendering empty string");
            String::new()
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_context() -> AlertContext {
    AlertContext {
        alert_id: "7d6c0d3e-0000-0000-0000-000000000001".to_string(),
        history_id: "7d6c0d3e-0000-0000-0000-0000000000aa".to_string(),
        name: "Queue depth".to_string(),
        description: None,
        severity: "critical".to_string(),
        target_column: "value".to_string(),
        operator: ">".to_string(),
        threshold: 100.0,
        value: 150.0,
        state: "TRIGGERED".to_string(),
        message: "Alert triggered: value greater than 100.00 (value: 150.00, threshold: 100.00)"
            .to_string(),
        checked_at: "2026-02-16T12:00:00Z".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_subject_uses_severity_and_name() {
        let renderer = TemplateRenderer::new();
        let subject = renderer.render(DEFAULT_SUBJECT, &sample_context()).unwrap();
        assert_eq!(subject, "[CRITICAL] Alert triggered: Queue depth");
    }

    #[test]
    fn default_body_rounds_numbers() {
        let renderer = TemplateRenderer::new();
        let body = renderer.render(DEFAULT_BODY, &sample_context()).unwrap();
        assert!(body.contains("Condition: value > 100.00"));
        assert!(body.contains("Value: 150.00"));
    }

    #[test]
    fn notification_carries_metadata() {
        let n = TemplateRenderer::new().notification(sample_context()).unwrap();
        assert_eq!(n.metadata["severity"], "critical");
        assert_eq!(n.context.value, 150.0);
    }

    #[test]
    fn optional_fields_render_as_none() {
        let renderer = TemplateRenderer::new();
        let out = renderer
            .render("Desc: {{ alert.description }}", &sample_context())
            .unwrap();
        assert_eq!(out, "Desc: none");
    }

    #[test]
    fn env_function_reads_variables() {
        std::env::set_var("CADENCE_NOTIFY_TEST_VAR", "hello_notify");
        let renderer = TemplateRenderer::new();
        let out = renderer
            .render("Env: {{ env('CADENCE_NOTIFY_TEST_VAR') }}", &sample_context())
            .unwrap();
        assert_eq!(out, "Env: hello_notify");
        std::env::remove_var("CADENCE_NOTIFY_TEST_VAR");
    }

    #[test]
    fn invalid_template_is_a_template_error() {
        let renderer = TemplateRenderer::new();
        assert!(renderer.validate("{{ unclosed").is_err());
        match renderer.render("{{ unclosed", &sample_context()) {
            Err(NotifyError::Template(msg)) => assert!(!msg.is_empty()),
            other => panic!("expected Template error, got: {other:?}"),
        }
    }
}
