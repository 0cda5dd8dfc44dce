use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub postgres: PostgresConfig,
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
    pub reports: ReportConfig,
    pub notify: NotifyConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `CADENCE_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("CADENCE_PROFILE", "");
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            postgres: PostgresConfig::from_env_profiled(p),
            queue: QueueConfig::from_env_profiled(p),
            scheduler: SchedulerConfig::from_env_profiled(p),
            reports: ReportConfig::from_env_profiled(p),
            notify: NotifyConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() {
            "default"
        } else {
            &self.profile
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  postgres:   host={}, db={}, max_connections={}",
            self.postgres.host,
            self.postgres.database,
            self.postgres.max_connections
        );
        tracing::info!(
            "  queue:      max_concurrent={}, tick={}ms",
            self.queue.max_concurrent,
            self.queue.tick_ms
        );
        tracing::info!(
            "  scheduler:  tick={}s, alert_timeout={}s, pipeline_timeout={}s, report_timeout={}s",
            self.scheduler.tick_secs,
            self.scheduler.alert_timeout_secs,
            self.scheduler.pipeline_timeout_secs,
            self.scheduler.report_timeout_secs
        );
        tracing::info!(
            "  reports:    export_dir={}, retention_days={}",
            self.reports.export_dir.display(),
            self.reports.retention_days
        );
        tracing::info!(
            "  notify:     webhook_attempts={}, chat_attempts={}, backoff={}ms",
            self.notify.webhook_max_attempts,
            self.notify.chat_max_attempts,
            self.notify.backoff_ms
        );
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
    /// Full URL override (`DATABASE_URL`).
    pub url: Option<String>,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_parse(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "cadence"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_parse(p, "PG_MAX_CONNECTIONS", 10),
            url: profiled_env_opt(p, "DATABASE_URL"),
        }
    }

    pub fn connection_string(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some() || self.username.is_some()
    }
}

// ── Admission queue ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum source queries in flight at once.
    pub max_concurrent: usize,
    /// Dispatcher tick in milliseconds.
    pub tick_ms: u64,
}

impl QueueConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_concurrent: profiled_env_parse(p, "QUERY_QUEUE_MAX_CONCURRENT", 10usize).max(1),
            tick_ms: profiled_env_parse(p, "QUERY_QUEUE_TICK_MS", 50),
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            tick_ms: 50,
        }
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Cadence of the due-work jobs.
    pub tick_secs: u64,
    pub alert_timeout_secs: u64,
    pub report_timeout_secs: u64,
    pub pipeline_timeout_secs: u64,
    /// Local hour of the daily report-run pruning job.
    pub report_cleanup_hour: u32,
    /// IANA zone the hourly and daily maintenance jobs fire in.
    pub timezone: String,
}

impl SchedulerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            tick_secs: profiled_env_parse(p, "SCHEDULER_TICK_SECS", 60),
            alert_timeout_secs: profiled_env_parse(p, "ALERT_TIMEOUT_SECS", 300),
            report_timeout_secs: profiled_env_parse(p, "REPORT_TIMEOUT_SECS", 300),
            pipeline_timeout_secs: profiled_env_parse(p, "PIPELINE_TIMEOUT_SECS", 1800),
            report_cleanup_hour: profiled_env_parse(p, "REPORT_CLEANUP_HOUR", 3u32).min(23),
            timezone: profiled_env_or(p, "SCHEDULER_TIMEZONE", "UTC"),
        }
    }

    /// The maintenance zone; unknown names fall back to UTC.
    pub fn tz(&self) -> chrono_tz::Tz {
        crate::schedule::resolve_timezone(&self.timezone)
    }

    pub fn alert_timeout(&self) -> Duration {
        Duration::from_secs(self.alert_timeout_secs)
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_secs(self.report_timeout_secs)
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline_timeout_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            alert_timeout_secs: 300,
            report_timeout_secs: 300,
            pipeline_timeout_secs: 1800,
            report_cleanup_hour: 3,
            timezone: "UTC".to_string(),
        }
    }
}

// ── Reports ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    pub export_dir: PathBuf,
    pub retention_days: u32,
    pub base_url: String,
}

impl ReportConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            export_dir: PathBuf::from(profiled_env_or(p, "REPORT_EXPORT_DIR", "data/reports")),
            retention_days: profiled_env_parse(p, "REPORT_RETENTION_DAYS", 30),
            base_url: profiled_env_or(p, "PUBLIC_BASE_URL", "http://localhost:8080"),
        }
    }
}

// ── Notification channels ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub webhook_max_attempts: u32,
    pub chat_max_attempts: u32,
    pub backoff_ms: u64,
}

impl NotifyConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            webhook_max_attempts: profiled_env_parse(p, "WEBHOOK_MAX_ATTEMPTS", 3u32).max(1),
            chat_max_attempts: profiled_env_parse(p, "CHAT_MAX_ATTEMPTS", 2u32).max(1),
            backoff_ms: profiled_env_parse(p, "NOTIFY_BACKOFF_MS", 1000),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_max_attempts: 3,
            chat_max_attempts: 2,
            backoff_ms: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_prefix_wins_over_plain_key() {
        std::env::set_var("CFGTEST_PG_HOST", "db.prod");
        std::env::set_var("PG_DATABASE", "plain_db");
        let cfg = Config::for_profile("cfgtest");
        assert_eq!(cfg.profile, "CFGTEST");
        assert_eq!(cfg.postgres.host, "db.prod");
        assert_eq!(cfg.postgres.database, "plain_db");
        std::env::remove_var("CFGTEST_PG_HOST");
        std::env::remove_var("PG_DATABASE");
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::for_profile("NOSUCHPROFILE_DEFAULTS");
        assert_eq!(cfg.queue.tick_ms, 50);
        assert_eq!(cfg.scheduler.pipeline_timeout_secs, 1800);
        assert_eq!(cfg.scheduler.alert_timeout_secs, 300);
        assert_eq!(cfg.notify.webhook_max_attempts, 3);
        assert_eq!(cfg.notify.chat_max_attempts, 2);
        assert_eq!(cfg.profile_label(), "NOSUCHPROFILE_DEFAULTS");
    }

    #[test]
    fn maintenance_zone_is_configurable() {
        assert_eq!(SchedulerConfig::default().tz(), chrono_tz::Tz::UTC);
        std::env::set_var("CFGTZ_SCHEDULER_TIMEZONE", "Europe/Berlin");
        let cfg = Config::for_profile("cfgtz");
        assert_eq!(cfg.scheduler.tz(), chrono_tz::Tz::Europe__Berlin);
        std::env::remove_var("CFGTZ_SCHEDULER_TIMEZONE");
    }

    #[test]
    fn database_url_overrides_composed_string() {
        let mut pg = PostgresConfig::from_env_profiled("NOSUCHPROFILE_URL");
        pg.url = Some("postgres://u:p@h:1/d".to_string());
        assert_eq!(pg.connection_string(), "postgres://u:p@h:1/d");
        assert!(pg.is_configured());
    }
}
