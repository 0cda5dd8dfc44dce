use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pipeline::SourceType;
use crate::error::CoreError;

/// Credentials of an external database. Read-only to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Connection {
    pub id: Uuid,
    #[sqlx(try_from = "String")]
    pub kind: SourceType,
    pub host: String,
    pub port: i32,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Driver options, e.g. `{"ssl_mode": "require"}`.
    pub options: serde_json::Value,
}

impl Connection {
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }
}

/// Lookup of stored connection records.
#[async_trait]
pub trait ConnectionDirectory: Send + Sync {
    /// Fails with [`CoreError::ConnectionNotFound`] for unknown ids.
    async fn get(&self, id: Uuid) -> Result<Connection, CoreError>;
}
