//! Read-only lookups of records owned by other services: stored
//! connections and saved queries.

use async_trait::async_trait;
use cadence_core::model::{Connection, ConnectionDirectory, SavedQuery};
use cadence_core::CoreError;
use sqlx::PgPool;
use uuid::Uuid;

/// [`ConnectionDirectory`] over the `connections` table.
#[derive(Clone)]
pub struct PgConnectionDirectory {
    pool: PgPool,
}

impl PgConnectionDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConnectionDirectory for PgConnectionDirectory {
    async fn get(&self, id: Uuid) -> Result<Connection, CoreError> {
        sqlx::query_as::<_, Connection>(
            "SELECT id, kind, host, port, database, username, password, options \
             FROM connections WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::ConnectionNotFound(id.to_string()))
    }
}

pub async fn find_saved_query(pool: &PgPool, id: Uuid) -> Result<Option<SavedQuery>, sqlx::Error> {
    sqlx::query_as::<_, SavedQuery>("SELECT id, connection_id, sql FROM saved_queries WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}
