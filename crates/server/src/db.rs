use anyhow::Context;
use cadence_core::config::PostgresConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Create the PostgreSQL pool and apply pending migrations.
pub async fn connect(config: &PostgresConfig) -> anyhow::Result<PgPool> {
    if !config.is_configured() {
        anyhow::bail!("PostgreSQL is not configured: set DATABASE_URL or PG_USERNAME");
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.connection_string())
        .await
        .with_context(|| format!("failed to connect to PostgreSQL at {}", config.host))?;
    info!("PostgreSQL connected: {}", config.host);

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;
    info!("Database migrations applied successfully");

    Ok(pool)
}
