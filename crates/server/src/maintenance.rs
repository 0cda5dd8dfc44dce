//! Hourly housekeeping against tables and functions owned by the rest of
//! the platform (`shares`, `embed_tokens`, `reset_budgets()`,
//! `refresh_ai_usage_stats()`).

use sqlx::PgPool;

/// Mark active shares past their expiry as expired. Returns how many.
pub async fn expire_shares(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE shares SET status = 'expired', updated_at = NOW() \
         WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at < NOW()",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Expired, unrevoked embed tokens. They are kept for audit, only counted.
pub async fn count_expired_embed_tokens(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM embed_tokens \
         WHERE is_revoked = false AND expires_at IS NOT NULL AND expires_at < NOW()",
    )
    .fetch_one(pool)
    .await
}

pub async fn refresh_views(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT refresh_ai_usage_stats()")
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn reset_budgets(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT reset_budgets()").execute(pool).await?;
    Ok(())
}
