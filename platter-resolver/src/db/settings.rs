//! Key/value settings (credentials and tunables stored in the database)

use platter_common::{Error, Result};
use sqlx::SqlitePool;

/// Raw setting value; empty strings read as unset
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<Option<String>> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value.flatten().filter(|v| !v.trim().is_empty()))
}

/// Parsed setting value
pub async fn get_parsed<T>(pool: &SqlitePool, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get_setting(pool, key).await? {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("setting {}: {}", key, e))),
        None => Ok(None),
    }
}

pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;

    #[tokio::test]
    async fn test_get_set_and_parse() {
        let pool = memory_pool().await;
        assert_eq!(get_setting(&pool, "lastfm_api_key").await.unwrap(), None);

        set_setting(&pool, "lastfm_api_key", "abc").await.unwrap();
        assert_eq!(get_setting(&pool, "lastfm_api_key").await.unwrap().as_deref(), Some("abc"));

        set_setting(&pool, "lastfm_api_key", "  ").await.unwrap();
        assert_eq!(get_setting(&pool, "lastfm_api_key").await.unwrap(), None);

        assert_eq!(get_parsed::<u64>(&pool, "db_max_lock_wait_ms").await.unwrap(), Some(5000));
        set_setting(&pool, "db_max_lock_wait_ms", "soon").await.unwrap();
        assert!(matches!(get_parsed::<u64>(&pool, "db_max_lock_wait_ms").await, Err(Error::Config(_))));
    }
}
