//! Retry for transient SQLite lock contention
//!
//! The bulk worker and interactive calls write to the same database file;
//! a write that loses the race gets "database is locked" and is retried with
//! exponential backoff (10 ms doubling up to 1 s) until the configured budget
//! (`db_max_lock_wait_ms`) runs out.

use platter_common::{Error, Result};
use sqlx::SqlitePool;
use std::time::{Duration, Instant};

const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;
const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Lock-wait budget from the settings table
pub async fn max_lock_wait_ms(pool: &SqlitePool) -> u64 {
    let configured: Option<i64> = sqlx::query_scalar(
        "SELECT CAST(value AS INTEGER) FROM settings WHERE key = 'db_max_lock_wait_ms'",
    )
    .fetch_optional(pool)
    .await
    .ok()
    .flatten();

    configured
        .and_then(|ms| u64::try_from(ms).ok())
        .unwrap_or(DEFAULT_MAX_LOCK_WAIT_MS)
}

fn is_lock_error(err: &Error) -> bool {
    matches!(err, Error::Database(db_err) if db_err.to_string().contains("database is locked"))
}

/// Run `operation`, retrying lock errors until `max_wait_ms` elapses
///
/// Any other error is returned immediately.
pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, max_wait_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    let elapsed_ms = start.elapsed().as_millis() as u64;
                    if elapsed_ms > 2000 {
                        tracing::warn!(operation = operation_name, attempt, elapsed_ms, "Database write succeeded after long contention");
                    } else {
                        tracing::debug!(operation = operation_name, attempt, elapsed_ms, "Database write succeeded after retry");
                    }
                }
                return Ok(value);
            }
            Err(err) if !is_lock_error(&err) => return Err(err),
            Err(_) => {
                let elapsed = start.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_wait_ms,
                        "Database still locked, giving up"
                    );
                    return Err(Error::Internal(format!(
                        "{}: database locked after {} attempts ({} ms)",
                        operation_name,
                        attempt,
                        elapsed.as_millis()
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    remaining_ms = max_duration.saturating_sub(elapsed).as_millis() as u64,
                    "Database locked, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}
