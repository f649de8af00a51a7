use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;
use tracing::{info, warn};

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

/// Keeps trying to open the pool, sleeping `retry_delay` between attempts.
/// Only returns once a connection succeeds.
pub async fn connect_with_retry(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
    retry_delay: Duration,
) -> DbPool {
    let mut attempt: u64 = 1;
    loop {
        match connect_with_settings(database_url, max_connections, timeout_secs).await {
            Ok(pool) => {
                info!(
                    event_name = "db.connect.succeeded",
                    correlation_id = "bootstrap",
                    attempt,
                    "database connection established"
                );
                return pool;
            }
            Err(error) => {
                warn!(
                    event_name = "db.connect.retrying",
                    correlation_id = "bootstrap",
                    attempt,
                    retry_in_ms = retry_delay.as_millis() as u64,
                    error = %error,
                    "database unavailable, retrying"
                );
                tokio::time::sleep(retry_delay).await;
                attempt += 1;
            }
        }
    }
}
