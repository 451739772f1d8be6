use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    // File-backed databases are created on first use so `arena migrate` works on a fresh host.
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::connect_with_settings;

    #[tokio::test]
    async fn file_database_is_created_when_missing() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("arena.db");
        let url = format!("sqlite://{}", path.display());

        let pool = connect_with_settings(&url, 1, 5).await.expect("connect");
        sqlx::query("SELECT 1").execute(&pool).await.expect("probe");
        pool.close().await;

        assert!(path.exists());
    }
}
