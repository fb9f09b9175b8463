//! SQLite connection pooling.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Open the database at `path`, creating the file and its parent
/// directories if needed.
///
/// WAL journaling fits the chat workload: every turn is several small
/// reads plus a short burst of writes. Foreign keys are enforced; the
/// message and session tables rely on them.
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_creates_nested_parent_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a").join("b").join("colloquy.sqlite");

        let pool = connect(&path).await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced() {
        let tmp = tempfile::tempdir().unwrap();
        let pool = connect(&tmp.path().join("fk.sqlite")).await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();

        // A message without a parent conversation must be rejected.
        let result = sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, timestamp)
             VALUES ('m1', 'no-such-conversation', 'user', 'hi', 0)",
        )
        .execute(&pool)
        .await;
        assert!(result.is_err());
    }
}
