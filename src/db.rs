//! Database pool setup and schema migrations.

use std::path::Path;
use std::str::FromStr as _;

use anyhow::{Context as _, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

/// The application database pool.
pub type Db = sqlx::SqlitePool;

/// Schema migrations embedded from `migrations/`, applied on startup.
pub static MIGRATIONS: sqlx::migrate::Migrator = sqlx::migrate!();

/// Open the database at `url`, creating the file and parent directory if
/// needed, and bring the schema up to date.
pub async fn connect(url: &str) -> Result<Db> {
    if let Some(path) = url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("failed to create database directory")?;
            }
        }
    }

    let opts = SqliteConnectOptions::from_str(url)
        .context("failed to parse database url")?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(opts)
        .await
        .context("failed to connect to SQLite database")?;

    MIGRATIONS
        .run(&db)
        .await
        .context("failed to apply migrations")?;

    Ok(db)
}

/// True when `err` is a unique-constraint violation. The ledgers use the
/// constraints themselves as the backstop for racing writes.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
