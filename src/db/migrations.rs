//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::Database;

impl Database {
    /// Create a new database connection
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        // Foreign keys make item rows follow their task on delete
        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(connection_failed("parse database path"))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(connection_failed("connect to database"))?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(connection_failed("acquire connection"))?;

        execute(
            &mut conn,
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )",
            "create schema_version table",
        )
        .await?;

        let current_version: i64 =
            sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(version) FROM schema_version")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .unwrap_or(0);

        for (version, statements) in MIGRATIONS {
            if *version > current_version {
                Self::apply_migration(&mut conn, *version, statements).await?;
            }
        }

        Ok(())
    }

    /// Apply one migration's statements and record it, all in one transaction
    async fn apply_migration(
        conn: &mut SqliteConnection,
        version: i64,
        statements: &[&str],
    ) -> Result<()> {
        tracing::info!(version, "Applying database migration");

        execute(conn, "BEGIN", "begin transaction").await?;

        let result = async {
            for statement in statements {
                execute(conn, statement, "apply schema change").await?;
            }
            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(chrono::Utc::now().timestamp())
                .execute(&mut *conn)
                .await
                .map_err(migration_failed("record migration"))?;
            Ok::<(), Error>(())
        }
        .await;

        if let Err(e) = result {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            return Err(e);
        }
        execute(conn, "COMMIT", "commit migration").await?;

        tracing::info!(version, "Database migration complete");
        Ok(())
    }

    /// Close the database connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Schema versions, oldest first
const MIGRATIONS: &[(i64, &[&str])] = &[(
    1,
    &[
        "CREATE TABLE tasks (
            id TEXT PRIMARY KEY,
            seed TEXT NOT NULL,
            status TEXT NOT NULL,
            config TEXT NOT NULL,
            total_items INTEGER NOT NULL DEFAULT 0,
            succeeded_items INTEGER NOT NULL DEFAULT 0,
            failed_items INTEGER NOT NULL DEFAULT 0,
            skipped_items INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            started_at INTEGER,
            completed_at INTEGER
        )",
        "CREATE INDEX idx_tasks_status ON tasks(status)",
        "CREATE INDEX idx_tasks_created_at ON tasks(created_at DESC)",
        "CREATE TABLE task_items (
            task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            target TEXT NOT NULL,
            depth INTEGER NOT NULL DEFAULT 0,
            outcome TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            error_kind TEXT,
            error TEXT,
            payload TEXT,
            last_attempt_at INTEGER,
            PRIMARY KEY (task_id, position)
        )",
    ],
)];

async fn execute(conn: &mut SqliteConnection, sql: &str, what: &'static str) -> Result<()> {
    sqlx::query(sql)
        .execute(&mut *conn)
        .await
        .map_err(migration_failed(what))?;
    Ok(())
}

fn migration_failed(what: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |e| Error::Database(DatabaseError::MigrationFailed(format!("Failed to {}: {}", what, e)))
}

fn connection_failed(what: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |e| Error::Database(DatabaseError::ConnectionFailed(format!("Failed to {}: {}", what, e)))
}
