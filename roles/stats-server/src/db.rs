//! Worker snapshot persistence.

use std::path::Path;
use std::str::FromStr;

use sharelog_protocol::WorkerKey;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, QueryBuilder, Sqlite};
use thiserror::Error;
use worker_stats::WorkerStatus;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// One `mining_workers` row: a worker snapshot taken at `updated_at`.
#[derive(Debug, Clone)]
pub struct WorkerRow {
    pub key: WorkerKey,
    pub status: WorkerStatus,
    pub updated_at: u32,
}

pub struct StatsDb {
    pool: Pool<Sqlite>,
}

impl StatsDb {
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let connection_options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
                .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connection_options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;

        Ok(db)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mining_workers (
                user_id INTEGER NOT NULL,
                worker_id INTEGER NOT NULL,
                accept_1m INTEGER NOT NULL,
                accept_5m INTEGER NOT NULL,
                accept_15m INTEGER NOT NULL,
                reject_15m INTEGER NOT NULL,
                accept_count INTEGER NOT NULL,
                last_share_ip INTEGER NOT NULL,
                last_share_time INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,

                PRIMARY KEY (user_id, worker_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upsert one bounded batch of worker snapshots in a single statement.
    pub async fn upsert_workers(&self, rows: &[WorkerRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO mining_workers \
             (user_id, worker_id, accept_1m, accept_5m, accept_15m, reject_15m, \
              accept_count, last_share_ip, last_share_time, updated_at) ",
        );
        builder.push_values(rows.iter(), |mut b, row| {
            b.push_bind(row.key.user_id)
                .push_bind(row.key.worker_id)
                .push_bind(row.status.accept_1m as i64)
                .push_bind(row.status.accept_5m as i64)
                .push_bind(row.status.accept_15m as i64)
                .push_bind(row.status.reject_15m as i64)
                .push_bind(row.status.accept_count as i64)
                .push_bind(row.status.last_share_ip as i64)
                .push_bind(row.status.last_share_time as i64)
                .push_bind(row.updated_at as i64);
        });
        builder.push(
            " ON CONFLICT(user_id, worker_id) DO UPDATE SET \
             accept_1m = excluded.accept_1m, \
             accept_5m = excluded.accept_5m, \
             accept_15m = excluded.accept_15m, \
             reject_15m = excluded.reject_15m, \
             accept_count = excluded.accept_count, \
             last_share_ip = excluded.last_share_ip, \
             last_share_time = excluded.last_share_time, \
             updated_at = excluded.updated_at",
        );
        builder.build().execute(&self.pool).await?;

        Ok(())
    }
}
