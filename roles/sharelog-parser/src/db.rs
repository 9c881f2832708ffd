//! Hour and day statistics persistence.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use sharelog_protocol::WorkerKey;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use worker_stats::day::HOURS_PER_DAY;
use worker_stats::DayStats;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

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
            CREATE TABLE IF NOT EXISTS stats_shares_hour (
                user_id INTEGER NOT NULL,
                worker_id INTEGER NOT NULL,
                day INTEGER NOT NULL,
                hour INTEGER NOT NULL,
                accept INTEGER NOT NULL,
                reject INTEGER NOT NULL,
                score REAL NOT NULL,

                PRIMARY KEY (user_id, worker_id, day, hour)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stats_shares_day (
                user_id INTEGER NOT NULL,
                worker_id INTEGER NOT NULL,
                day INTEGER NOT NULL,
                accept INTEGER NOT NULL,
                reject INTEGER NOT NULL,
                score REAL NOT NULL,

                PRIMARY KEY (user_id, worker_id, day)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upsert one row per dirty hour and the day row for every worker with
    /// unflushed changes, then clear the dirty bits. Returns rows written.
    pub async fn flush_day_stats(
        &self,
        day: u32,
        workers: &mut HashMap<WorkerKey, DayStats>,
    ) -> Result<usize> {
        let mut rows = 0;

        for (key, stats) in workers.iter_mut() {
            if stats.dirty_hours() == 0 {
                continue;
            }

            for hour in 0..HOURS_PER_DAY {
                if stats.dirty_hours() & (1 << hour) == 0 {
                    continue;
                }
                let (accept, reject, score) = stats.hour(hour);
                sqlx::query(
                    r#"
                    INSERT INTO stats_shares_hour
                    (user_id, worker_id, day, hour, accept, reject, score)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(user_id, worker_id, day, hour) DO UPDATE SET
                        accept = excluded.accept,
                        reject = excluded.reject,
                        score = excluded.score
                    "#,
                )
                .bind(key.user_id)
                .bind(key.worker_id)
                .bind(day as i64)
                .bind(hour as i64)
                .bind(accept as i64)
                .bind(reject as i64)
                .bind(score)
                .execute(&self.pool)
                .await?;
                rows += 1;
            }

            let (accept, reject, score) = stats.day();
            sqlx::query(
                r#"
                INSERT INTO stats_shares_day
                (user_id, worker_id, day, accept, reject, score)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(user_id, worker_id, day) DO UPDATE SET
                    accept = excluded.accept,
                    reject = excluded.reject,
                    score = excluded.score
                "#,
            )
            .bind(key.user_id)
            .bind(key.worker_id)
            .bind(day as i64)
            .bind(accept as i64)
            .bind(reject as i64)
            .bind(score)
            .execute(&self.pool)
            .await?;
            rows += 1;

            stats.clear_dirty();
        }

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharelog_protocol::{Share, ShareResult};
    use sqlx::Row;
    use tempfile::TempDir;

    const DAY: u32 = 19_700 * 86_400;

    fn share(value: u64, result: ShareResult) -> Share {
        Share {
            job_id: 1,
            worker_id: 2,
            user_id: 1,
            ip: 1,
            share_value: value,
            timestamp: DAY,
            result,
            block_bits: 0x1d00_ffff,
            job_diff: 1,
        }
    }

    #[tokio::test]
    async fn test_schema_created() {
        let temp_dir = TempDir::new().unwrap();
        let db = StatsDb::new(temp_dir.path().join("stats.db")).await.unwrap();

        let tables: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' \
             AND name IN ('stats_shares_hour', 'stats_shares_day')",
        )
        .fetch_one(&db.pool)
        .await
        .unwrap();
        assert_eq!(tables.0, 2);
    }

    #[tokio::test]
    async fn test_flush_writes_dirty_hours_and_day() {
        let temp_dir = TempDir::new().unwrap();
        let db = StatsDb::new(temp_dir.path().join("stats.db")).await.unwrap();

        let mut workers = HashMap::new();
        let mut stats = DayStats::new();
        stats.process_share(0, &share(10, ShareResult::Accept));
        stats.process_share(5, &share(7, ShareResult::Reject(0)));
        workers.insert(WorkerKey::new(1, 2), stats);

        // two dirty hours plus the day row
        let rows = db.flush_day_stats(DAY, &mut workers).await.unwrap();
        assert_eq!(rows, 3);

        let hour0 = sqlx::query(
            "SELECT accept, reject, score FROM stats_shares_hour \
             WHERE user_id = 1 AND worker_id = 2 AND day = ? AND hour = 0",
        )
        .bind(DAY as i64)
        .fetch_one(&db.pool)
        .await
        .unwrap();
        assert_eq!(hour0.get::<i64, _>("accept"), 10);
        assert_eq!(hour0.get::<i64, _>("reject"), 0);
        assert!((hour0.get::<f64, _>("score") - 1.0).abs() < 1e-12);

        let day_row = sqlx::query(
            "SELECT accept, reject FROM stats_shares_day \
             WHERE user_id = 1 AND worker_id = 2 AND day = ?",
        )
        .bind(DAY as i64)
        .fetch_one(&db.pool)
        .await
        .unwrap();
        assert_eq!(day_row.get::<i64, _>("accept"), 10);
        assert_eq!(day_row.get::<i64, _>("reject"), 7);

        // everything clean now: a second flush writes nothing
        let rows = db.flush_day_stats(DAY, &mut workers).await.unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn test_reflush_updates_rows_in_place() {
        let temp_dir = TempDir::new().unwrap();
        let db = StatsDb::new(temp_dir.path().join("stats.db")).await.unwrap();

        let key = WorkerKey::new(1, 2);
        let mut workers = HashMap::new();
        workers.insert(key, DayStats::new());

        workers
            .get_mut(&key)
            .unwrap()
            .process_share(3, &share(4, ShareResult::Accept));
        db.flush_day_stats(DAY, &mut workers).await.unwrap();

        workers
            .get_mut(&key)
            .unwrap()
            .process_share(3, &share(6, ShareResult::Accept));
        db.flush_day_stats(DAY, &mut workers).await.unwrap();

        let hour3: (i64,) = sqlx::query_as(
            "SELECT accept FROM stats_shares_hour \
             WHERE user_id = 1 AND worker_id = 2 AND day = ? AND hour = 3",
        )
        .bind(DAY as i64)
        .fetch_one(&db.pool)
        .await
        .unwrap();
        assert_eq!(hour3.0, 10);

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM stats_shares_hour")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }
}
