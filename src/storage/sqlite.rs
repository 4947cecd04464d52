//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the
//! `MonitoringStorage` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Fetches do not block the flushing consumer
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! Ids come from `INTEGER PRIMARY KEY AUTOINCREMENT`, so they are never
//! reused even after retention cleanup. Timestamps are stored as Unix
//! milliseconds, severities as their integer code.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{FetchQuery, HealthStatus, MonitoringStorage};
use super::error::{StorageError, StorageResult};
use crate::monitoring::{MonitoringEvent, Severity};

const SELECT_EVENTS: &str = r#"
    SELECT id, timestamp, machine, module, component, severity, title, description
    FROM monitoring_events
    WHERE timestamp >= "#;

/// SQLite storage backend
pub struct SqliteStorage {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteStorage {
    /// Open (or create) the database file and run migrations
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use module_monitoring::storage::SqliteStorage;
    /// # async fn example() -> anyhow::Result<()> {
    /// let storage = SqliteStorage::new("./monitoring.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite storage at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn millis_to_timestamp(millis: i64) -> StorageResult<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            StorageError::SerializationError(format!("timestamp out of range: {}", millis))
        })
    }

    fn event_from_row(row: &SqliteRow) -> StorageResult<MonitoringEvent> {
        let code: i32 = row.try_get("severity")?;
        let severity = Severity::from_code(code).ok_or_else(|| {
            StorageError::SerializationError(format!("unknown severity code: {}", code))
        })?;

        Ok(MonitoringEvent {
            id: row.try_get("id")?,
            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?)?,
            machine: row.try_get("machine")?,
            module: row.try_get("module")?,
            component: row.try_get("component")?,
            severity,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
        })
    }
}

#[async_trait]
impl MonitoringStorage for SqliteStorage {
    #[instrument(skip(self, events), fields(count = events.len()))]
    async fn store_batch(&self, events: &[MonitoringEvent]) -> StorageResult<Vec<i64>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(events.len());

        for event in events {
            let result = sqlx::query(
                r#"
                INSERT INTO monitoring_events (
                    timestamp, machine, module, component, severity, title, description
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(event.timestamp.timestamp_millis())
            .bind(&event.machine)
            .bind(&event.module)
            .bind(&event.component)
            .bind(event.severity.code())
            .bind(&event.title)
            .bind(&event.description)
            .execute(&mut *tx)
            .await?;

            ids.push(result.last_insert_rowid());
        }

        tx.commit().await?;

        debug!("stored {} events", ids.len());
        Ok(ids)
    }

    #[instrument(skip(self, query), fields(page_id = ?query.page_id, forward = query.forward))]
    async fn fetch(&self, query: &FetchQuery) -> StorageResult<Vec<MonitoringEvent>> {
        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_EVENTS);
        builder
            .push_bind(query.from.timestamp_millis())
            .push(" AND timestamp <= ")
            .push_bind(query.to.timestamp_millis());

        for (column, value) in [
            ("machine", &query.machine),
            ("module", &query.module),
            ("component", &query.component),
        ] {
            if let Some(value) = value {
                builder
                    .push(format!(" AND {} = ", column))
                    .push_bind(value.clone());
            }
        }

        if let Some(page_id) = query.page_id {
            let op = if query.forward { " AND id > " } else { " AND id < " };
            builder.push(op).push_bind(page_id);
        }

        builder
            .push(if query.forward {
                " ORDER BY id ASC LIMIT "
            } else {
                " ORDER BY id DESC LIMIT "
            })
            .push_bind(query.page_size as i64);

        let rows = builder.build().fetch_all(&self.pool).await?;
        let events = rows
            .iter()
            .map(Self::event_from_row)
            .collect::<StorageResult<Vec<_>>>()?;

        debug!("fetch returned {} events", events.len());
        Ok(events)
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        info!("cleaning up events older than {}", before);

        let result = sqlx::query("DELETE FROM monitoring_events WHERE timestamp < ?")
            .bind(before.timestamp_millis())
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old events", deleted);
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(HealthStatus {
                healthy: true,
                message: "SQLite storage operational".to_string(),
                metadata: HashMap::from([
                    ("backend".to_string(), "sqlite".to_string()),
                    ("db_path".to_string(), self.db_path.clone()),
                ]),
            }),
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> StorageResult<String> {
        let (total_rows, oldest, newest): (i64, Option<i64>, Option<i64>) = sqlx::query_as(
            "SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM monitoring_events",
        )
        .fetch_one(&self.pool)
        .await?;

        let file_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);
        let file_size_mb = file_size as f64 / 1_000_000.0;

        let time_range = match (oldest, newest) {
            (Some(old), Some(new)) => format!(
                "{} to {}",
                Self::millis_to_timestamp(old)?.format("%Y-%m-%d"),
                Self::millis_to_timestamp(new)?.format("%Y-%m-%d")
            ),
            _ => "no data".to_string(),
        };

        Ok(format!(
            "SQLite: {} events, {:.2} MB on disk, time range: {}",
            total_rows, file_size_mb, time_range
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite storage");
        self.pool.close().await;
        Ok(())
    }
}
