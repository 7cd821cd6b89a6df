//! SQLite measurement store
//!
//! Persistent implementation of [`MeasurementStore`] backed by a local
//! SQLite file. Measurements are stored as JSON payloads in an append-only
//! table indexed by (instance_name, recorded_at).
//!
//! ## Limitations
//!
//! - **Concurrency**: limited concurrent writes; fine for a single engine
//!   process with low write contention
//! - **Distributed**: single-machine only

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use crate::Measurement;

use super::backend::MeasurementStore;
use super::error::{StoreError, StoreResult};

/// SQLite-backed measurement store
pub struct SqliteMeasurementStore {
    pool: Pool<Sqlite>,
}

impl SqliteMeasurementStore {
    /// Open (or create) the database file and prepare the schema.
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite measurement store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS measurements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instance_name TEXT NOT NULL,
                recorded_at INTEGER NOT NULL,
                payload TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_measurements_instance_time
            ON measurements (instance_name, recorded_at)
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl MeasurementStore for SqliteMeasurementStore {
    #[instrument(skip(self, measurement))]
    async fn put(&self, instance_name: &str, measurement: Measurement) -> StoreResult<()> {
        let payload = serde_json::to_string(&measurement)?;

        sqlx::query(
            r#"
            INSERT INTO measurements (instance_name, recorded_at, payload)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(instance_name)
        .bind(Utc::now().timestamp_millis())
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn query(
        &self,
        instance_name: &str,
        max_values: usize,
        filter: Option<&str>,
    ) -> StoreResult<Vec<Measurement>> {
        let re = filter.and_then(|expr| match Regex::new(expr) {
            Ok(re) => Some(re),
            Err(e) => {
                debug!("ignoring unparsable filter expression {expr:?}: {e}");
                None
            }
        });

        // Without a filter the limit can be pushed into SQL; with one, the
        // filter applies before the limit, so rows stream out until enough
        // payloads match.
        let sql = if re.is_some() {
            r#"
            SELECT payload FROM measurements
            WHERE instance_name = ?
            ORDER BY recorded_at DESC, id DESC
            "#
            .to_string()
        } else {
            format!(
                r#"
                SELECT payload FROM measurements
                WHERE instance_name = ?
                ORDER BY recorded_at DESC, id DESC
                LIMIT {max_values}
                "#
            )
        };

        let rows = sqlx::query(&sql)
            .bind(instance_name)
            .fetch_all(&self.pool)
            .await?;

        let mut measurements = Vec::new();
        for row in rows {
            if measurements.len() >= max_values {
                break;
            }

            let payload: String = row.try_get("payload")?;
            let measurement: Measurement = serde_json::from_str(&payload)?;

            if re.as_ref().is_none_or(|re| re.is_match(&payload)) {
                measurements.push(measurement);
            }
        }

        Ok(measurements)
    }
}
