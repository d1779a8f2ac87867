//! # Storm DB - ScyllaDB Integration
//!
//! Persistence of tracked storm cells. Inserts are lightweight transactions
//! (`IF NOT EXISTS`) keyed by `((radar_range_km, storm_id), timestamp)`, so
//! re-running a session never duplicates rows.

pub mod error;
pub mod migrations;

pub use error::{DbError, DbResult};

use scylla::prepared_statement::PreparedStatement;
use scylla::{Session, SessionBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use storm_core::TrackedCellRow;
use tracing::{debug, info, warn};

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub hosts: Vec<String>,
    pub keyspace: String,
    pub replication_factor: u32,
    pub connection_timeout_secs: u64,
    /// Create the keyspace and tables on connect
    pub bootstrap_schema: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["127.0.0.1:9042".to_string()],
            keyspace: "storm_tracking".to_string(),
            replication_factor: 1,
            connection_timeout_secs: 10,
            bootstrap_schema: true,
        }
    }
}

impl DbConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.hosts.is_empty() {
            return Err(DbError::configuration("at least one host is required"));
        }
        let valid_keyspace = !self.keyspace.is_empty()
            && self.keyspace.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_keyspace {
            return Err(DbError::configuration(format!(
                "invalid keyspace name '{}'",
                self.keyspace
            )));
        }
        Ok(())
    }
}

/// Main database client
pub struct DbClient {
    session: Arc<Session>,
    config: DbConfig,
    storms: StormTrackRepository,
}

impl DbClient {
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        config.validate()?;
        info!("Connecting to ScyllaDB cluster: {:?}", config.hosts);

        let session = SessionBuilder::new()
            .known_nodes(&config.hosts)
            .connection_timeout(config.connection_timeout())
            .build()
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        if config.bootstrap_schema {
            migrations::run_all(&session, &config).await?;
        }

        session
            .use_keyspace(&config.keyspace, false)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let session = Arc::new(session);
        let storms = StormTrackRepository::prepare(session.clone()).await?;
        info!("Connected to ScyllaDB keyspace {}", config.keyspace);

        Ok(Self {
            session,
            config,
            storms,
        })
    }

    pub fn session(&self) -> Arc<Session> {
        self.session.clone()
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn storms(&self) -> &StormTrackRepository {
        &self.storms
    }

    pub async fn health_check(&self) -> DbResult<bool> {
        let result = self
            .session
            .query_unpaged("SELECT now() FROM system.local", &[])
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Database health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

// ============================================================================
// REPOSITORY
// ============================================================================

const INSERT_TRACKED_STORM: &str = r#"
    INSERT INTO tracked_storms (
        radar_range_km, storm_id, timestamp, x_pixels, y_pixels,
        width_pixels, height_pixels, area_sqpixels, storm_area_km2
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
    IF NOT EXISTS
"#;

/// Bind values of one tracked-storm row, in statement column order
pub type TrackedStormValues<'a> = (f64, &'a str, i64, i32, i32, i32, i32, i32, f64);

/// Bind values for a row; timestamps are stored as epoch milliseconds of the
/// naive frame time
pub fn bind_values(row: &TrackedCellRow) -> TrackedStormValues<'_> {
    (
        row.radar_range_km,
        row.storm_id.as_str(),
        row.timestamp.and_utc().timestamp_millis(),
        row.x_pixels as i32,
        row.y_pixels as i32,
        row.width_pixels as i32,
        row.height_pixels as i32,
        row.area_sqpixels as i32,
        row.storm_area_km2,
    )
}

/// Repository for tracked storm rows
#[derive(Clone)]
pub struct StormTrackRepository {
    session: Arc<Session>,
    insert: PreparedStatement,
}

impl StormTrackRepository {
    pub async fn prepare(session: Arc<Session>) -> DbResult<Self> {
        let insert = session
            .prepare(INSERT_TRACKED_STORM)
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;
        Ok(Self { session, insert })
    }

    /// Insert one row unless its key already exists
    pub async fn insert(&self, row: &TrackedCellRow) -> DbResult<()> {
        self.session
            .execute_unpaged(&self.insert, bind_values(row))
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;
        Ok(())
    }

    /// Insert rows in order, stopping at the first failure
    ///
    /// Returns the number of rows submitted.
    pub async fn insert_rows(&self, rows: &[TrackedCellRow]) -> DbResult<usize> {
        for row in rows {
            self.insert(row).await?;
        }
        debug!("Submitted {} tracked storm rows", rows.len());
        Ok(rows.len())
    }
}

// ============================================================================
// TESTS
// ============================================================================
