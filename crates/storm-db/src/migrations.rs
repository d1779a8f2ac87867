//! Schema bootstrap
//!
//! Every statement is `IF NOT EXISTS`, so running the bootstrap against an
//! existing cluster is a no-op.

use crate::{DbConfig, DbError, DbResult};
use scylla::Session;
use tracing::{debug, info};

/// Table holding one row per (storm, cell) pair
pub const TRACKED_STORMS_TABLE: &str = "tracked_storms";

/// Statements creating the keyspace and tables, in execution order
pub fn statements(config: &DbConfig) -> Vec<String> {
    vec![
        format!(
            "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = \
             {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
            config.keyspace, config.replication_factor
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS {}.{} (
                radar_range_km double,
                storm_id text,
                timestamp bigint,
                x_pixels int,
                y_pixels int,
                width_pixels int,
                height_pixels int,
                area_sqpixels int,
                storm_area_km2 double,
                PRIMARY KEY ((radar_range_km, storm_id), timestamp)
            ) WITH CLUSTERING ORDER BY (timestamp ASC)"#,
            config.keyspace, TRACKED_STORMS_TABLE
        ),
    ]
}

/// Create the keyspace and tables if missing
pub async fn run_all(session: &Session, config: &DbConfig) -> DbResult<()> {
    info!("Bootstrapping schema in keyspace {}", config.keyspace);

    for statement in statements(config) {
        debug!("{}", statement);
        session
            .query_unpaged(statement, &[])
            .await
            .map_err(|e| DbError::migration(e.to_string()))?;
    }

    info!("Schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_are_idempotent() {
        let statements = statements(&DbConfig::default());
        assert_eq!(statements.len(), 2);
        assert!(statements.iter().all(|s| s.contains("IF NOT EXISTS")));
    }

    #[test]
    fn test_table_keyed_by_storm_and_timestamp() {
        let config = DbConfig {
            keyspace: "radar_test".to_string(),
            ..Default::default()
        };
        let table = &statements(&config)[1];
        assert!(table.contains("radar_test.tracked_storms"));
        assert!(table.contains("PRIMARY KEY ((radar_range_km, storm_id), timestamp)"));
        assert!(table.contains("area_sqpixels int"));
    }
}
