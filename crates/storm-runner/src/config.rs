//! Runner configuration

use serde::Deserialize;
use storm_db::DbConfig;
use storm_tracker::PipelineConfig;

/// Runner configuration
///
/// Loaded from an optional `storm.toml` and `STORM__*` environment
/// variables, e.g. `STORM__CATCHUP_DAYS=5` or `STORM__DB__KEYSPACE=radar`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Local directory standing in for the object store bucket
    pub store_root: String,
    /// Days before today processed when no date is given
    pub catchup_days: u32,
    /// Emit JSON log lines
    pub log_json: bool,
    /// Write Prometheus text exposition here after the run
    pub metrics_file: Option<String>,
    /// Persist tracked storms to ScyllaDB
    pub db_enabled: bool,
    pub db: DbConfig,
    pub pipeline: PipelineConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            store_root: "data".to_string(),
            catchup_days: 3,
            log_json: false,
            metrics_file: None,
            db_enabled: false,
            db: DbConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Load configuration from `storm.toml` and the environment
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::with_name("storm").required(false))
            .add_source(environment())
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

/// `STORM__*` variables; list keys take comma-separated values
fn environment() -> config::Environment {
    config::Environment::with_prefix("STORM")
        .prefix_separator("__")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("pipeline.radar_ranges")
        .with_list_parse_key("db.hosts")
        .try_parsing(true)
}
