//! # Storm Runner
//!
//! Batch entry point for the storm tracking pipeline. Tracks the date given
//! as the first argument (`YYYY-MM-DD`), or the configured number of days
//! before today when no date is given.

mod config;

use crate::config::RunnerConfig;

use anyhow::Context;
use chrono::{Duration, Local, NaiveDate};
use std::sync::Arc;
use storm_db::DbClient;
use storm_telemetry::MetricsCollector;
use storm_tracker::{LocalObjectStore, StormPipeline};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RunnerConfig::load().context("failed to load configuration")?;
    init_logging(config.log_json);

    info!("Starting storm runner v{}", env!("CARGO_PKG_VERSION"));
    info!("   Store root: {}", config.store_root);
    info!("   Radar ranges: {:?}", config.pipeline.radar_ranges);

    let dates = match std::env::args().nth(1) {
        Some(arg) => vec![
            NaiveDate::parse_from_str(&arg, "%Y-%m-%d")
                .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", arg))?,
        ],
        None => catchup_dates(Local::now().date_naive(), config.catchup_days),
    };

    let store = Arc::new(LocalObjectStore::new(&config.store_root));
    let mut pipeline = StormPipeline::new(config.pipeline.clone(), store)?;

    let metrics = Arc::new(MetricsCollector::new()?);
    pipeline.set_metrics(metrics.clone());

    if config.db_enabled {
        match DbClient::new(config.db.clone()).await {
            Ok(db) => {
                if db.health_check().await? {
                    info!("Database connected");
                } else {
                    warn!("Database health check failed, inserts may fail");
                }
                pipeline.set_database(Arc::new(db));
            }
            Err(e) => {
                error!("Failed to connect to database: {}", e);
                info!("Running without persistence");
            }
        }
    }

    let mut failed = 0;
    for date in dates {
        let report = pipeline.process_date(date).await?;
        for session in &report.sessions {
            match &session.result {
                Ok(summary) => info!(
                    "{} {}: {} storms, {} rows ({} frames skipped)",
                    date, session.radar_range, summary.tracks, summary.rows, summary.frames_skipped
                ),
                Err(e) => error!("{} {}: {}", date, session.radar_range, e),
            }
        }
        failed += report.failed();
    }

    if let Some(path) = &config.metrics_file {
        std::fs::write(path, metrics.render()?)
            .with_context(|| format!("failed to write metrics to {}", path))?;
        info!("Metrics written to {}", path);
    }

    if failed > 0 {
        anyhow::bail!("{} tracking sessions failed", failed);
    }
    Ok(())
}

/// The `days` dates before `today`, oldest first
fn catchup_dates(today: NaiveDate, days: u32) -> Vec<NaiveDate> {
    (1..=days as i64)
        .rev()
        .map(|offset| today - Duration::days(offset))
        .collect()
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,storm_tracker=debug,storm_cv=info"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catchup_dates() {
        let today = NaiveDate::from_ymd_opt(2024, 11, 3).unwrap();
        assert_eq!(
            catchup_dates(today, 3),
            vec![
                NaiveDate::from_ymd_opt(2024, 10, 31).unwrap(),
                NaiveDate::from_ymd_opt(2024, 11, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 11, 2).unwrap(),
            ]
        );
        assert!(catchup_dates(today, 0).is_empty());
    }
}
