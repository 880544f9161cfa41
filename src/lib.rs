pub mod config;
pub mod database;
pub mod diagnostics;
pub mod error;
pub mod settings;

use anyhow::{Context, Result};
use config::AppConfig;
use database::{admin, ManagerRegistry};
use serde::Serialize;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize)]
struct StartupReport {
    diagnostics: diagnostics::DiagnosticsReport,
    database: database::DatabaseStats,
}

/// Install the log subscriber. `RUST_LOG` overrides the default `info` level.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Already installed (tests, embedding host): keep the existing one
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Startup sequence for the hosting process: load configuration, bind the
/// database, make sure the settings table exists, report, then release every
/// connection before returning.
pub fn run() -> Result<()> {
    init_logging();

    let project_dir = std::env::current_dir().context("Failed to resolve project directory")?;
    let config = AppConfig::load(&project_dir)?;

    if let Some(parent) = config.database_file.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let registry = Arc::new(ManagerRegistry::new(&config));
    let result = startup_report(&registry, &config);
    registry.shutdown();

    let report = result?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn startup_report(registry: &ManagerRegistry, config: &AppConfig) -> Result<StartupReport> {
    let conn = registry
        .get_db_connection(None)
        .context("Database is unavailable")?;

    settings::ensure_schema(&conn).context("Failed to create settings table")?;

    let db_path = config.database_file.clone();
    let stats = admin::database_stats(&conn, &db_path, &config.backup_dir())?;
    tracing::info!(
        tables = stats.table_count,
        records = stats.total_records,
        size_mb = stats.total_size_mb,
        "Media library database ready at {}",
        db_path.display()
    );

    Ok(StartupReport {
        diagnostics: diagnostics::diagnostics_report(registry),
        database: stats,
    })
}
