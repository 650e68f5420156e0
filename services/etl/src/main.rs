//! ETL Service - Builds the orders star schema
//!
//! Responsibilities:
//! - Extract orders, customers and employees from the relational source
//!   and the spreadsheet exports
//! - Harmonize column names and build the six dimensions
//! - Assemble the order fact table (one row per order and territory)
//! - Check consistency, then load dimensions and facts in one transaction
//!
//! Every run is a full refresh. Same sources = same star schema.

mod checks;
mod config;
mod dims;
mod error;
mod extract;
mod facts;
mod harmonize;
mod ledger;
mod load;
mod pipeline;
mod rows;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use config::{load_sources_config, Config, SourcesConfig};
use dims::FirstTokenGivenName;
use extract::{extract_relational, extract_spreadsheets};
use load::{LoadSummary, PgWarehouse};
use pipeline::{transform, DateOverrides, StarSchema};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "etl", about = "Builds the orders star schema from the relational and spreadsheet sources")]
struct Args {
    /// Sources config JSON (relational table and spreadsheet file names)
    #[arg(long)]
    config: Option<PathBuf>,

    /// First day of the date dimension (YYYY-MM-DD)
    #[arg(long)]
    date_start: Option<NaiveDate>,

    /// Last day of the date dimension (YYYY-MM-DD)
    #[arg(long)]
    date_end: Option<NaiveDate>,

    /// Dry run - extract, transform and check without loading
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Load even when consistency checks fail
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "etl=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Extract, transform and check; nothing here touches the warehouse
async fn build(config: &Config, sources: &SourcesConfig, args: &Args) -> Result<StarSchema> {
    let mut sql = extract_relational(&config.source_db_url, &sources.relational).await?;
    let mut xls = extract_spreadsheets(&sources.spreadsheets.resolve(&config.spreadsheet_dir));

    sql.harmonize();
    xls.harmonize();
    checks::source_overlap(&sql, &xls);

    let dates = DateOverrides {
        start: args.date_start,
        end: args.date_end,
    };
    let schema = transform(&sql, &xls, dates, &FirstTokenGivenName)?;

    let report = checks::run_checks(&schema, &sql, &xls, dates);
    report.log();
    if args.skip_checks {
        if !report.passed() {
            warn!(
                failures = report.failures.len(),
                "consistency checks failed but --skip-checks is set; loading anyway"
            );
        }
    } else {
        report.into_result()?;
    }

    info!("pre-load summary");
    for (table, rows) in schema.table_counts() {
        info!(table, rows, "ready to load");
    }
    Ok(schema)
}

async fn run(config: &Config, sources: &SourcesConfig, args: &Args, pool: Option<&PgPool>) -> Result<LoadSummary> {
    let schema = build(config, sources, args).await?;

    let Some(pool) = pool else {
        info!("dry run - nothing loaded");
        return Ok(LoadSummary::default());
    };
    let warehouse = PgWarehouse::begin(pool).await?;
    load::load(warehouse, &schema).await
}

/// The run's own outcome; a failed ledger update is only logged
fn run_outcome(result: Result<LoadSummary>, finished: Result<()>) -> Result<LoadSummary> {
    if let Err(e) = finished {
        warn!(error = %format!("{e:#}"), "failed to finish run in ledger");
    }
    result
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let result = try_main().await;
    if let Err(e) = &result {
        error!("{e:#}");
    }
    result
}

async fn try_main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_env(!args.dry_run)?;
    let sources = match &args.config {
        Some(path) => load_sources_config(path)?,
        None => SourcesConfig::default(),
    };

    info!(
        mode = if args.dry_run { "dry-run" } else { "live" },
        spreadsheet_dir = %config.spreadsheet_dir.display(),
        "=== Orders ETL ==="
    );

    let pool = match &config.warehouse_db_url {
        Some(url) if !args.dry_run => Some(
            PgPoolOptions::new()
                .max_connections(2)
                .connect(url)
                .await
                .context("Failed to connect to warehouse database")?,
        ),
        _ => None,
    };

    // Create run
    let run_id = match &pool {
        Some(pool) => Some(
            ledger::create_run(
                pool,
                serde_json::json!({
                    "date_start": args.date_start,
                    "date_end": args.date_end,
                    "skip_checks": args.skip_checks,
                }),
            )
            .await?,
        ),
        None => None,
    };

    let result = run(&config, &sources, &args, pool.as_ref()).await;

    // Finish run
    let result = match (&pool, run_id) {
        (Some(pool), Some(run_id)) => {
            let finished = match &result {
                Ok(summary) => ledger::finish_run(pool, run_id, "ok", None, summary.to_json()).await,
                Err(e) => {
                    ledger::finish_run(pool, run_id, "failed", Some(&format!("{e:#}")), serde_json::json!({}))
                        .await
                }
            };
            run_outcome(result, finished)
        }
        _ => result,
    };

    let summary = result?;
    for table in &summary.tables {
        info!(
            table = table.table,
            inserted = table.inserted,
            skipped = table.skipped,
            "load summary"
        );
    }
    info!(run_id = ?run_id, inserted = summary.inserted(), "=== ETL complete ===");
    Ok(())
}
