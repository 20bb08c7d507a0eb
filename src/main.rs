use analytics::PerformanceReport;
use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use configuration::{LogFormat, init_tracing, load_config_from};
use core_types::{PoolStatus, QueryParams, Record};
use database::{MigrationReport, Store};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// The main entry point for the Strata command line.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let cli = Cli::parse();

    let mut config = load_config_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    let _log_guard = init_tracing(&config.logging).context("Failed to initialize logging")?;

    let store = Arc::new(Store::from_config(&config).context("Invalid database configuration")?);
    let migrations = store.setup().await.context("Store setup failed")?;

    // Execute the appropriate command, then close the pool whatever the outcome
    let outcome = run(&store, cli.command, &migrations).await;
    store.shutdown().await;
    outcome
}

async fn run(store: &Arc<Store>, command: Commands, migrations: &MigrationReport) -> anyhow::Result<()> {
    match command {
        Commands::Setup => {
            print_migrations(migrations);
            println!("Live schema matches {} declared table(s).", store.schema().tables.len());
        }
        Commands::Status => {
            let status = store.get_pool_status()?;
            println!("{}", pool_table(&status));
        }
        Commands::Store(args) => handle_store(store, args).await?,
        Commands::Retrieve(args) => handle_retrieve(store, args).await?,
        Commands::Import(args) => handle_import(store.clone(), args).await?,
        Commands::Report { json } => {
            store.validate_schema().await?;
            let report = store.get_performance_report();
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
    }
    Ok(())
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Validated, pooled, multi-backend persistence from the command line.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Overrides the configured log output format.
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the pool, apply migrations and check the live schema.
    Setup,
    /// Print the connection pool status.
    Status,
    /// Validate and store one record.
    Store(StoreArgs),
    /// Query a table and print matching records as JSON lines.
    Retrieve(RetrieveArgs),
    /// Store every record of a JSON-lines file concurrently.
    Import(ImportArgs),
    /// Print the performance report.
    Report {
        /// Print the report as JSON instead of tables.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Parser)]
struct StoreArgs {
    /// Target table; defaults to the configured default table.
    #[arg(long)]
    table: Option<String>,

    /// The record as a JSON object, e.g. '{"id": 1, "name": "Ada"}'.
    #[arg(long)]
    json: String,
}

#[derive(Parser)]
struct RetrieveArgs {
    #[arg(long)]
    table: String,

    /// Equality filter as a JSON object; null matches IS NULL.
    #[arg(long)]
    filter: Option<String>,

    /// Comma-separated projection.
    #[arg(long, value_delimiter = ',')]
    columns: Option<Vec<String>>,

    #[arg(long)]
    order_by: Option<String>,

    #[arg(long)]
    descending: bool,

    #[arg(long)]
    limit: Option<u32>,
}

#[derive(Parser)]
struct ImportArgs {
    #[arg(long)]
    table: Option<String>,

    /// A file holding one JSON object per line.
    #[arg(long)]
    file: PathBuf,

    /// How many records are stored at once.
    #[arg(long, default_value_t = 8)]
    concurrency: usize,
}

// ==============================================================================
// Command Logic
// ==============================================================================

fn parse_record(json: &str) -> anyhow::Result<Record> {
    match serde_json::from_str::<Value>(json).context("Input is not valid JSON")? {
        Value::Object(record) => Ok(record),
        other => bail!("Expected a JSON object, found {other}"),
    }
}

async fn handle_store(store: &Store, args: StoreArgs) -> anyhow::Result<()> {
    let record = parse_record(&args.json)?;
    let rows = store
        .store_with_validation(&record, args.table.as_deref())
        .await?;
    println!("Stored {rows} row(s).");
    Ok(())
}

async fn handle_retrieve(store: &Store, args: RetrieveArgs) -> anyhow::Result<()> {
    let mut params = QueryParams::table(args.table);
    if let Some(filter) = &args.filter {
        params.filter = parse_record(filter).context("Invalid --filter")?;
    }
    params.columns = args.columns;
    params.order_by = args.order_by;
    params.descending = args.descending;
    params.limit = args.limit;

    for record in store.retrieve_with_validation(&params).await? {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

/// Parses every line up front so a malformed file stores nothing, then
/// stores records with bounded concurrency.
async fn handle_import(store: Arc<Store>, args: ImportArgs) -> anyhow::Result<()> {
    let contents = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;

    let mut records = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_record(line).with_context(|| format!("Line {}", index + 1))?;
        records.push((index + 1, record));
    }

    // Set up the progress bar
    let progress_bar = ProgressBar::new(records.len() as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
            .progress_chars("#>-"),
    );

    let table = args.table;
    let results: Vec<(usize, Result<u64, database::DbError>)> = stream::iter(records)
        .map(|(line, record)| {
            let store = store.clone();
            let table = table.clone();
            let progress_bar = progress_bar.clone();
            async move {
                let result = store.store_with_validation(&record, table.as_deref()).await;
                progress_bar.inc(1);
                (line, result)
            }
        })
        .buffer_unordered(args.concurrency.max(1))
        .collect()
        .await;

    progress_bar.finish_with_message("Import complete!");

    let mut failed = 0usize;
    for (line, result) in &results {
        if let Err(e) = result {
            failed += 1;
            tracing::warn!(line, error = %e, "Record was not stored.");
        }
    }
    println!("Stored {} of {} record(s).", results.len() - failed, results.len());
    if failed > 0 {
        bail!("{failed} record(s) failed to import");
    }
    Ok(())
}

// ==============================================================================
// Output
// ==============================================================================

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn print_migrations(report: &MigrationReport) {
    let list = |versions: &[core_types::MigrationVersion]| {
        versions.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    };
    println!(
        "Applied {} migration(s) [{}], skipped {} [{}] in {:.1} ms.",
        report.applied.len(),
        list(&report.applied),
        report.skipped.len(),
        list(&report.skipped),
        report.duration_ms
    );
}

fn pool_table(status: &PoolStatus) -> Table {
    let mut table = new_table(vec!["Metric", "Value"]);
    table
        .add_row(vec!["active".to_string(), status.active.to_string()])
        .add_row(vec!["idle".to_string(), status.idle.to_string()])
        .add_row(vec!["size".to_string(), status.size.to_string()])
        .add_row(vec!["waiting".to_string(), status.waiting.to_string()])
        .add_row(vec![
            "bounds".to_string(),
            format!("{}..={}", status.min_connections, status.max_connections),
        ])
        .add_row(vec!["total acquired".to_string(), status.total_acquired.to_string()])
        .add_row(vec!["total released".to_string(), status.total_released.to_string()])
        .add_row(vec!["failed acquires".to_string(), status.failed_acquires.to_string()])
        .add_row(vec![
            "avg acquire (ms)".to_string(),
            format!("{:.2}", status.avg_acquire_time_ms),
        ])
        .add_row(vec!["peak active".to_string(), status.peak_active.to_string()])
        .add_row(vec!["evicted".to_string(), status.evicted.to_string()]);
    table
}

fn print_report(report: &PerformanceReport) {
    let mut summary = new_table(vec!["Operations", "Failed", "Avg (ms)", "p95 (ms)", "Max (ms)", "Health"]);
    summary.add_row(vec![
        report.total_operations.to_string(),
        report.failed_operations.to_string(),
        format!("{:.2}", report.avg_duration_ms),
        format!("{:.2}", report.p95_duration_ms),
        format!("{:.2}", report.max_duration_ms),
        format!("{:.1}", report.health.score),
    ]);
    println!("{summary}");

    let mut health = new_table(vec!["Query latency", "Connection latency", "Cache hit rate", "Error rate"]);
    health.add_row(vec![
        format!("{:.1}", report.health.query_latency),
        format!("{:.1}", report.health.connection_latency),
        format!("{:.1}", report.health.cache_hit_rate),
        format!("{:.1}", report.health.error_rate),
    ]);
    println!("{health}");

    if !report.by_operation.is_empty() {
        let mut operations = new_table(vec!["Operation", "Count", "Failed", "Avg (ms)", "Max (ms)"]);
        for op in &report.by_operation {
            operations.add_row(vec![
                op.operation.to_string(),
                op.count.to_string(),
                op.failed.to_string(),
                format!("{:.2}", op.avg_ms),
                format!("{:.2}", op.max_ms),
            ]);
        }
        println!("{operations}");
    }

    if !report.slow_queries.is_empty() {
        let mut slow = new_table(vec!["Pattern", "Count", "Avg (ms)", "Max (ms)"]);
        for query in &report.slow_queries {
            slow.add_row(vec![
                query.pattern.clone(),
                query.count.to_string(),
                format!("{:.2}", query.avg_ms),
                format!("{:.2}", query.max_ms),
            ]);
        }
        println!("{slow}");
    }

    if let Some(pool) = &report.pool {
        println!("{}", pool_table(pool));
    }
    for recommendation in &report.recommendations {
        println!("Recommendation: {}", recommendation.message);
    }
}
