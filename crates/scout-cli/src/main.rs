use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scout_adapters::{FixtureSheetSource, GoogleSheetsSource, SheetSource, SheetsConfig};
use scout_enrich::{EnrichmentPipeline, OpenAiClient, OpenAiConfig};
use scout_store::RecordStore;
use scout_sync::SyncPipeline;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "scout")]
#[command(about = "Outreach pipeline: spreadsheet sync + company enrichment")]
struct Cli {
    /// Path to the SQLite database (defaults to SCOUT_DB_PATH, then
    /// ~/.scout/scout.db).
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ensure the database schema exists and exit.
    Init,
    /// Ensure the schema, then mirror every spreadsheet table into the store.
    Sync,
    /// Enrich unprocessed companies through the completion service.
    Enrich,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let store = open_store(cli.db_path)?;

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Init => {
            println!("schema ready");
        }
        Commands::Sync => {
            let source = sheet_source()?;
            let pipeline = SyncPipeline::new(store, source);
            let summary = pipeline.run_once().await;
            for table in &summary.tables {
                println!(
                    "{}: status={:?} incoming={} upserts={} (failed {}) deletes={} (failed {})",
                    table.table,
                    table.status,
                    table.incoming_rows,
                    table.upserts_attempted,
                    table.upserts_failed,
                    table.deletes_attempted,
                    table.deletes_failed
                );
            }
            println!("sync complete: run_id={}", summary.run_id);
        }
        Commands::Enrich => {
            let config = OpenAiConfig::from_env().context("loading completion configuration")?;
            let client = OpenAiClient::new(config)?;
            let pipeline = EnrichmentPipeline::new(store, Box::new(client));
            let summary = pipeline.run().await?;
            println!(
                "enrichment complete: run_id={} scanned={} enriched={} skipped={}",
                summary.run_id, summary.scanned, summary.enriched, summary.skipped
            );
        }
    }

    Ok(())
}

/// Opening the store also applies the idempotent schema, so every
/// subcommand starts from a ready database.
fn open_store(path: Option<PathBuf>) -> Result<RecordStore> {
    let path = match path.or_else(|| std::env::var("SCOUT_DB_PATH").ok().map(PathBuf::from)) {
        Some(path) => path,
        None => RecordStore::default_db_path()?,
    };
    info!(path = %path.display(), "opening record store");
    RecordStore::open(&path).with_context(|| format!("opening record store at {}", path.display()))
}

/// Live Sheets source by default; `SCOUT_SHEET_FIXTURES=<dir>` switches
/// to local fixture files for offline runs.
fn sheet_source() -> Result<Box<dyn SheetSource>> {
    if let Ok(dir) = std::env::var("SCOUT_SHEET_FIXTURES") {
        info!(dir, "using fixture sheet source");
        return Ok(Box::new(FixtureSheetSource::new(dir)));
    }
    let config = SheetsConfig::from_env().context("loading sheet configuration")?;
    Ok(Box::new(GoogleSheetsSource::new(config)?))
}
