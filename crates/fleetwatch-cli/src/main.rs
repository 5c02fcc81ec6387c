use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use fleetwatch_client::{BrowserSession, BrowserSessionConfig};
use fleetwatch_core::models::Record;
use fleetwatch_core::{DatasetKind, Orchestrator, Settings};

#[derive(Parser)]
#[command(name = "fleetwatch", version, about = "Fleet dashboard scraper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in once, scrape the configured datasets and print the records
    Cycle {
        /// Path to the JSON configuration file
        #[arg(short, long, env = "FLEETWATCH_CONFIG", default_value = "config.json")]
        config: PathBuf,

        /// Only scrape this dataset ("gps" or "alarm")
        #[arg(short, long)]
        kind: Option<DatasetKind>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Json)]
        format: Format,

        /// Show the browser window instead of running headless
        #[arg(long, default_value_t = false)]
        show_browser: bool,
    },

    /// Check a configuration file without contacting the dashboard
    Validate {
        /// Path to the JSON configuration file
        #[arg(short, long, env = "FLEETWATCH_CONFIG", default_value = "config.json")]
        config: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Csv,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fleetwatch=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Cycle {
            config,
            kind,
            format,
            show_browser,
        } => cmd_cycle(&config, kind, format, show_browser).await,
        Commands::Validate { config } => cmd_validate(&config),
    }
}

fn load_settings(path: &Path) -> Result<Settings> {
    Settings::load(path).with_context(|| format!("Failed to load config: {}", path.display()))
}

async fn cmd_cycle(
    config: &Path,
    kind: Option<DatasetKind>,
    format: Format,
    show_browser: bool,
) -> Result<()> {
    let mut settings = load_settings(config)?;
    if show_browser {
        settings.headless = false;
    }

    let remote = BrowserSession::new(BrowserSessionConfig::from_settings(&settings));
    let orchestrator = Orchestrator::new(remote, &settings);

    tracing::info!("Logging in to {}", settings.url_login);
    let report = orchestrator.refresh(kind).await;
    orchestrator.shutdown().await;
    let report = report.map_err(|e| anyhow::anyhow!(e))?;

    if let Some(e) = &report.session_error {
        anyhow::bail!("No session: {e}");
    }

    for (kind, result) in &report.outcomes {
        match result {
            Ok(outcome) => tracing::info!(
                %kind,
                records = outcome.records,
                dropped = outcome.dropped,
                "Scraped"
            ),
            Err(e) => tracing::warn!(%kind, error = %e, "Scrape failed"),
        }
    }

    let mut out = std::io::stdout().lock();
    for schema in settings.schemas() {
        if kind.is_some_and(|k| k != schema.kind) {
            continue;
        }
        let Some(snapshot) = orchestrator.snapshot(schema.kind) else {
            continue;
        };
        match format {
            Format::Json => {
                let mut value = serde_json::Map::new();
                value.insert(
                    schema.kind.data_key().to_string(),
                    serde_json::to_value(&snapshot.records)?,
                );
                writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
            }
            Format::Csv => write_csv(&mut out, &schema.columns, &snapshot.records)?,
        }
    }

    if report.failed() > 0 {
        anyhow::bail!("{} of {} datasets failed", report.failed(), report.outcomes.len());
    }
    Ok(())
}

fn cmd_validate(config: &Path) -> Result<()> {
    let settings = load_settings(config)?;

    println!("{} is valid", config.display());
    println!("  login page: {}", settings.url_login);
    println!("  poll interval: {}s", settings.poll_interval_seconds);
    for schema in settings.schemas() {
        println!(
            "  {}: #{} ({} columns)",
            schema.kind,
            schema.view_id,
            schema.columns.len()
        );
    }
    Ok(())
}

/// Writes `records` as CSV with one column per schema column, in schema order.
fn write_csv<W: Write>(out: W, columns: &[String], records: &[Record]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(columns)?;
    for record in records {
        writer.write_record(
            columns
                .iter()
                .map(|c| record.get(c).map(String::as_str).unwrap_or("")),
        )?;
    }
    writer.flush()?;
    Ok(())
}
