mod manifest;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use manifest::Manifest;
use meeting_core::{CrawlWindow, ReconcileConfig, newsletter_sections};
use publish::OutputPaths;
use schemars::schema_for;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "meetings")]
#[command(about = "Municipal meeting reconciliation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export canonical JSON Schemas to the ./schemas directory
    Schema {
        #[command(subcommand)]
        command: SchemaCommands,
    },
    /// Reconcile fetched payloads into JSON and ICS collections
    Reconcile {
        /// JSON manifest written by the fetch layer
        #[arg(long)]
        manifest: PathBuf,
        /// TOML or YAML config (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value = "out")]
        out_dir: PathBuf,
        #[arg(long, default_value = "meetings")]
        basename: String,
        /// SQLite store of earlier runs; read before and updated after
        #[arg(long)]
        db: Option<PathBuf>,
        /// Anchor date of the crawl window (default: today)
        #[arg(long)]
        today: Option<NaiveDate>,
        /// Keep meetings outside the crawl window
        #[arg(long)]
        no_window: bool,
    },
    /// Print the newsletter's past-week and upcoming sections as JSON
    Newsletter {
        /// Collection written by `reconcile`
        #[arg(long)]
        input: PathBuf,
        /// Reference instant (default: now)
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
}

#[derive(Subcommand)]
enum SchemaCommands {
    /// Export JSON Schema files for canonical types
    Export {
        /// Output directory (default: ./schemas)
        #[arg(long, default_value = "schemas")]
        out_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Schema { command } => match command {
            SchemaCommands::Export { out_dir } => schema_export(out_dir),
        },
        Commands::Reconcile {
            manifest,
            config,
            out_dir,
            basename,
            db,
            today,
            no_window,
        } => {
            let config = match config {
                Some(path) => ReconcileConfig::load(&path)?,
                None => ReconcileConfig::default(),
            };
            let today = today.unwrap_or_else(|| Local::now().date_naive());
            let window = (!no_window).then(|| CrawlWindow::from_config(today, &config.crawl_window));
            reconcile(&config, &manifest, &OutputPaths::new(out_dir, &basename), db.as_deref(), window)
        }
        Commands::Newsletter { input, now } => newsletter(&input, now.unwrap_or_else(Utc::now)),
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn schema_export(out_dir: PathBuf) -> Result<()> {
    fs::create_dir_all(&out_dir)?;

    let schemas = [
        ("CanonicalMeetingRecord", schema_for!(meeting_core::CanonicalMeetingRecord)),
        ("PartialMeetingRecord", schema_for!(meeting_core::PartialMeetingRecord)),
        ("AgendaItem", schema_for!(meeting_core::AgendaItem)),
        ("VoteRecord", schema_for!(meeting_core::VoteRecord)),
    ];
    for (name, schema) in schemas {
        let json = serde_json::to_string_pretty(&schema)?;
        fs::write(out_dir.join(format!("{name}.schema.json")), json)?;
    }

    println!("Exported schemas to {}", out_dir.display());
    Ok(())
}

fn reconcile(
    config: &ReconcileConfig,
    manifest_path: &Path,
    paths: &OutputPaths,
    db: Option<&Path>,
    window: Option<CrawlWindow>,
) -> Result<()> {
    let manifest_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    let mut input = Manifest::load(manifest_path)?.into_input(manifest_dir)?;

    let mut store = match db {
        Some(path) => Some(publish::store::open(path)?),
        None => None,
    };
    if let Some(conn) = &store {
        input.prior = publish::store::load_meetings(conn)?;
        info!(prior = input.prior.len(), "loaded stored meetings");
    }

    let report = meeting_core::run(config, input, window).context("reconciliation failed")?;
    for failure in &report.source_failures {
        warn!(%failure, "source skipped");
    }
    for dropped in &report.dropped {
        warn!(key = %dropped.key, reason = %dropped.reason, "meeting dropped");
    }
    for warning in &report.document_warnings {
        warn!(%warning, "document extraction");
    }
    for next in &report.next_pages {
        info!(%next, "listing has more pages");
    }

    publish::publish_all(&report.meetings, paths, Utc::now())?;
    if let Some(conn) = store.as_mut() {
        publish::store::upsert_meetings(conn, &report.meetings)?;
    }

    println!(
        "Reconciled {} meetings into {}",
        report.meetings.len(),
        paths.root.display()
    );
    Ok(())
}

fn newsletter(input: &Path, now: DateTime<Utc>) -> Result<()> {
    let records = publish::json::read_json(input)?;
    let sections = newsletter_sections(&records, now);
    println!("{}", serde_json::to_string_pretty(&sections)?);
    Ok(())
}
