//! Daybook CLI
//!
//! Operator commands for a daybook store:
//! - Inspect and steer index maintenance (status, rebuild, backfill, verify)
//! - Add entities and records
//! - Read days and summaries

use anyhow::{bail, Context};
use chrono::{DateTime, FixedOffset, Local};
use clap::{Parser, Subcommand, ValueEnum};
use daybook::config::{generate_default_config, Backend, Config, LoggingConfig};
use daybook::engine::{Engine, SummaryScope};
use daybook::storage::{DayKey, EntityConfig, KvStore, MemoryStore, NewRecord, Record, SqliteStore};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "daybook")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Day-keyed record store with incremental indexes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory (overrides config)
    #[arg(long, global = true)]
    pub data_dir: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show index coverage and fallback state
    Status,

    /// Drop all indexes and rebuild the recent window
    Rebuild,

    /// Index older history
    Backfill {
        /// Days per chunk (default: from config)
        #[arg(long)]
        chunk_days: Option<u32>,
        /// Keep going until complete instead of doing one chunk
        #[arg(long)]
        all: bool,
    },

    /// Compare indexes against the record store
    Verify,

    /// Pause background backfill
    Pause,

    /// Resume background backfill
    Resume,

    /// Manage entities
    Entity {
        #[command(subcommand)]
        action: EntityCommand,
    },

    /// Add a record
    Add {
        /// Entity id
        entity: String,
        /// When it happened, RFC 3339 (default: now)
        #[arg(long)]
        at: Option<String>,
        /// Duration in minutes
        #[arg(short, long, default_value = "0")]
        duration: i64,
        /// Intensity 1-10
        #[arg(short, long)]
        intensity: Option<u8>,
        /// Free-form note
        #[arg(short, long)]
        note: Option<String>,
    },

    /// List the records of one day
    Day {
        /// Day as YYYYMMDD
        day: String,
    },

    /// Show daily summaries of one entity (or "all")
    Summary {
        entity: String,
        /// First day, YYYYMMDD
        start: String,
        /// Last day, YYYYMMDD (default: start)
        end: Option<String>,
    },

    /// Generate default config file
    InitConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum EntityCommand {
    /// Register an entity
    Add { id: String, name: String },
    /// List entities
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("Failed to write {:?}", path))?;
                println!("Wrote {:?}", path);
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(data_dir) = &cli.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    init_logging(&config.logging)?;

    let store: Box<dyn KvStore> = match config.storage.backend {
        Backend::Sqlite => Box::new(SqliteStore::open(&config.storage.data_path())?),
        Backend::Memory => {
            tracing::warn!("Using the in-memory backend; nothing will be saved");
            Box::new(MemoryStore::new())
        }
    };
    let engine = Engine::open(store.as_ref(), config.engine_config()).await?;

    run(&engine, &cli, config.indexing.backfill_chunk_days).await
}

async fn run(engine: &Engine, cli: &Cli, default_chunk: u32) -> anyhow::Result<()> {
    let format = cli.format;

    match &cli.command {
        Commands::Status => {
            let status = engine.optimization_status()?;
            if format == OutputFormat::Json {
                return print_json(&status);
            }
            println!("ready:           {}", status.ready);
            println!("scan fallback:   {}", status.using_scan_fallback);
            println!("rebuild needed:  {}", status.rebuild_needed);
            println!("backfill:        {}", backfill_label(status.backfill_complete, status.paused));
            println!("indexed from:    {}", day_label(status.indexed_from_day_key));
            println!("oldest data:     {}", day_label(status.oldest_data_day_key));
            println!("last indexed:    {}", day_label(status.last_indexed_day_key));
            println!("{}", engine.stats()?);
        }

        Commands::Rebuild => {
            engine.rebuild_indexes_from_scratch().await?;
            println!("{}", engine.stats()?);
        }

        Commands::Backfill { chunk_days, all } => {
            let chunk_days = chunk_days.unwrap_or(default_chunk);
            let chunks = if *all {
                engine.run_backfill(chunk_days).await?
            } else {
                usize::from(engine.backfill_next_chunk(chunk_days).await?)
            };
            let meta = engine.index_meta()?;
            println!(
                "{} chunk(s) indexed; indexed from {} ({})",
                chunks,
                day_label(meta.indexed_from),
                backfill_label(meta.backfill_complete, meta.backfill_paused)
            );
        }

        Commands::Verify => {
            let report = engine.verify_integrity().await?;
            if format == OutputFormat::Json {
                print_json(&report)?;
            } else {
                println!(
                    "{} records checked from {}: {} date, {} entity-date, {} summary mismatches",
                    report.records_checked,
                    day_label(report.verified_from),
                    report.date_mismatches,
                    report.entity_date_mismatches,
                    report.summary_mismatches
                );
            }
            if !report.is_consistent() {
                bail!("indexes are inconsistent; run `daybook rebuild`");
            }
        }

        Commands::Pause => {
            engine.set_backfill_paused(true)?;
            println!("Backfill paused");
        }

        Commands::Resume => {
            engine.set_backfill_paused(false)?;
            println!("Backfill resumed");
        }

        Commands::Entity { action } => match action {
            EntityCommand::Add { id, name } => {
                let entity = engine.register_entity(EntityConfig::new(id.clone(), name.clone()))?;
                println!("Registered {} ({})", entity.id, entity.name);
            }
            EntityCommand::List => {
                let entities = engine.entities()?;
                if format == OutputFormat::Json {
                    return print_json(&entities);
                }
                for entity in entities {
                    let state = if entity.active { "" } else { " (inactive)" };
                    println!("{:<20} {}{}", entity.id, entity.name, state);
                }
            }
        },

        Commands::Add {
            entity,
            at,
            duration,
            intensity,
            note,
        } => {
            let occurred_at = parse_time(at.as_deref())?;
            let mut new = NewRecord::new(entity.clone(), occurred_at).duration(*duration);
            if let Some(intensity) = intensity {
                new = new.intensity(*intensity);
            }
            if let Some(note) = note {
                new = new.note(note.clone());
            }

            let record = engine.create_record(new).await?;
            if format == OutputFormat::Json {
                return print_json(&record);
            }
            println!("Added {} on {}", record.id, record.day_key);
        }

        Commands::Day { day } => {
            let day = DayKey::parse(day)?;
            let records = engine.get_by_day_key(day).await?;
            if format == OutputFormat::Json {
                return print_json(&records);
            }
            print_records(&records);
        }

        Commands::Summary { entity, start, end } => {
            let start = DayKey::parse(start)?;
            let end = match end {
                Some(end) => DayKey::parse(end)?,
                None => start,
            };
            let scope = if entity == "all" {
                SummaryScope::All
            } else {
                SummaryScope::Entity(entity.clone())
            };

            let rows: Vec<_> = engine
                .get_daily_summary_range(scope, start, end)
                .await?
                .into_values()
                .collect();
            if format == OutputFormat::Json {
                return print_json(&rows);
            }

            println!(
                "{:<10} {:<20} {:>6} {:>10} {:>10}",
                "DAY", "ENTITY", "COUNT", "MINUTES", "INTENSITY"
            );
            for row in rows {
                let intensity = row
                    .average_intensity()
                    .map(|i| format!("{:.1}", i))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<10} {:<20} {:>6} {:>10} {:>10}",
                    row.day_key, row.entity_id, row.total_count, row.total_duration, intensity
                );
            }
        }

        // Handled before the engine is opened
        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("daybook={}", config.level)));

    let writer = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let layer = tracing_subscriber::fmt::layer().with_writer(writer);
    let layer = match config.format.as_str() {
        "json" => layer.json().boxed(),
        _ => layer.pretty().boxed(),
    };

    tracing_subscriber::registry().with(filter).with(layer).init();
    Ok(())
}

fn parse_time(at: Option<&str>) -> anyhow::Result<DateTime<FixedOffset>> {
    match at {
        None | Some("now") => Ok(Local::now().fixed_offset()),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("Invalid timestamp {:?} (expected RFC 3339)", s)),
    }
}

fn print_records(records: &[Record]) {
    println!(
        "{:<36} {:<20} {:<25} {:>8} {:>9}",
        "ID", "ENTITY", "AT", "MINUTES", "INTENSITY"
    );
    for record in records {
        println!(
            "{:<36} {:<20} {:<25} {:>8} {:>9}",
            record.id,
            record.entity_id,
            record.occurred_at.to_rfc3339(),
            record.duration_minutes,
            record
                .intensity
                .map(|i| i.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    println!("{} record(s)", records.len());
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn day_label(day: Option<DayKey>) -> String {
    day.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
}

fn backfill_label(complete: bool, paused: bool) -> &'static str {
    match (complete, paused) {
        (true, _) => "complete",
        (false, true) => "paused",
        (false, false) => "in progress",
    }
}
