//! Timeline CLI
//!
//! Command-line interface over a SQLite-backed timeline store:
//! - Create timelines and entry nodes
//! - Index and unindex entries by timestamp
//! - Point, range and boundary queries
//! - Clear, verify and inspect timelines

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use timeline_index::config::{generate_default_config, Config, LoggingConfig};
use timeline_index::graph::{GraphStore, NodeId, SqliteGraph};
use timeline_index::timeline::{parse_datetime, Timeline, TimelineStats};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "timeline")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ordered timestamp index over a graph store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ~/.config/timeline-index/config.toml, ./timeline.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory, overrides the config file
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

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
    /// Create a new timeline
    Create {
        /// Timeline name
        name: String,
    },

    /// Create an entry node to index
    Node,

    /// Index an entry at a timestamp
    Add {
        timeline: String,
        entry: u64,
        /// Timestamp: "now", seconds, "YYYY-MM-DD HH:MM:SS" (UTC), RFC 3339 or YYYY-MM-DD
        time: String,
    },

    /// Remove an entry from a timeline
    Remove { timeline: String, entry: u64 },

    /// Entries at an exact timestamp
    At { timeline: String, time: String },

    /// Entries strictly between optional bounds
    Range {
        timeline: String,
        #[arg(long)]
        after: Option<String>,
        #[arg(long)]
        before: Option<String>,
    },

    /// Entry with the smallest timestamp
    First { timeline: String },

    /// Entry with the largest timestamp
    Last { timeline: String },

    /// Timestamp an entry is indexed at
    TimestampOf { timeline: String, entry: u64 },

    /// Remove every entry from a timeline
    Clear {
        timeline: String,
        /// Drain in batches, one transaction per batch
        #[arg(long)]
        batch: bool,
        /// Batch size (default: timeline.clear_batch_size)
        #[arg(long, requires = "batch")]
        batch_size: Option<usize>,
    },

    /// Verify ring and calendar invariants
    Check { timeline: String },

    /// Show timeline statistics
    Stats { timeline: String },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct EntryRow {
    entry: NodeId,
    timestamp: i64,
    time: Option<String>,
}

impl EntryRow {
    fn new(entry: NodeId, timestamp: i64) -> Self {
        Self {
            entry,
            timestamp,
            time: format_time(timestamp),
        }
    }
}

fn format_time(timestamp: i64) -> Option<String> {
    DateTime::from_timestamp(timestamp, 0).map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn parse_time(input: &str) -> anyhow::Result<i64> {
    if input == "now" {
        return Ok(Utc::now().timestamp());
    }
    Ok(parse_datetime(input)?)
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("timeline_index={}", config.level)));

    let writer = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    match config.format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init(),
        _ => registry
            .with(tracing_subscriber::fmt::layer().with_writer(writer))
            .init(),
    }
    Ok(())
}

/// Command context: config plus the opened store
struct App {
    config: Config,
    format: OutputFormat,
    store: SqliteGraph,
}

impl App {
    fn timeline(&mut self, name: &str) -> anyhow::Result<Timeline<&mut SqliteGraph>> {
        let timeline = Timeline::open_named(&mut self.store, name)
            .with_context(|| format!("Cannot open timeline '{}'", name))?;
        Ok(timeline.with_options(self.config.timeline.options()))
    }

    fn print_json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    fn print_entries(&self, rows: &[EntryRow]) -> anyhow::Result<()> {
        if self.format == OutputFormat::Json {
            return self.print_json(&rows);
        }
        if rows.is_empty() {
            println!("No entries.");
            return Ok(());
        }
        println!("{:<10} {:<20} {}", "Entry", "Timestamp", "Time (UTC)");
        println!("{}", "-".repeat(52));
        for row in rows {
            println!(
                "{:<10} {:<20} {}",
                row.entry.0,
                row.timestamp,
                row.time.as_deref().unwrap_or("-")
            );
        }
        Ok(())
    }

    fn print_boundary(&mut self, name: &str, last: bool) -> anyhow::Result<()> {
        let timeline = self.timeline(name)?;
        let entry = if last { timeline.last()? } else { timeline.first()? };
        let rows = match entry {
            Some(entry) => vec![EntryRow::new(entry, timeline.timestamp_of(entry)?)],
            None => Vec::new(),
        };
        drop(timeline);
        self.print_entries(&rows)
    }

    fn print_stats(&self, name: &str, stats: &TimelineStats) -> anyhow::Result<()> {
        if self.format == OutputFormat::Json {
            return self.print_json(stats);
        }
        println!("Timeline: {}", name);
        println!("  Buckets: {}", stats.buckets);
        println!("  Entries: {}", stats.entries);
        if let (Some(first), Some(last)) = (stats.first_timestamp, stats.last_timestamp) {
            println!(
                "  Span: {} .. {}",
                format_time(first).unwrap_or_else(|| first.to_string()),
                format_time(last).unwrap_or_else(|| last.to_string())
            );
        }
        Ok(())
    }

    fn run(&mut self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Create { name } => {
                let options = self.config.timeline.options();
                let timeline = Timeline::create(&mut self.store, &name)?.with_options(options);
                let anchor = timeline.anchor();
                drop(timeline);
                if self.format == OutputFormat::Json {
                    self.print_json(&serde_json::json!({ "name": name, "anchor": anchor }))?;
                } else {
                    println!("Created timeline '{}' at {}", name, anchor);
                }
            }

            Commands::Node => {
                let node = self.store.create_node()?;
                if self.format == OutputFormat::Json {
                    self.print_json(&serde_json::json!({ "node": node }))?;
                } else {
                    println!("{}", node.0);
                }
            }

            Commands::Add {
                timeline,
                entry,
                time,
            } => {
                let timestamp = parse_time(&time)?;
                let entry = NodeId(entry);
                self.timeline(&timeline)?.add(entry, timestamp)?;
                println!(
                    "Added {} to '{}' at {}",
                    entry,
                    timeline,
                    format_time(timestamp).unwrap_or_else(|| timestamp.to_string())
                );
            }

            Commands::Remove { timeline, entry } => {
                let entry = NodeId(entry);
                let timestamp = self.timeline(&timeline)?.remove(entry)?;
                println!("Removed {} from '{}' (was at {})", entry, timeline, timestamp);
            }

            Commands::At { timeline, time } => {
                let timestamp = parse_time(&time)?;
                let entries = self.timeline(&timeline)?.nodes_at(timestamp)?;
                let rows: Vec<EntryRow> = entries
                    .into_iter()
                    .map(|entry| EntryRow::new(entry, timestamp))
                    .collect();
                self.print_entries(&rows)?;
            }

            Commands::Range {
                timeline,
                after,
                before,
            } => {
                let after = after.as_deref().map(parse_time).transpose()?;
                let before = before.as_deref().map(parse_time).transpose()?;
                let timeline = self.timeline(&timeline)?;
                let mut rows = Vec::new();
                for entry in timeline.all_nodes(after, before)? {
                    let entry = entry?;
                    rows.push(EntryRow::new(entry, timeline.timestamp_of(entry)?));
                }
                drop(timeline);
                self.print_entries(&rows)?;
            }

            Commands::First { timeline } => self.print_boundary(&timeline, false)?,

            Commands::Last { timeline } => self.print_boundary(&timeline, true)?,

            Commands::TimestampOf { timeline, entry } => {
                let entry = NodeId(entry);
                let timestamp = self.timeline(&timeline)?.timestamp_of(entry)?;
                self.print_entries(&[EntryRow::new(entry, timestamp)])?;
            }

            Commands::Clear {
                timeline,
                batch,
                batch_size,
            } => {
                let batch_size = batch_size.unwrap_or(self.config.timeline.clear_batch_size);
                let mut handle = self.timeline(&timeline)?;
                if batch {
                    let removed = handle.clear_batched(batch_size)?;
                    println!("Removed {} entries from '{}'", removed, timeline);
                } else {
                    let buckets = handle.clear()?;
                    println!("Deleted {} buckets from '{}'", buckets, timeline);
                }
            }

            Commands::Check { timeline } => {
                let stats = self.timeline(&timeline)?.verify()?;
                if self.format == OutputFormat::Json {
                    self.print_json(&serde_json::json!({ "ok": true, "stats": stats }))?;
                } else {
                    println!("Timeline '{}' is consistent", timeline);
                    self.print_stats(&timeline, &stats)?;
                }
            }

            Commands::Stats { timeline } => {
                let stats = self.timeline(&timeline)?.stats()?;
                self.print_stats(&timeline, &stats)?;
            }

            Commands::Config { .. } => bail!("config is handled before the store opens"),
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Config generation needs no store and no logging
    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("Failed to write {:?}", path))?;
                println!("Config written to {:?}", path);
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.store.data_dir = dir.to_string_lossy().to_string();
    }

    init_logging(&config.logging)?;

    let data_dir = config.data_dir();
    tracing::debug!("Data directory: {:?}", data_dir);
    let store = SqliteGraph::open(&data_dir)
        .with_context(|| format!("Failed to open graph store in {:?}", data_dir))?;

    let mut app = App {
        config,
        format: cli.format,
        store,
    };
    app.run(cli.command)
}
