//! Somnia CLI
//!
//! Command-line interface for inspecting the archive log and replaying
//! recorded inputs through the memory engine.

mod local;

use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::Colorize;
use somnia_core::storage::DATABASE_FILE;
use somnia_core::{
    ArchiveBackend, Collaborators, Input, MemoryConfig, MemorySystem, PhaseStatus, SqliteArchive,
};
use tracing_subscriber::EnvFilter;

use crate::local::{EchoGenerator, HashingEmbedder, NoopTrainer};

/// Somnia - Tiered Memory Engine CLI
#[derive(Parser)]
#[command(name = "somnia")]
#[command(author = "Somnia Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CLI for the Somnia tiered memory engine")]
#[command(long_about = "Somnia keeps bounded working, episodic, semantic and procedural memory tiers.\n\nDemoted memories land in an append-only archive log, one entry per nightly run.")]
struct Cli {
    /// Data directory holding the archive database
    #[arg(long, global = true, env = "SOMNIA_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// JSON engine configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write logs to stderr as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show archive and snapshot statistics
    Stats,

    /// List archived days, or the entries of one day
    Archives {
        /// Only this day (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show the archive entries of one day
    Show {
        /// Day to show (YYYY-MM-DD)
        date: NaiveDate,
        /// Print the raw entries as JSON
        #[arg(long)]
        json: bool,
        /// List the archived memories too
        #[arg(long)]
        memories: bool,
    },

    /// Feed a JSONL file of inputs through the engine, then run nightly integration
    Replay {
        /// One input per line: {"text": ..., "kind": ..., "importance": ...}
        file: PathBuf,
        /// Leave the day's experiences for the next nightly run
        #[arg(long)]
        skip_nightly: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    match cli.command {
        Commands::Stats => run_stats(cli.data_dir),
        Commands::Archives { date } => run_archives(cli.data_dir, date),
        Commands::Show { date, json, memories } => run_show(cli.data_dir, date, json, memories),
        Commands::Replay { file, skip_nightly } => {
            run_replay(cli.data_dir, cli.config, file, skip_nightly).await
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.with_ansi(false).init();
    }
}

fn open_archive(data_dir: Option<PathBuf>) -> anyhow::Result<SqliteArchive> {
    let db_path = data_dir.map(|dir| dir.join(DATABASE_FILE));
    SqliteArchive::open(db_path).context("Failed to open archive database")
}

fn load_config(path: Option<&Path>) -> anyhow::Result<MemoryConfig> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => MemoryConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Run stats command
fn run_stats(data_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let archive = open_archive(data_dir)?;
    let days = archive.days()?;
    let archived: usize = days.iter().map(|d| d.memories).sum();

    println!("{}", "=== Somnia Archive Statistics ===".cyan().bold());
    println!();

    if let Some(path) = archive.path() {
        println!("{}: {}", "Database".white().bold(), path.display());
    }
    println!("{}: {}", "Archive Entries".white().bold(), archive.entry_count()?);
    println!("{}: {}", "Archived Days".white().bold(), days.len());
    println!("{}: {}", "Archived Memories".white().bold(), archived);
    if let (Some(first), Some(last)) = (days.first(), days.last()) {
        println!("{}: {} .. {}", "Date Range".white().bold(), first.date, last.date);
    }

    match archive.last_run()? {
        Some(run) => {
            let status = if run.completed {
                "completed".green()
            } else {
                "partial".yellow()
            };
            println!(
                "{}: {} ({})",
                "Last Nightly Run".white().bold(),
                run.started_at.format("%Y-%m-%d %H:%M:%S"),
                status
            );
            println!("  {}", run.summary.dimmed());
        }
        None => println!("{}: {}", "Last Nightly Run".white().bold(), "never".dimmed()),
    }

    let snapshots = archive.load_snapshots()?;
    if !snapshots.is_empty() {
        println!();
        println!("{}", "=== Persisted Tier Snapshots ===".yellow().bold());
        for (tier, records) in snapshots {
            println!("  {:12} {:>6}", tier, records.len());
        }
    }

    if let Some(day) = archive.load_pending_day()? {
        if !day.is_empty() {
            println!();
            println!("{}", format!("=== Unsealed Day {} ===", day.day).yellow().bold());
            println!("  {:12} {:>6}", "memories", day.memories.len());
            println!("  {:12} {:>6}", "experiences", day.experiences.len());
        }
    }
    let knowledge = archive.load_knowledge()?;
    if !knowledge.is_empty() {
        println!("{}: {}", "Knowledge Entries".white().bold(), knowledge.len());
    }

    Ok(())
}

/// Run archives command
fn run_archives(data_dir: Option<PathBuf>, date: Option<NaiveDate>) -> anyhow::Result<()> {
    let archive = open_archive(data_dir)?;

    match date {
        Some(date) => {
            let entries = archive.entries_for(date)?;
            println!("{}", format!("=== Archive Entries for {} ===", date).cyan().bold());
            if entries.is_empty() {
                println!("{}", "No entries found.".dimmed());
            }
            for entry in entries {
                println!(
                    "  {} {} memories={} experiences={} patterns={}",
                    entry.id.to_string().dimmed(),
                    entry.created_at.format("%H:%M:%S"),
                    entry.archived_memories.len(),
                    entry.experiences.len(),
                    entry.patterns.len()
                );
            }
        }
        None => {
            let days = archive.days()?;
            println!("{}", "=== Archived Days ===".cyan().bold());
            if days.is_empty() {
                println!("{}", "No entries found.".dimmed());
            }
            for day in days {
                println!("  {}  entries={:<3} memories={}", day.date, day.entries, day.memories);
            }
        }
    }

    Ok(())
}

/// Run show command
fn run_show(
    data_dir: Option<PathBuf>,
    date: NaiveDate,
    json: bool,
    show_memories: bool,
) -> anyhow::Result<()> {
    let archive = open_archive(data_dir)?;
    let entries = archive.entries_for(date)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("{}", format!("No archive entries for {}.", date).dimmed());
        return Ok(());
    }

    for entry in entries {
        let m = &entry.daily_metrics;
        println!("{}", format!("=== Entry {} ===", entry.id).cyan().bold());
        println!("{}: {}", "Created".white().bold(), entry.created_at.format("%Y-%m-%d %H:%M:%S"));
        println!("{}: {}", "Experiences".white().bold(), m.experiences);
        println!(
            "{}: {} recurring, {} sequential, {} co-occurrence",
            "Patterns".white().bold(),
            m.recurring_patterns,
            m.sequential_patterns,
            m.co_occurrence_patterns
        );
        println!(
            "{}: {} touched, {} conflicts resolved",
            "Knowledge".white().bold(),
            m.knowledge_touched,
            m.conflicts_resolved
        );
        println!(
            "{}: {} applied, {} rolled back",
            "Training Batches".white().bold(),
            m.batches_applied,
            m.batches_rolled_back
        );
        println!("{}: {}", "Memories Archived".white().bold(), m.memories_archived);
        for (tier, size) in &m.tier_sizes {
            println!("  {:12} {:>6} active", tier.to_string(), size);
        }

        if !entry.patterns.is_empty() {
            println!();
            println!("{}", "Top patterns:".yellow());
            for pattern in entry.patterns.iter().take(10) {
                println!(
                    "  {:13} {:40} x{:<3} {:.2}",
                    pattern.pattern_type.to_string(),
                    pattern.concepts.join(" "),
                    pattern.occurrences,
                    pattern.importance
                );
            }
        }

        if show_memories && !entry.archived_memories.is_empty() {
            println!();
            println!("{}", "Archived memories:".yellow());
            for memory in &entry.archived_memories {
                let first_line = memory.content.lines().next().unwrap_or_default();
                println!(
                    "  [{}] {:.2} {}",
                    memory.tier,
                    memory.importance,
                    truncate(first_line, 72)
                );
            }
        }
        println!();
    }

    Ok(())
}

/// Run replay command
async fn run_replay(
    data_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
    file: PathBuf,
    skip_nightly: bool,
) -> anyhow::Result<()> {
    let config = load_config(config_path.as_deref())?;
    let backend = Arc::new(open_archive(data_dir)?);
    let collaborators = Collaborators {
        embedder: Arc::new(HashingEmbedder::new(config.embedding_dimension)),
        generator: Arc::new(EchoGenerator),
        trainer: Arc::new(NoopTrainer),
    };
    let system = MemorySystem::new(config, collaborators, backend)?;
    let restored = system.restore_snapshots()?;

    println!("{}", "=== Somnia Replay ===".cyan().bold());
    println!("Restored {} memories from snapshots", restored);
    let stats = system.stats();
    if stats.pending_archive > 0 || stats.experiences_today > 0 {
        println!(
            "Resumed unsealed day: {} memories awaiting the archive, {} experiences",
            stats.pending_archive, stats.experiences_today
        );
    }
    println!();

    let reader = BufReader::new(
        std::fs::File::open(&file).with_context(|| format!("Failed to open {}", file.display()))?,
    );
    let mut processed = 0;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let input: Input = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid input", file.display(), line_no + 1))?;

        let outcome = system.process_input(input).await?;
        processed += 1;
        println!(
            "  {:10} {:.2} {}",
            outcome.tier.to_string().green(),
            outcome.importance,
            truncate(&outcome.output, 60)
        );
        if let Some(c) = outcome.consolidation {
            println!(
                "  {}",
                format!("{} over capacity: archived {} memories", c.tier, c.archived.len()).yellow()
            );
        }
    }

    println!();
    println!("{}: {}", "Inputs Processed".white().bold(), processed);

    if !skip_nightly {
        let report = system.run_nightly_integration(&|| true).await;
        println!();
        println!("{}", "=== Nightly Integration ===".magenta().bold());
        for phase in &report.phases {
            let status = match &phase.status {
                PhaseStatus::Completed => "completed".green(),
                PhaseStatus::Partial { reason } => format!("partial: {}", reason).yellow(),
                PhaseStatus::Skipped { reason } => format!("skipped: {}", reason).dimmed(),
                PhaseStatus::Failed { reason } => format!("failed: {}", reason).red(),
            };
            println!("  {:20} {} ({}ms)", phase.phase.to_string(), status, phase.duration_ms);
            for action in &phase.actions {
                println!("    {}", action.dimmed());
            }
        }
        println!();
        println!("{}", report.summary());
    }

    let written = system.persist_snapshots()?;
    println!("{}", format!("Persisted {} active memories", written).green());
    let pending = system.archive().pending_len();
    if pending > 0 {
        println!("{}", format!("{} memories wait for the next nightly seal", pending).dimmed());
    }
    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
