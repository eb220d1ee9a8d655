//! Command-line interface for gleaner.
//!
//! Provides commands for running a harvest, importing file metadata into
//! the database, listing the defined sources and showing the resolved
//! configuration.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use crate::adapters::{AdapterRegistry, HttpClient};
use crate::config::{load_sources, PathOverrides, Settings, SourceConfig};
use crate::core::{HarvestOrchestrator, HarvestReport, RunLock, RunOptions};
use crate::store::{import_records, FileBackend, UnitOfWork};

/// gleaner - incremental harvester for paginated sources
#[derive(Parser, Debug)]
#[command(name = "gleaner")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: .gleaner/config.yaml in this or a parent directory)
    #[arg(short, long, global = true, env = "GLEANER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short = 'v', long = "verbose", short_alias = 'd', alias = "debug", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Harvest sources (all when none is named)
    Run {
        /// Source names (case-insensitive)
        sources: Vec<String>,

        /// Harvest root directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Media directory
        #[arg(long)]
        media_dir: Option<PathBuf>,

        /// Metadata directory
        #[arg(long)]
        metadata_dir: Option<PathBuf>,

        /// State directory
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Download only: save nothing, send nothing
        #[arg(long)]
        dry_run: bool,

        /// Do not save results
        #[arg(long)]
        no_save: bool,

        /// Do not send the digest
        #[arg(long)]
        no_digest: bool,

        /// Run sources even when they are not due
        #[arg(short, long)]
        force: bool,

        /// Run disabled sources too
        #[arg(long)]
        ignore_enabled: bool,
    },

    /// Copy file-backend metadata records into the database
    ImportMetadata {
        /// Metadata directory
        #[arg(long)]
        metadata_dir: Option<PathBuf>,
    },

    /// List known sources
    Sources,

    /// Show resolved configuration
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                sources,
                output,
                media_dir,
                metadata_dir,
                state_dir,
                dry_run,
                no_save,
                no_digest,
                force,
                ignore_enabled,
            } => {
                let overrides = PathOverrides {
                    root: output,
                    media: media_dir,
                    metadata: metadata_dir,
                    state: state_dir,
                };
                let options = RunOptions {
                    sources,
                    force,
                    ignore_enabled,
                    dry_run,
                    skip_save: no_save,
                    skip_digest: no_digest,
                };
                run_harvest(self.config, overrides, options).await
            }
            Commands::ImportMetadata { metadata_dir } => {
                let overrides = PathOverrides {
                    metadata: metadata_dir,
                    ..PathOverrides::default()
                };
                import_metadata(self.config, overrides).await
            }
            Commands::Sources => list_sources(self.config),
            Commands::Config => show_config(self.config),
        }
    }
}

fn load_settings(config: Option<PathBuf>) -> Result<Settings> {
    Settings::load(config.as_deref()).context("Failed to load configuration")
}

fn load_source_definitions(settings: &Settings) -> Result<Vec<SourceConfig>> {
    load_sources(&settings.sources, settings.default_mode)
        .with_context(|| format!("Failed to load sources from {}", settings.sources))
}

/// Run a harvest
async fn run_harvest(config: Option<PathBuf>, overrides: PathOverrides, options: RunOptions) -> Result<()> {
    let mut settings = load_settings(config)?;
    settings.apply_overrides(&overrides);

    let sources = load_source_definitions(&settings)?;
    if sources.is_empty() {
        println!("No sources defined ({})", settings.sources);
        return Ok(());
    }

    let registry = AdapterRegistry::builtin(HttpClient::new()?);
    let mut orchestrator = HarvestOrchestrator::new(settings, registry, Utc::now());
    let report = orchestrator.run(&sources, &options).await?;

    print_report(&report, &options);
    Ok(())
}

fn print_report(report: &HarvestReport, options: &RunOptions) {
    if report.sources.is_empty() {
        println!("No source was due.");
        return;
    }

    let width = report
        .sources
        .iter()
        .map(|s| s.name.len())
        .max()
        .unwrap_or(0)
        .max(6);
    println!("{:<width$}  {:>7}  {:>5}", "SOURCE", "FETCHED", "SAVED", width = width);
    for source in &report.sources {
        println!(
            "{:<width$}  {:>7}  {:>5}",
            source.name,
            source.fetched,
            source.saved,
            width = width
        );
    }

    if options.dry_run {
        println!("\nDry run: nothing saved.");
    } else {
        println!("\nSaved {} item(s), {} digest message(s).", report.saved(), report.messages);
    }
}

/// Backfill the database from the metadata files
async fn import_metadata(config: Option<PathBuf>, overrides: PathOverrides) -> Result<()> {
    let mut settings = load_settings(config)?;
    settings.apply_overrides(&overrides);

    let Some(database) = settings.database.clone() else {
        bail!("No database configured; set store.database to import into");
    };

    let _lock = RunLock::acquire(&settings.lock_path())?;
    let uow = UnitOfWork::begin(Some(database.as_path()))
        .with_context(|| format!("Failed to open {}", database.display()))?;
    let files = FileBackend::new(&settings.state_dir, &settings.metadata_dir);

    let report = import_records(&files, &uow).await?;
    uow.commit().context("Failed to commit imported records")?;

    println!(
        "Imported {} record(s) from {}: {} created, {} updated, {} unchanged.",
        report.total() - report.skipped.len(),
        settings.metadata_dir.display(),
        report.created,
        report.updated,
        report.unchanged
    );
    for path in &report.skipped {
        println!("  skipped {}", path.display());
    }
    Ok(())
}

/// List sources
fn list_sources(config: Option<PathBuf>) -> Result<()> {
    let settings = load_settings(config)?;
    let sources = load_source_definitions(&settings)?;

    if sources.is_empty() {
        println!("No sources defined ({})", settings.sources);
        return Ok(());
    }

    println!(
        "{:<20} {:<30} {:<10} {:<8} {:<6} {:>5} {:<10}",
        "NAME", "TITLE", "MODULE", "ENABLED", "MODE", "BATCH", "INTERVAL"
    );
    println!("{}", "-".repeat(95));
    for source in &sources {
        println!(
            "{:<20} {:<30} {:<10} {:<8} {:<6} {:>5} {:<10}",
            source.name,
            truncate(&source.title, 30),
            source.module,
            if source.enabled { "yes" } else { "no" },
            source.mode,
            source.batch_size,
            source.poll_interval
        );
    }

    Ok(())
}

/// Show resolved configuration
fn show_config(config: Option<PathBuf>) -> Result<()> {
    let settings = load_settings(config)?;

    println!("Gleaner Configuration");
    println!();
    println!(
        "Config file: {}",
        settings
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Root:      {}", settings.root.display());
    println!("  Media:     {}", settings.media_dir.display());
    println!("  Metadata:  {}", settings.metadata_dir.display());
    println!("  State:     {}", settings.state_dir.display());
    println!("  Outbox:    {}", settings.outbox_dir.display());
    println!("  Sources:   {}", settings.sources);
    println!();
    println!("Harvest:");
    println!("  Max batch size: {}", settings.max_batch_size);
    println!("  Default mode:   {}", settings.default_mode);
    println!();
    println!("Store:");
    println!("  Files:     {}", if settings.files_backend { "on" } else { "off" });
    println!(
        "  Database:  {}",
        settings
            .database
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(off)".to_string())
    );
    println!();
    println!("Digest:");
    println!("  From:      {}", settings.digest.from);
    println!("  To:        {}", settings.digest.to.join(", "));
    println!("  Subject:   {}", settings.digest.subject);
    println!("  Max size:  {} bytes", settings.digest.max_message_bytes);

    Ok(())
}

/// Truncate a string for tabular display
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from([
            "gleaner", "-d", "run", "xkcd", "Other", "-o", "/tmp/h", "--dry-run", "--force",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Run {
                sources,
                output,
                dry_run,
                force,
                no_save,
                ..
            } => {
                assert_eq!(sources, vec!["xkcd".to_string(), "Other".to_string()]);
                assert_eq!(output, Some(PathBuf::from("/tmp/h")));
                assert!(dry_run);
                assert!(force);
                assert!(!no_save);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_import_metadata_command() {
        let cli = Cli::try_parse_from(["gleaner", "import-metadata", "--metadata-dir", "/tmp/meta"]).unwrap();

        match cli.command {
            Commands::ImportMetadata { metadata_dir } => {
                assert_eq!(metadata_dir, Some(PathBuf::from("/tmp/meta")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a rather long title", 10), "a rathe...");
    }
}
