//! SorryScan CLI
//!
//! Checks out a Lean repository, builds it, and writes an inventory of every incomplete
//! proof (goal, parent type, fingerprint, blame) to a JSON file.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use sorryscan_core::{
    GitBlame, GitCheckout, LakeBuilder, Pipeline, PipelineConfig, ReplCommand, ReplFactory,
    RepoScanner, ScanObserver, SelectOptions, SessionError,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sorryscan")]
#[command(
    author,
    version,
    about = "Inventory incomplete proofs (sorries) in a Lean repository"
)]
struct Cli {
    /// Repository to scan: a local directory, a URL, or `owner/name`
    #[arg(long)]
    repo: String,

    /// Branch to check out (default: the repository's default branch)
    #[arg(long)]
    branch: Option<String>,

    /// Directory for repository checkouts
    #[arg(long, alias = "lean-data-dir", default_value = "lean_data")]
    workdir: PathBuf,

    /// Output JSON file
    #[arg(short, long, default_value = "output.json")]
    output: PathBuf,

    /// Only scan below this repository-relative subdirectory
    #[arg(long)]
    subdir: Option<PathBuf>,

    /// REPL binary (default: $SORRYSCAN_REPL, then `repl` on PATH)
    #[arg(long)]
    repl: Option<PathBuf>,

    /// Launch the REPL directly instead of through `lake env`
    #[arg(long)]
    no_lake_env: bool,

    /// Also write repository metadata (commit, remote, branch, Lean version) here
    #[arg(long)]
    metadata_out: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

struct ProgressPrinter;

impl ScanObserver for ProgressPrinter {
    fn file_processed(&mut self, path: &Path, obligations: usize) {
        if obligations == 0 {
            println!("  {} {} {}", "→".yellow(), path.display(), "none".dimmed());
        } else {
            println!(
                "  {} {} {}",
                "→".yellow(),
                path.display(),
                format!("{obligations} sorries").green()
            );
        }
    }

    fn file_failed(&mut self, path: &Path, error: &SessionError) {
        println!("  {} {} {}", "✗".red(), path.display(), error);
    }
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .with_context(|| format!("invalid log level `{}`", cli.log_level))?;

    match &cli.log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = fs::File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    fs::create_dir_all(&cli.workdir)
        .with_context(|| format!("failed to create {}", cli.workdir.display()))?;

    let repl = ReplCommand::resolve(cli.repl.as_deref(), !cli.no_lake_env)?;
    let options = SelectOptions {
        subdir: cli.subdir.clone(),
        ..Default::default()
    };
    let scanner = RepoScanner::new(ReplFactory::new(repl), GitBlame, options);
    let pipeline = Pipeline::new(
        GitCheckout::new(&cli.workdir),
        LakeBuilder::default(),
        scanner,
    );

    let config = PipelineConfig {
        repo: cli.repo.clone(),
        branch: cli.branch.clone(),
        output: cli.output.clone(),
        metadata_out: cli.metadata_out.clone(),
    };

    println!("{} {}", "Scanning".green().bold(), cli.repo);
    let report = pipeline.run(&config, &mut ProgressPrinter)?;

    let duplicates = report.scan.duplicate_groups();
    println!(
        "{} {} sorries in {} files ({} duplicated goals)",
        "Complete!".green().bold(),
        report.scan.obligation_count(),
        report.scan.files().len(),
        duplicates.len()
    );
    println!("  {} {}", "→".cyan(), cli.output.display());
    if let (Some(path), Some(_)) = (&cli.metadata_out, &report.metadata) {
        println!("  {} {}", "→".cyan(), path.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    run(cli).map_err(|e| {
        error!("{e:#}");
        e
    })
}
