//! pregen-bench: benchmark Distant Horizons pregeneration across world seeds.
//!
//! ```text
//! pregen-bench run              # run (or resume) every configured seed
//! pregen-bench run --clean      # discard stored progress first
//! pregen-bench status           # list completed seeds
//! pregen-bench clear            # forget stored progress
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pregen_bench::config::CONFIG_FILE;
use pregen_bench::progress::PROGRESS_FILE;
use pregen_bench::report::{format_hms, RESULTS_FILE};
use pregen_bench::runner::DEFAULT_SERVER_DIR;
use pregen_bench::{
    BenchConfig, BenchmarkRunner, ConsoleReporter, CsvReporter, JsonReporter, MultiReporter,
    ProgressStore, Reporter, ServerLayout, Session,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "pregen-bench",
    version,
    about = "Benchmark Distant Horizons world pregeneration",
    long_about = "
pregen-bench launches a Fabric server with Distant Horizons once per seed,
pregenerates a square around the origin, and records how long it took and
how large the resulting database is.

Progress is saved after every seed; rerunning `run` resumes at the first
seed without a result.
"
)]
struct Cli {
    /// Verbose output (debug logging)
    #[arg(long, short = 'v', global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Quiet mode (warnings and errors only, no progress bar)
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every seed without a stored result
    Run(RunArgs),
    /// Show completed seeds
    Status(StatusArgs),
    /// Delete stored progress
    Clear(ClearArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Discard stored progress and start from the first seed
    #[arg(long)]
    clean: bool,

    /// Configuration file (created with defaults if missing)
    #[arg(long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Server directory
    #[arg(long, default_value = DEFAULT_SERVER_DIR)]
    server_dir: PathBuf,

    /// Progress file
    #[arg(long, default_value = PROGRESS_FILE)]
    progress_file: PathBuf,

    /// Tab-separated results file
    #[arg(long, default_value = RESULTS_FILE)]
    output: PathBuf,

    /// Also write results as JSON to this file
    #[arg(long)]
    json: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct StatusArgs {
    /// Configuration file, used to name seeds
    #[arg(long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Progress file
    #[arg(long, default_value = PROGRESS_FILE)]
    progress_file: PathBuf,
}

#[derive(Debug, Args)]
struct ClearArgs {
    /// Progress file
    #[arg(long, default_value = PROGRESS_FILE)]
    progress_file: PathBuf,
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match cli.cmd {
        Commands::Run(args) => run(args, cli.quiet),
        Commands::Status(args) => status(args),
        Commands::Clear(args) => clear(args),
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .init();
}

fn run(args: RunArgs, quiet: bool) -> Result<()> {
    let config = BenchConfig::load_or_create(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    let progress = ProgressStore::open(&args.progress_file)
        .with_context(|| format!("Failed to open {}", args.progress_file.display()))?;

    let mut reporters: Vec<Box<dyn Reporter>> = vec![
        Box::new(ConsoleReporter::new().show_progress(!quiet)),
        Box::new(CsvReporter::new(&args.output)),
    ];
    if let Some(json) = &args.json {
        reporters.push(Box::new(JsonReporter::new(json)));
    }

    let mut runner = BenchmarkRunner::new(config, ServerLayout::new(&args.server_dir), progress)?
        .with_reporter(Box::new(MultiReporter::new(reporters)));
    let _session = Session::install(runner.active_child())?;

    if runner.bootstrap().context("First-run setup failed")? {
        eprintln!("  Server files generated; EULA accepted.");
    }
    runner
        .run(args.clean)
        .context("Benchmark aborted; rerun to resume at the failed seed")?;
    Ok(())
}

fn status(args: StatusArgs) -> Result<()> {
    let store = ProgressStore::open(&args.progress_file)
        .with_context(|| format!("Failed to open {}", args.progress_file.display()))?;
    let seeds = if args.config.exists() {
        BenchConfig::load_or_create(&args.config)
            .with_context(|| format!("Failed to load {}", args.config.display()))?
            .seeds
    } else {
        Vec::new()
    };

    if store.is_empty() {
        eprintln!("No completed seeds in {}", args.progress_file.display());
        return Ok(());
    }

    for (index, result) in store.iter() {
        let seed = seeds.get(index).map(String::as_str).unwrap_or("?");
        let elapsed = result
            .elapsed
            .map(format_hms)
            .unwrap_or_else(|| "unknown".to_string());
        eprintln!(
            "  #{:<3} {:>20}  {}  {:>8.1} MB  {:.1} chunks/s",
            index,
            seed,
            elapsed,
            result.artifact_mib(),
            result.rate
        );
    }
    if !seeds.is_empty() {
        match store.resume_index(seeds.len()) {
            Some(i) => eprintln!("  Next run resumes at seed #{} of {}", i, seeds.len()),
            None => eprintln!("  All {} seeds completed", seeds.len()),
        }
    }
    Ok(())
}

fn clear(args: ClearArgs) -> Result<()> {
    let mut store = ProgressStore::open(&args.progress_file)
        .with_context(|| format!("Failed to open {}", args.progress_file.display()))?;
    let count = store.len();
    store.clear()?;
    eprintln!("  Cleared {} completed seed(s)", count);
    Ok(())
}
