//! # pregen-bench
//!
//! Benchmark runner for Distant Horizons world pregeneration on a Fabric
//! server.
//!
//! The runner launches the server once per seed, drives it through its console,
//! and measures how long the mod takes to pregenerate a fixed square around the
//! origin, reading every milestone from the server log instead of guessing with
//! sleeps. Completed seeds are appended to a progress file so an interrupted
//! session resumes where it stopped.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pregen_bench::{BenchConfig, BenchmarkRunner, ConsoleReporter, ProgressStore, ServerLayout};
//!
//! # fn main() -> pregen_bench::Result<()> {
//! let config = BenchConfig::load_or_create("dh-benchmark.toml")?;
//! let progress = ProgressStore::open("benchmark-progress.txt")?;
//!
//! let mut runner = BenchmarkRunner::new(config, ServerLayout::default(), progress)?
//!     .with_reporter(Box::new(ConsoleReporter::new()));
//! runner.bootstrap()?;
//! let report = runner.run(false)?;
//! println!("average: {:?}", report.average_elapsed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **`progress-bar`** (default): live generation progress via `indicatif`

pub mod config;
pub mod error;
pub mod files;
pub mod hardware;
pub mod progress;
pub mod report;
pub mod result;
pub mod runner;
pub mod session;
pub mod streamer;
pub mod supervisor;

pub use config::BenchConfig;
pub use error::{BenchError, Result};
pub use progress::ProgressStore;
pub use report::{ConsoleReporter, CsvReporter, JsonReporter, MultiReporter, Reporter};
pub use result::{BenchmarkResult, RunReport, SeedResult};
pub use runner::{BenchmarkRunner, SeedPhase, ServerLayout, SettleDelays};
pub use session::Session;
pub use streamer::LineStreamer;
pub use supervisor::{
    ActiveChild, LaunchCommand, LineMatch, ProcessSupervisor, SupervisorOptions, WaitOutcome,
};
