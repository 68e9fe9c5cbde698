//! Multi-seed benchmark driver.
//!
//! Each seed walks the same phases on one server process:
//!
//! ```text
//! Prepared -> ServerUp -> Configured -> WorkloadRunning -> WorkloadComplete -> Measured -> Persisted
//! ```
//!
//! Seeds run strictly one after another. Completed seeds are appended to the
//! [`ProgressStore`] as they finish, so an interrupted session picks up at the
//! first seed without a record.

use crate::config::{BenchConfig, SERVER_JAR};
use crate::error::{BenchError, Result};
use crate::files;
use crate::progress::ProgressStore;
use crate::report::{MultiReporter, Reporter};
use crate::result::{BenchmarkResult, RunReport, SeedResult};
use crate::streamer::LogLine;
use crate::supervisor::{
    ActiveChild, LaunchCommand, LineMatch, ProcessSupervisor, SupervisorOptions, WaitOutcome,
};
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Server directory used when none is given.
pub const DEFAULT_SERVER_DIR: &str = "server";
/// File name of the Distant Horizons mod inside `mods/`.
pub const MOD_JAR: &str = "distant-horizons.jar";

/// Log marker printed when generation begins.
pub const START_MARKER: &str = "Starting pregen";
/// Log marker printed when generation has finished.
pub const COMPLETE_MARKER: &str = "Pregen is complete";
/// Log marker of periodic progress lines.
pub const PROGRESS_MARKER: &str = "Generated radius";
/// Extracts the integer part of the percentage from a progress line.
pub const PROGRESS_PATTERN: &str = r"(\d{1,3})(?:\.\d+)?%";

/// Command applying a thread preset.
pub fn preset_command(preset: &str) -> String {
    format!("dh config common.threadPreset {preset}")
}

/// Command starting a square pregen of `radius` chunks around the origin.
pub fn pregen_command(radius: u32) -> String {
    format!("dh pregen start minecraft:overworld 0 0 {radius}")
}

/// Per-seed phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SeedPhase {
    Prepared,
    ServerUp,
    Configured,
    WorkloadRunning,
    WorkloadComplete,
    Measured,
    Persisted,
}

impl fmt::Display for SeedPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SeedPhase::Prepared => "prepared",
            SeedPhase::ServerUp => "server-up",
            SeedPhase::Configured => "configured",
            SeedPhase::WorkloadRunning => "workload-running",
            SeedPhase::WorkloadComplete => "workload-complete",
            SeedPhase::Measured => "measured",
            SeedPhase::Persisted => "persisted",
        };
        f.write_str(name)
    }
}

/// Fixed waits around the server where no log line signals readiness.
///
/// Each delay is used at exactly one call site in the seed loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleDelays {
    /// After the server reports ready, before the first command.
    pub post_start: Duration,
    /// After applying the thread preset, before starting generation.
    pub post_configure: Duration,
    /// After generation completes, before shutdown; the mod flushes its database late.
    pub finalization: Duration,
}

impl SettleDelays {
    pub const POST_START: Duration = Duration::from_secs(5);
    pub const POST_CONFIGURE: Duration = Duration::from_secs(5);
    pub const FINALIZATION: Duration = Duration::from_secs(30);

    /// No waiting at all. For scripted servers in tests.
    pub fn none() -> Self {
        Self {
            post_start: Duration::ZERO,
            post_configure: Duration::ZERO,
            finalization: Duration::ZERO,
        }
    }
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            post_start: Self::POST_START,
            post_configure: Self::POST_CONFIGURE,
            finalization: Self::FINALIZATION,
        }
    }
}

fn settle(delay: Duration, what: &str) {
    if delay.is_zero() {
        return;
    }
    tracing::debug!(?delay, what, "settling");
    std::thread::sleep(delay);
}

/// Paths inside the server directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLayout {
    root: PathBuf,
}

impl ServerLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn server_jar(&self) -> PathBuf {
        self.root.join(SERVER_JAR)
    }

    pub fn mods_dir(&self) -> PathBuf {
        self.root.join("mods")
    }

    pub fn mod_jar(&self) -> PathBuf {
        self.mods_dir().join(MOD_JAR)
    }

    pub fn properties(&self) -> PathBuf {
        self.root.join("server.properties")
    }

    pub fn eula(&self) -> PathBuf {
        self.root.join("eula.txt")
    }

    pub fn world_dir(&self) -> PathBuf {
        self.root.join("world")
    }

    /// Database the mod writes generated LODs into.
    pub fn artifact(&self) -> PathBuf {
        self.world_dir().join("data").join("DistantHorizons.sqlite")
    }
}

impl Default for ServerLayout {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_DIR)
    }
}

/// What the log has told us about one pregen so far.
#[derive(Debug, Default)]
pub struct PregenObservation {
    pub started_at: Option<Instant>,
    pub completed_at: Option<Instant>,
    pub percent: Option<u8>,
}

impl PregenObservation {
    /// Record the effect of one log line. Returns `Accept` on the completion marker.
    ///
    /// A start marker seen twice keeps its first timestamp.
    pub fn observe(&mut self, line: &str, progress: &Regex) -> LineMatch {
        if line.contains(COMPLETE_MARKER) {
            self.completed_at = Some(Instant::now());
            return LineMatch::Accept;
        }
        if line.contains(START_MARKER) {
            if self.started_at.is_none() {
                self.started_at = Some(Instant::now());
                tracing::debug!("pregen started");
            }
        } else if line.contains(PROGRESS_MARKER) {
            if let Some(percent) = parse_percent(line, progress) {
                self.percent = Some(percent);
            }
        }
        LineMatch::Continue
    }

    /// Time from start to completion; `None` when the start was never seen.
    pub fn elapsed(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end.saturating_duration_since(start)),
            _ => None,
        }
    }
}

/// Integer percentage in a progress line, clamped to 100.
pub fn parse_percent(line: &str, progress: &Regex) -> Option<u8> {
    let digits = progress.captures(line)?.get(1)?.as_str();
    let value: u32 = digits.parse().ok()?;
    Some(value.min(100) as u8)
}

/// Runs every configured seed against the server and collects the results.
pub struct BenchmarkRunner {
    config: BenchConfig,
    layout: ServerLayout,
    supervisor: ProcessSupervisor,
    progress: ProgressStore,
    reporter: Box<dyn Reporter>,
    delays: SettleDelays,
    command: LaunchCommand,
    progress_pattern: Regex,
}

impl BenchmarkRunner {
    /// Validate `config` and prepare a runner. Nothing is launched yet.
    pub fn new(config: BenchConfig, layout: ServerLayout, progress: ProgressStore) -> Result<Self> {
        config.validate()?;
        let progress_pattern = Regex::new(PROGRESS_PATTERN)
            .map_err(|e| BenchError::Config(format!("invalid progress pattern: {e}")))?;
        let supervisor = ProcessSupervisor::new(SupervisorOptions::from_config(&config));
        let command = config.launch_command();

        Ok(Self {
            config,
            layout,
            supervisor,
            progress,
            reporter: Box::new(MultiReporter::new(Vec::new())),
            delays: SettleDelays::default(),
            command,
            progress_pattern,
        })
    }

    /// Launch something other than the configured Java command.
    pub fn with_command(mut self, command: LaunchCommand) -> Self {
        self.command = command;
        self
    }

    pub fn with_reporter(mut self, reporter: Box<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_delays(mut self, delays: SettleDelays) -> Self {
        self.delays = delays;
        self
    }

    /// Replace the supervisor options. The active-child handle changes with it.
    pub fn with_supervisor_options(mut self, options: SupervisorOptions) -> Self {
        self.supervisor = ProcessSupervisor::new(options);
        self
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn layout(&self) -> &ServerLayout {
        &self.layout
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    /// Handle for the termination hook.
    pub fn active_child(&self) -> ActiveChild {
        self.supervisor.active_child()
    }

    /// Accept the EULA and enable the white-list on a fresh server directory.
    ///
    /// The server is started once so it writes its default files. That start is
    /// expected to fail on an unaccepted EULA. Returns whether anything was done.
    pub fn bootstrap(&mut self) -> Result<bool> {
        let eula = self.layout.eula();
        if files::has_line(&eula, "eula=true") {
            return Ok(false);
        }

        files::ensure_dir(self.layout.root())?;
        tracing::info!(dir = %self.layout.root().display(), "first run: generating server files");
        match self.supervisor.start(&self.command, self.layout.root()) {
            Ok(()) => self.supervisor.stop(false),
            Err(e) if e.is_launch_failure() && !matches!(e, BenchError::Spawn { .. }) => {
                tracing::debug!(error = %e, "first start ended as expected");
            }
            Err(e) => return Err(e),
        }

        files::update_config_line(&eula, "eula", "eula=true")?;
        files::update_config_line(&self.layout.properties(), "white-list", "white-list=true")?;
        tracing::info!("accepted EULA and enabled white-list");
        Ok(true)
    }

    /// Fail if the server jar or the mod jar is missing.
    pub fn check_assets(&self) -> Result<()> {
        let required = [
            (self.layout.server_jar(), &self.config.fabric_download_url),
            (self.layout.mod_jar(), &self.config.dh_download_url),
        ];
        for (path, url) in required {
            if !path.is_file() {
                return Err(BenchError::MissingAsset {
                    path,
                    hint: format!("download it from {url}"),
                });
            }
        }
        Ok(())
    }

    /// Run every seed without a stored result, in order.
    ///
    /// With `clean` set, stored progress is discarded first. Results loaded from
    /// the store are merged into the report at their seed positions.
    pub fn run(&mut self, clean: bool) -> Result<RunReport> {
        if clean {
            self.progress.clear()?;
        }

        let seeds = self.config.seeds.clone();
        let resume_index = self.progress.resume_index(seeds.len());
        match resume_index {
            Some(0) => tracing::info!(seeds = seeds.len(), "starting benchmark"),
            Some(i) => tracing::info!(seed_index = i, "resuming benchmark"),
            None => tracing::info!("all seeds already complete"),
        }
        if resume_index.is_some() {
            self.check_assets()?;
        }

        self.reporter.run_start(&self.config, resume_index);
        let session_start = Instant::now();
        let mut results = Vec::with_capacity(seeds.len());

        for (index, seed) in seeds.iter().enumerate() {
            if let Some(stored) = self.progress.get(index) {
                let result = stored.clone();
                self.reporter.seed_end(index, seed, &result, true);
                results.push(SeedResult {
                    index,
                    seed: seed.clone(),
                    result,
                    resumed: true,
                });
                continue;
            }

            self.reporter.seed_start(index, seed);
            let result = match self.run_seed(index, seed) {
                Ok(result) => result,
                Err(e) => {
                    self.supervisor.stop(true);
                    tracing::error!(seed_index = index, seed = %seed, error = %e, "seed failed");
                    return Err(e);
                }
            };
            self.reporter.seed_end(index, seed, &result, false);
            results.push(SeedResult {
                index,
                seed: seed.clone(),
                result,
                resumed: false,
            });
        }

        let report = RunReport {
            results,
            ram_gb: self.config.ram_gb,
            generation_radius: self.config.generation_radius,
            thread_preset: self.config.thread_preset.clone(),
            session_duration: session_start.elapsed(),
        };
        self.reporter.run_end(&report);
        Ok(report)
    }

    fn run_seed(&mut self, index: usize, seed: &str) -> Result<BenchmarkResult> {
        let fail = |phase: SeedPhase, reason: String| BenchError::SeedFailed {
            index,
            seed: seed.to_string(),
            phase,
            reason,
        };

        // Prepared: generation is not incremental, every seed starts from an empty world.
        files::remove_dir_if_exists(&self.layout.world_dir())
            .and_then(|()| files::ensure_dir(&self.layout.mods_dir()))
            .map_err(|e| e.during_seed(index, seed, SeedPhase::Prepared))?;
        tracing::debug!(seed_index = index, phase = %SeedPhase::Prepared, "world cleared");

        // ServerUp
        files::update_config_line(
            &self.layout.properties(),
            "level-seed=",
            &format!("level-seed={seed}"),
        )
        .and_then(|()| self.supervisor.start(&self.command, self.layout.root()))
        .map_err(|e| e.during_seed(index, seed, SeedPhase::ServerUp))?;
        tracing::debug!(seed_index = index, phase = %SeedPhase::ServerUp, "server up");
        settle(self.delays.post_start, "post-start");

        // Configured
        self.supervisor
            .send_command(&preset_command(&self.config.thread_preset))
            .map_err(|e| fail(SeedPhase::Configured, e.to_string()))?;
        settle(self.delays.post_configure, "post-configure");

        // WorkloadRunning / WorkloadComplete
        self.supervisor
            .send_command(&pregen_command(self.config.generation_radius))
            .map_err(|e| fail(SeedPhase::WorkloadRunning, e.to_string()))?;

        let mut observation = PregenObservation::default();
        let pattern = &self.progress_pattern;
        let reporter = &self.reporter;
        let outcome = self.supervisor.wait_for_line(None, |line: &LogLine| {
            let before = observation.percent;
            let verdict = observation.observe(line, pattern);
            if let Some(percent) = observation.percent.filter(|p| Some(*p) != before) {
                reporter.seed_progress(index, percent);
            }
            verdict
        });

        match outcome {
            WaitOutcome::Matched => {}
            other => {
                let phase = if observation.started_at.is_some() {
                    SeedPhase::WorkloadComplete
                } else {
                    SeedPhase::WorkloadRunning
                };
                let reason = match other {
                    WaitOutcome::ProcessExited => match self.supervisor.last_exit() {
                        Some(status) => format!("server exited ({status})"),
                        None => "server exited".to_string(),
                    },
                    _ => format!("wait ended with {other:?}"),
                };
                return Err(fail(phase, reason));
            }
        }

        let elapsed = observation.elapsed();
        if elapsed.is_none() {
            tracing::warn!(
                seed_index = index,
                "completion seen without a start marker; elapsed time is unknown"
            );
        }

        // Measured
        settle(self.delays.finalization, "finalization");
        self.supervisor.stop(false);
        let artifact_bytes = files::file_size_or_zero(&self.layout.artifact());
        let result = BenchmarkResult::new(elapsed, artifact_bytes, self.config.generation_radius);
        tracing::info!(
            seed_index = index,
            elapsed = ?result.elapsed,
            artifact_bytes,
            rate = result.rate,
            "seed measured"
        );

        // Persisted
        self.progress
            .append(index, &result)
            .map_err(|e| fail(SeedPhase::Persisted, e.to_string()))?;
        Ok(result)
    }
}
