//! Pluggable reporters for benchmark output.

use crate::config::BenchConfig;
use crate::hardware::HardwareInfo;
use crate::result::{BenchmarkResult, RunReport};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default results file, tab-separated.
pub const RESULTS_FILE: &str = "benchmark-results.csv";

/// Trait for benchmark result reporters.
pub trait Reporter: Send + Sync {
    /// Called once before the first seed. `resume_index` is the first seed to
    /// run, or `None` when every seed is already stored.
    fn run_start(&self, _config: &BenchConfig, _resume_index: Option<usize>) {}

    /// Called when a seed is about to run.
    fn seed_start(&self, _index: usize, _seed: &str) {}

    /// Called when the generation percentage changes.
    fn seed_progress(&self, _index: usize, _percent: u8) {}

    /// Called for every seed, fresh or loaded from the progress file.
    fn seed_end(&self, _index: usize, _seed: &str, _result: &BenchmarkResult, _resumed: bool) {}

    /// Called after the last seed.
    fn run_end(&self, _report: &RunReport) {}
}

/// Render a duration as `HH:MM:SS`.
pub fn format_hms(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn format_elapsed(result: &BenchmarkResult) -> String {
    match result.elapsed {
        Some(d) => format_hms(d),
        None => "unknown".to_string(),
    }
}

/// Console reporter that prints results to stderr.
pub struct ConsoleReporter {
    #[cfg_attr(not(feature = "progress-bar"), allow(dead_code))]
    show_progress: bool,
    #[cfg(feature = "progress-bar")]
    bar: std::sync::Mutex<Option<indicatif::ProgressBar>>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self {
            show_progress: true,
            #[cfg(feature = "progress-bar")]
            bar: std::sync::Mutex::new(None),
        }
    }

    /// Show a live progress bar while a seed generates.
    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn seed_line(seed: &str, result: &BenchmarkResult) -> String {
        format!(
            "Seed {}: Elapsed Time: {}, Database Size: {} MB",
            seed,
            format_elapsed(result),
            result.artifact_mib().round() as u64
        )
    }

    #[cfg(feature = "progress-bar")]
    fn with_bar(&self, f: impl FnOnce(&mut Option<indicatif::ProgressBar>)) {
        let mut bar = self.bar.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut bar);
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for ConsoleReporter {
    fn run_start(&self, config: &BenchConfig, resume_index: Option<usize>) {
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!("  Distant Horizons pregen benchmark");
        eprintln!(
            "  Seeds: {}, Radius: {}, RAM: {}GB, Preset: {}",
            config.seeds.len(),
            config.generation_radius,
            config.ram_gb,
            config.thread_preset
        );
        match resume_index {
            Some(0) => {}
            Some(i) => eprintln!("  Resuming at seed {} of {}", i + 1, config.seeds.len()),
            None => eprintln!("  All seeds already completed"),
        }
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    fn seed_start(&self, index: usize, seed: &str) {
        eprintln!("  [{}] seed {} ...", index + 1, seed);
        #[cfg(feature = "progress-bar")]
        if self.show_progress {
            self.with_bar(|bar| {
                let pb = indicatif::ProgressBar::new(100);
                if let Ok(style) = indicatif::ProgressStyle::with_template(
                    "  {spinner} [{elapsed_precise}] [{bar:40}] {pos:>3}%",
                ) {
                    pb.set_style(style.progress_chars("=> "));
                }
                pb.enable_steady_tick(Duration::from_millis(250));
                *bar = Some(pb);
            });
        }
    }

    fn seed_progress(&self, _index: usize, _percent: u8) {
        #[cfg(feature = "progress-bar")]
        self.with_bar(|bar| {
            if let Some(pb) = bar.as_ref() {
                pb.set_position(u64::from(_percent));
            }
        });
    }

    fn seed_end(&self, _index: usize, seed: &str, result: &BenchmarkResult, resumed: bool) {
        #[cfg(feature = "progress-bar")]
        self.with_bar(|bar| {
            if let Some(pb) = bar.take() {
                pb.finish_and_clear();
            }
        });
        let suffix = if resumed { " (resumed)" } else { "" };
        eprintln!("  {}{}", Self::seed_line(seed, result), suffix);
    }

    fn run_end(&self, report: &RunReport) {
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        let avg = report
            .average_elapsed()
            .map(format_hms)
            .unwrap_or_else(|| "unknown".to_string());
        let avg_mib = report.average_artifact_bytes() as f64 / (1024.0 * 1024.0);
        eprintln!(
            "  Average: Elapsed Time: {}, Database Size: {} MB",
            avg,
            avg_mib.round() as u64
        );
        if report.anomalies() > 0 {
            eprintln!(
                "  {} seed(s) completed without a start marker and were left out of the time average",
                report.anomalies()
            );
        }
        eprintln!(
            "  Completed {} seeds in {}",
            report.results.len(),
            format_hms(report.session_duration)
        );
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }
}

/// Writes the tab-separated results table plus a hardware block.
pub struct CsvReporter {
    path: PathBuf,
    hardware: Option<HardwareInfo>,
}

impl CsvReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            hardware: None,
        }
    }

    /// Use fixed hardware info instead of querying the host.
    pub fn with_hardware(mut self, hardware: HardwareInfo) -> Self {
        self.hardware = Some(hardware);
        self
    }
}

impl Reporter for CsvReporter {
    fn run_end(&self, report: &RunReport) {
        let hardware = self.hardware.clone().unwrap_or_else(HardwareInfo::collect);
        match std::fs::write(&self.path, render_table(report, &hardware)) {
            Ok(()) => eprintln!("  Results written to: {}", self.path.display()),
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "failed to write results table"),
        }
    }
}

/// Header row, data row, blank line, then `CPU RAM DRIVE`.
pub fn render_table(report: &RunReport, hardware: &HardwareInfo) -> String {
    let n = report.results.len();
    let mut out = String::new();

    for i in 1..=n {
        let _ = write!(out, "Run {i}\t");
    }
    out.push_str("Average\t");
    for i in 1..=n {
        let _ = write!(out, "DB Size Run {i}\t");
    }
    out.push_str("DB Size Average\tAllocated RAM\n");

    for r in &report.results {
        let _ = write!(out, "{}\t", format_elapsed(&r.result));
    }
    let avg = report
        .average_elapsed()
        .map(format_hms)
        .unwrap_or_else(|| "unknown".to_string());
    let _ = write!(out, "{avg}\t");
    for r in &report.results {
        let _ = write!(out, "{}MB\t", r.result.artifact_mib().round() as u64);
    }
    let avg_mib = report.average_artifact_bytes() as f64 / (1024.0 * 1024.0);
    let _ = writeln!(out, "{}MB\t{}GB", avg_mib.round() as u64, report.ram_gb);

    out.push('\n');
    out.push_str("CPU\tRAM\tDRIVE\n");
    let _ = writeln!(out, "{}\t{}\t{}", hardware.cpu, hardware.ram, hardware.drive);
    out
}

/// JSON reporter that writes the run report to a file.
pub struct JsonReporter {
    path: PathBuf,
}

impl JsonReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(Serialize)]
struct JsonDocument<'a> {
    #[serde(flatten)]
    report: &'a RunReport,
    hardware: HardwareInfo,
}

impl Reporter for JsonReporter {
    fn run_end(&self, report: &RunReport) {
        let doc = JsonDocument {
            report,
            hardware: HardwareInfo::collect(),
        };
        if let Err(e) = write_json(&self.path, &doc) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write JSON results");
        }
    }
}

fn write_json(path: &Path, doc: &JsonDocument<'_>) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(doc).map_err(std::io::Error::other)?;
    std::fs::write(path, json)?;
    eprintln!("  Results written to: {}", path.display());
    Ok(())
}

/// Combines multiple reporters.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new(reporters: Vec<Box<dyn Reporter>>) -> Self {
        Self { reporters }
    }
}

impl Reporter for MultiReporter {
    fn run_start(&self, config: &BenchConfig, resume_index: Option<usize>) {
        for r in &self.reporters {
            r.run_start(config, resume_index);
        }
    }

    fn seed_start(&self, index: usize, seed: &str) {
        for r in &self.reporters {
            r.seed_start(index, seed);
        }
    }

    fn seed_progress(&self, index: usize, percent: u8) {
        for r in &self.reporters {
            r.seed_progress(index, percent);
        }
    }

    fn seed_end(&self, index: usize, seed: &str, result: &BenchmarkResult, resumed: bool) {
        for r in &self.reporters {
            r.seed_end(index, seed, result, resumed);
        }
    }

    fn run_end(&self, report: &RunReport) {
        for r in &self.reporters {
            r.run_end(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::SeedResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const MIB: u64 = 1024 * 1024;

    fn report() -> RunReport {
        let seeds = [(Some(3_725), 100 * MIB), (None, 50 * MIB), (Some(3_675), 150 * MIB)];
        RunReport {
            results: seeds
                .iter()
                .enumerate()
                .map(|(i, (secs, bytes))| SeedResult {
                    index: i,
                    seed: format!("seed{i}"),
                    result: BenchmarkResult::new(secs.map(Duration::from_secs), *bytes, 16),
                    resumed: i == 0,
                })
                .collect(),
            ram_gb: 8,
            generation_radius: 16,
            thread_preset: "BALANCED".to_string(),
            session_duration: Duration::from_secs(7_400),
        }
    }

    fn hardware() -> HardwareInfo {
        HardwareInfo {
            cpu: "AMD Ryzen 9 5950X 32T".to_string(),
            ram: "64GB".to_string(),
            drive: "nvme0n1 (SSD)".to_string(),
        }
    }

    #[test]
    fn should_format_hours_minutes_seconds() {
        assert_eq!(format_hms(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_hms(Duration::from_secs(3_725)), "01:02:05");
        assert_eq!(format_hms(Duration::from_millis(59_999)), "00:00:59");
        assert_eq!(format_hms(Duration::from_secs(100 * 3600)), "100:00:00");
    }

    #[test]
    fn should_print_seed_line_like_the_summary() {
        let result = BenchmarkResult::new(Some(Duration::from_secs(61)), 3 * MIB / 2, 16);
        assert_eq!(
            ConsoleReporter::seed_line("42", &result),
            "Seed 42: Elapsed Time: 00:01:01, Database Size: 2 MB"
        );
    }

    #[test]
    fn should_render_results_table_with_hardware_block() {
        let table = render_table(&report(), &hardware());
        let lines: Vec<_> = table.lines().collect();

        assert_eq!(
            lines[0],
            "Run 1\tRun 2\tRun 3\tAverage\tDB Size Run 1\tDB Size Run 2\tDB Size Run 3\tDB Size Average\tAllocated RAM"
        );
        assert_eq!(
            lines[1],
            "01:02:05\tunknown\t01:01:15\t01:01:40\t100MB\t50MB\t150MB\t100MB\t8GB"
        );
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "CPU\tRAM\tDRIVE");
        assert_eq!(lines[4], "AMD Ryzen 9 5950X 32T\t64GB\tnvme0n1 (SSD)");
    }

    #[test]
    fn should_write_table_on_run_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RESULTS_FILE);
        CsvReporter::new(&path)
            .with_hardware(hardware())
            .run_end(&report());

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Run 1\t"));
        assert!(text.contains("CPU\tRAM\tDRIVE"));
    }

    #[test]
    fn should_not_panic_when_table_cannot_be_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join(RESULTS_FILE);
        CsvReporter::new(&path)
            .with_hardware(hardware())
            .run_end(&report());
        assert!(!path.exists());
    }

    #[test]
    fn should_write_json_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("results.json");
        JsonReporter::new(&path).run_end(&report());

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["results"].as_array().unwrap().len(), 3);
        assert_eq!(json["ram_gb"], 8);
        assert!(json["results"][1]["result"]["elapsed"].is_null());
        assert!(json["hardware"]["cpu"].is_string());
    }

    struct Counting(Arc<AtomicUsize>);

    impl Reporter for Counting {
        fn seed_progress(&self, _index: usize, _percent: u8) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn run_end(&self, _report: &RunReport) {
            self.0.fetch_add(100, Ordering::SeqCst);
        }
    }

    #[test]
    fn should_fan_out_to_every_reporter() {
        let count = Arc::new(AtomicUsize::new(0));
        let multi = MultiReporter::new(vec![
            Box::new(Counting(count.clone())),
            Box::new(Counting(count.clone())),
        ]);
        multi.seed_progress(0, 10);
        multi.run_end(&report());
        assert_eq!(count.load(Ordering::SeqCst), 202);
    }
}
