//! Host hardware summary attached to result files.

use regex::Regex;
use serde::Serialize;
use std::path::Path;
use sysinfo::{Disks, System};

/// CPU, RAM, and drive descriptions of the benchmark host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HardwareInfo {
    pub cpu: String,
    pub ram: String,
    pub drive: String,
}

impl HardwareInfo {
    /// Query the host. Fields that cannot be determined read `unknown`.
    pub fn collect() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        system.refresh_memory();

        let cpu = system
            .cpus()
            .first()
            .map(|c| format!("{} {}T", clean_cpu_name(c.brand()), system.cpus().len()))
            .unwrap_or_else(|| "unknown".to_string());

        let gib = system.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
        let ram = if gib > 0.0 {
            format!("{}GB", gib.round() as u64)
        } else {
            "unknown".to_string()
        };

        let drive = std::env::current_dir()
            .ok()
            .and_then(|cwd| current_drive(&cwd))
            .unwrap_or_else(|| "unknown".to_string());

        Self { cpu, ram, drive }
    }
}

/// Strip marketing noise from a CPU brand string.
pub fn clean_cpu_name(raw: &str) -> String {
    const PATTERNS: [&str; 5] = [
        r"\b\d+(?:st|nd|rd|th) Gen\s+",
        r"\(R\)|\(TM\)",
        r"\s*@\s*[0-9]+(?:\.[0-9]+)?\s*GHz",
        r"\s+\d+-Core\s+Processor|\s+Processor|\bCPU\b",
        r" {2,}",
    ];

    let mut name = raw.to_string();
    for (i, pattern) in PATTERNS.iter().enumerate() {
        let Ok(re) = Regex::new(pattern) else {
            continue;
        };
        let replacement = if i == PATTERNS.len() - 1 { " " } else { "" };
        name = re.replace_all(&name, replacement).into_owned();
    }
    // Removing words can leave double spaces behind.
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn current_drive(cwd: &Path) -> Option<String> {
    let cwd = cwd.canonicalize().unwrap_or_else(|_| cwd.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| cwd.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| format!("{} ({:?})", d.name().to_string_lossy(), d.kind()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_clean_intel_brand() {
        assert_eq!(
            clean_cpu_name("12th Gen Intel(R) Core(TM) i7-12700K"),
            "Intel Core i7-12700K"
        );
        assert_eq!(
            clean_cpu_name("Intel(R) Core(TM) i5-8400 CPU @ 2.80GHz"),
            "Intel Core i5-8400"
        );
    }

    #[test]
    fn should_clean_amd_brand() {
        assert_eq!(
            clean_cpu_name("AMD Ryzen 9 5950X 16-Core Processor"),
            "AMD Ryzen 9 5950X"
        );
    }

    #[test]
    fn should_collect_without_panicking() {
        let info = HardwareInfo::collect();
        assert!(!info.cpu.is_empty());
        assert!(!info.ram.is_empty());
        assert!(!info.drive.is_empty());
    }
}
