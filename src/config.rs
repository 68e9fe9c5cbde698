//! Benchmark configuration.
//!
//! Configuration lives in a TOML file (`dh-benchmark.toml` by default). Every
//! key is optional; a missing file is created with the defaults and a comment
//! per key so operators can see what is tunable.

use crate::error::{BenchError, Result};
use crate::supervisor::LaunchCommand;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "dh-benchmark.toml";

/// Name of the server jar inside the server directory.
pub const SERVER_JAR: &str = "fabric-server.jar";

/// Largest accepted `timeout_scale`.
pub const MAX_TIMEOUT_SCALE: f64 = 1000.0;

const DEFAULT_SEEDS: [&str; 5] = [
    "5057296280818819649",
    "2412466893128258733",
    "3777092783861568240",
    "-8505774097130463405",
    "4753729061374190018",
];

/// Configuration for a benchmark session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Heap handed to the server, in GB.
    #[serde(default = "default_ram_gb")]
    pub ram_gb: u32,
    /// World seeds, one benchmark run each.
    #[serde(default = "default_seeds", with = "seeds_serde")]
    pub seeds: Vec<String>,
    /// Thread preset applied before generation starts.
    #[serde(default = "default_thread_preset")]
    pub thread_preset: String,
    /// Generation radius in chunks.
    #[serde(default = "default_generation_radius")]
    pub generation_radius: u32,
    #[serde(default = "default_fabric_download_url")]
    pub fabric_download_url: String,
    #[serde(default = "default_dh_download_url")]
    pub dh_download_url: String,
    /// Extra JVM arguments, inserted before `-jar`.
    #[serde(default)]
    pub extra_jvm_args: Vec<String>,
    /// Mirror the server log to our own log output.
    #[serde(default)]
    pub debug_mode: bool,
    /// Multiplier applied to every startup and shutdown timeout.
    #[serde(default = "default_timeout_scale")]
    pub timeout_scale: f64,
    /// Java executable used to launch the server.
    #[serde(default = "default_java_path")]
    pub java_path: String,
}

fn default_ram_gb() -> u32 {
    8
}
fn default_seeds() -> Vec<String> {
    DEFAULT_SEEDS.iter().map(|s| s.to_string()).collect()
}
fn default_thread_preset() -> String {
    "I_PAID_FOR_THE_WHOLE_CPU".to_string()
}
fn default_generation_radius() -> u32 {
    128
}
fn default_fabric_download_url() -> String {
    "https://meta.fabricmc.net/v2/versions/loader/1.21.1/0.16.12/1.0.3/server/jar".to_string()
}
fn default_dh_download_url() -> String {
    "https://cdn.modrinth.com/data/uCdwusMi/versions/jkSxZOJh/DistantHorizons-neoforge-fabric-2.3.2-b-1.21.1.jar"
        .to_string()
}
fn default_timeout_scale() -> f64 {
    1.0
}
fn default_java_path() -> String {
    "java".to_string()
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            ram_gb: default_ram_gb(),
            seeds: default_seeds(),
            thread_preset: default_thread_preset(),
            generation_radius: default_generation_radius(),
            fabric_download_url: default_fabric_download_url(),
            dh_download_url: default_dh_download_url(),
            extra_jvm_args: Vec::new(),
            debug_mode: false,
            timeout_scale: default_timeout_scale(),
            java_path: default_java_path(),
        }
    }
}

impl BenchConfig {
    /// Create a new config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the config file, writing a commented default file first if it is missing.
    ///
    /// Environment overrides are applied on top, then the result is validated.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            std::fs::write(path, default_file_contents()).map_err(|e| BenchError::io(path, e))?;
            tracing::info!(path = %path.display(), "wrote default configuration");
        }

        let text = std::fs::read_to_string(path).map_err(|e| BenchError::io(path, e))?;
        let mut cfg = Self::from_toml_str(&text).map_err(|source| BenchError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a config from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply environment overrides.
    ///
    /// Supported variables:
    /// - `DH_BENCH_DEBUG`: mirror server output (`1`/`true`)
    /// - `DH_BENCH_TIMEOUT_SCALE`: timeout multiplier
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any variable source; see [`BenchConfig::apply_env`].
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("DH_BENCH_DEBUG") {
            self.debug_mode = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = lookup("DH_BENCH_TIMEOUT_SCALE") {
            match v.trim().parse() {
                Ok(scale) => self.timeout_scale = scale,
                Err(_) => tracing::warn!(value = %v, "ignoring unparsable DH_BENCH_TIMEOUT_SCALE"),
            }
        }
    }

    /// Reject values the runner cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.seeds.is_empty() {
            return Err(BenchError::Config("seed list is empty".to_string()));
        }
        if let Some(i) = self.seeds.iter().position(|s| s.trim().is_empty()) {
            return Err(BenchError::Config(format!("seed #{i} is blank")));
        }
        if !self.timeout_scale.is_finite()
            || self.timeout_scale <= 0.0
            || self.timeout_scale > MAX_TIMEOUT_SCALE
        {
            return Err(BenchError::Config(format!(
                "timeout_scale must be in (0, {MAX_TIMEOUT_SCALE}], got {}",
                self.timeout_scale
            )));
        }
        if self.generation_radius == 0 {
            return Err(BenchError::Config(
                "generation_radius must be at least 1".to_string(),
            ));
        }
        if self.ram_gb == 0 {
            return Err(BenchError::Config("ram_gb must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Scale a base timeout by `timeout_scale`, saturating at `Duration::MAX`.
    ///
    /// A scale that is not a positive number leaves `base` unchanged.
    pub fn scaled(&self, base: Duration) -> Duration {
        if self.timeout_scale.is_nan() || self.timeout_scale <= 0.0 {
            return base;
        }
        Duration::try_from_secs_f64(base.as_secs_f64() * self.timeout_scale)
            .unwrap_or(Duration::MAX)
    }

    /// Command line used to launch the server from inside its directory.
    pub fn launch_command(&self) -> LaunchCommand {
        let mut args = vec![format!("-Xmx{}G", self.ram_gb)];
        args.extend(self.extra_jvm_args.iter().cloned());
        args.push("-jar".to_string());
        args.push(SERVER_JAR.to_string());
        args.push("nogui".to_string());
        LaunchCommand::new(&self.java_path).args(args)
    }

    /// Set the seed list.
    pub fn seeds<I, S>(mut self, seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.seeds = seeds.into_iter().map(Into::into).collect();
        self
    }

    /// Set the generation radius.
    pub fn radius(mut self, radius: u32) -> Self {
        self.generation_radius = radius;
        self
    }

    /// Set the timeout multiplier.
    pub fn timeout_scale(mut self, scale: f64) -> Self {
        self.timeout_scale = scale;
        self
    }

    /// Set server log mirroring.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug_mode = debug;
        self
    }

    /// Set the thread preset.
    pub fn thread_preset(mut self, preset: impl Into<String>) -> Self {
        self.thread_preset = preset.into();
        self
    }
}

fn default_file_contents() -> String {
    let d = BenchConfig::default();
    let seeds = d
        .seeds
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"# RAM allocated to the server in GB.
ram_gb = {ram}

# World seeds to benchmark, one run each.
seeds = [{seeds}]

# Distant Horizons thread preset used while generating.
# Available presets: MINIMAL_IMPACT, LOW_IMPACT, BALANCED, AGGRESSIVE, I_PAID_FOR_THE_WHOLE_CPU.
thread_preset = "{preset}"

# Radius in chunks of the area generated around the world origin.
generation_radius = {radius}

# Where to get the server jar if it is missing.
fabric_download_url = "{fabric}"

# Where to get the Distant Horizons jar if it is missing.
dh_download_url = "{dh}"

# Extra JVM arguments, e.g. ["-XX:+UseG1GC"].
extra_jvm_args = []

# Print the server log while benchmarking.
debug_mode = false

# Multiplier for startup and shutdown timeouts. Raise it on slow machines.
timeout_scale = 1.0

# Java executable used to launch the server.
java_path = "{java}"
"#,
        ram = d.ram_gb,
        preset = d.thread_preset,
        radius = d.generation_radius,
        fabric = d.fabric_download_url,
        dh = d.dh_download_url,
        java = d.java_path,
    )
}

/// Seeds may be written as TOML integers or strings; both become strings.
mod seeds_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SeedValue {
        Int(i64),
        Str(String),
    }

    pub fn serialize<S: Serializer>(seeds: &[String], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(seeds)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        let raw: Vec<SeedValue> = Vec::deserialize(d)?;
        Ok(raw
            .into_iter()
            .map(|v| match v {
                SeedValue::Int(n) => n.to_string(),
                SeedValue::Str(s) => s,
            })
            .collect())
    }
}
