//! Benchmark result types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of one seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Time from the workload-start marker to the completion marker.
    ///
    /// `None` when completion was seen without a start marker; the run is kept
    /// but flagged rather than given an invented duration.
    #[serde(with = "opt_duration_serde")]
    pub elapsed: Option<Duration>,
    /// Size of the generated artifact on disk.
    pub artifact_bytes: u64,
    /// Chunks generated per second.
    pub rate: f64,
}

impl BenchmarkResult {
    /// Build a result, deriving the rate from the generation radius.
    pub fn new(elapsed: Option<Duration>, artifact_bytes: u64, radius: u32) -> Self {
        let rate = match elapsed {
            Some(d) if !d.is_zero() => workload_units(radius) as f64 / d.as_secs_f64(),
            _ => 0.0,
        };
        Self {
            elapsed,
            artifact_bytes,
            rate,
        }
    }

    /// Whether the completion marker arrived without a start marker.
    pub fn is_anomalous(&self) -> bool {
        self.elapsed.is_none()
    }

    /// Elapsed nanoseconds, `0` for the anomaly value.
    pub fn elapsed_nanos(&self) -> u64 {
        self.elapsed
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    /// Artifact size in MiB.
    pub fn artifact_mib(&self) -> f64 {
        self.artifact_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Chunks covered by a square pregen of `radius` chunks around the origin.
pub fn workload_units(radius: u32) -> u64 {
    let side = 2 * u64::from(radius) + 1;
    side * side
}

/// A result tied to its position in the seed list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedResult {
    pub index: usize,
    pub seed: String,
    pub result: BenchmarkResult,
    /// Loaded from the progress file instead of measured in this session.
    #[serde(default)]
    pub resumed: bool,
}

/// Results for a whole session, in seed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub results: Vec<SeedResult>,
    pub ram_gb: u32,
    pub generation_radius: u32,
    pub thread_preset: String,
    /// Wall time of this session, excluding resumed seeds.
    #[serde(with = "duration_serde")]
    pub session_duration: Duration,
}

impl RunReport {
    /// Mean elapsed time over seeds with a measured duration.
    pub fn average_elapsed(&self) -> Option<Duration> {
        let measured: Vec<Duration> = self
            .results
            .iter()
            .filter_map(|r| r.result.elapsed)
            .collect();
        if measured.is_empty() {
            return None;
        }
        let total: Duration = measured.iter().sum();
        Some(total / measured.len() as u32)
    }

    /// Mean artifact size over all seeds.
    pub fn average_artifact_bytes(&self) -> u64 {
        if self.results.is_empty() {
            return 0;
        }
        let total: u64 = self.results.iter().map(|r| r.result.artifact_bytes).sum();
        total / self.results.len() as u64
    }

    /// Mean rate over seeds with a measured duration.
    pub fn average_rate(&self) -> f64 {
        let rates: Vec<f64> = self
            .results
            .iter()
            .filter(|r| !r.result.is_anomalous())
            .map(|r| r.result.rate)
            .collect();
        if rates.is_empty() {
            0.0
        } else {
            rates.iter().sum::<f64>() / rates.len() as f64
        }
    }

    /// Number of seeds whose duration could not be measured.
    pub fn anomalies(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.result.is_anomalous())
            .count()
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_nanos().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(d)?;
        Ok(Duration::from_nanos(nanos))
    }
}

mod opt_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        d.map(|d| d.as_nanos()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let nanos = Option::<u64>::deserialize(d)?;
        Ok(nanos.map(Duration::from_nanos))
    }
}
