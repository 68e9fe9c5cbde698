//! Error types for the benchmark runner.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::runner::SeedPhase;

/// Errors raised while configuring, launching, or driving a benchmark run.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server did not report ready within {0:?}")]
    StartupTimeout(Duration),

    #[error("Server exited before reporting ready")]
    ExitedDuringStartup,

    #[error("Server is not running")]
    NotRunning,

    #[error("Seed #{index} ({seed}) failed during {phase}: {reason}")]
    SeedFailed {
        index: usize,
        seed: String,
        phase: SeedPhase,
        reason: String,
    },

    #[error("Seed #{index} ({seed}) failed during {phase}: {source}")]
    SeedAborted {
        index: usize,
        seed: String,
        phase: SeedPhase,
        #[source]
        source: Box<BenchError>,
    },

    #[error("Missing {path}: {hint}")]
    MissingAsset { path: PathBuf, hint: String },

    #[error("Termination handler already installed")]
    SessionInstalled,
}

impl BenchError {
    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BenchError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error came from launching the server rather than from a running seed.
    pub fn is_launch_failure(&self) -> bool {
        match self {
            BenchError::Spawn { .. }
            | BenchError::StartupTimeout(_)
            | BenchError::ExitedDuringStartup => true,
            BenchError::SeedAborted { source, .. } => source.is_launch_failure(),
            _ => false,
        }
    }

    /// Attach the seed and phase to an error raised by a lower layer.
    pub fn during_seed(self, index: usize, seed: &str, phase: SeedPhase) -> Self {
        BenchError::SeedAborted {
            index,
            seed: seed.to_string(),
            phase,
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_name_seed_and_phase_in_seed_failure() {
        let err = BenchError::SeedFailed {
            index: 2,
            seed: "4753729061374190018".to_string(),
            phase: SeedPhase::WorkloadComplete,
            reason: "server exited".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("#2"));
        assert!(msg.contains("4753729061374190018"));
        assert!(msg.contains("workload-complete"));
    }

    #[test]
    fn should_classify_launch_failures() {
        assert!(BenchError::ExitedDuringStartup.is_launch_failure());
        assert!(BenchError::StartupTimeout(Duration::from_secs(1)).is_launch_failure());
        assert!(!BenchError::NotRunning.is_launch_failure());
    }

    #[test]
    fn should_keep_launch_classification_when_seed_context_is_added() {
        let err = BenchError::ExitedDuringStartup.during_seed(1, "-42", SeedPhase::ServerUp);
        assert!(err.is_launch_failure());
        let msg = err.to_string();
        assert!(msg.contains("#1"));
        assert!(msg.contains("-42"));
        assert!(msg.contains("server-up"));
        assert!(msg.contains("exited before reporting ready"));
        assert!(std::error::Error::source(&err).is_some());

        let io = BenchError::io(
            "server/world",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        )
        .during_seed(0, "7", SeedPhase::Prepared);
        assert!(!io.is_launch_failure());
        assert!(io.to_string().contains("prepared"));
    }
}
