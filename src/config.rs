//! Configuration types.

use std::path::PathBuf;

/// Runtime configuration for the engine and runner.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the local database file.
    pub db_path: PathBuf,
    /// Maximum number of jobs executing concurrently.
    pub max_parallel_jobs: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/jobflow.db"),
            max_parallel_jobs: 10,
        }
    }
}

impl Config {
    /// Build a config from `JOBFLOW_DB` and `JOBFLOW_MAX_JOBS` environment
    /// variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            db_path: std::env::var("JOBFLOW_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            max_parallel_jobs: std::env::var("JOBFLOW_MAX_JOBS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_parallel_jobs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert!(config.max_parallel_jobs > 0);
        assert!(config.db_path.to_string_lossy().ends_with(".db"));
    }
}
