//! Flat key/value configuration for the runtime, per §6 of the design.
//!
//! Layered the way `subx-cli` and `ferrex-config` layer theirs: built-in defaults,
//! then an optional `taskrunner.toml` on disk, then `TASKRUNNER_*` environment
//! overrides (e.g. `TASKRUNNER_SCHEDULER__MAX_CONCURRENT_JOBS=4`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_concurrent_jobs: usize,
    pub priority_weight_critical: u32,
    pub priority_weight_high: u32,
    pub priority_weight_medium: u32,
    pub priority_weight_low: u32,
    pub memory_cap_mb: u64,
    pub cpu_cap_weight: u64,
    pub admission_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 10,
            priority_weight_critical: 4,
            priority_weight_high: 3,
            priority_weight_medium: 2,
            priority_weight_low: 1,
            memory_cap_mb: 4096,
            cpu_cap_weight: 16,
            admission_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub task_execution_ms: u64,
    pub task_decomposition_ms: u64,
    pub recursive_task_decomposition_ms: u64,
    pub task_refinement_ms: u64,
    pub agent_communication_ms: u64,
    pub llm_request_ms: u64,
    pub file_operations_ms: u64,
    pub database_operations_ms: u64,
    pub network_operations_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            task_execution_ms: 300_000,
            task_decomposition_ms: 600_000,
            recursive_task_decomposition_ms: 720_000,
            task_refinement_ms: 180_000,
            agent_communication_ms: 30_000,
            llm_request_ms: 60_000,
            file_operations_ms: 10_000,
            database_operations_ms: 15_000,
            network_operations_ms: 20_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_multiplier: f64,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_multiplier: 2.0,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            exponential: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub max_bytes: u64,
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_bytes: 50 * 1024 * 1024,
            ttl_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkerConfig {
    pub max_depth: usize,
    pub excluded_dirs: Vec<String>,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            max_depth: 25,
            excluded_dirs: vec![
                ".git".into(),
                ".hg".into(),
                ".svn".into(),
                "node_modules".into(),
                "target".into(),
                "dist".into(),
                "build".into(),
                "coverage".into(),
                ".venv".into(),
                "__pycache__".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub min_score: f64,
    pub max_file_size: u64,
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_score: 0.3,
            max_file_size: 1024 * 1024,
            max_results: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub scheduler: SchedulerConfig,
    pub timeouts: TimeoutConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub walker: WalkerConfig,
    pub search: SearchConfig,
    /// How often the Job Registry sweeps terminal jobs older than its retention window.
    pub cleanup_interval_ms: u64,
    pub cleanup_max_age_ms: u64,
}

impl RuntimeConfig {
    /// Loads configuration from built-in defaults, an optional `taskrunner.toml`
    /// next to the current working directory, and `TASKRUNNER_*` env overrides.
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let defaults = Self::defaults();
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&defaults)?);

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        } else {
            builder = builder.add_source(config::File::with_name("taskrunner").required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TASKRUNNER")
                .separator("__")
                .try_parsing(true),
        );

        let built = builder.build()?;
        Ok(built.try_deserialize()?)
    }

    fn defaults() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            walker: WalkerConfig::default(),
            search: SearchConfig::default(),
            cleanup_interval_ms: 3_600_000,
            cleanup_max_age_ms: 24 * 3_600_000,
        }
    }
}

pub fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}
