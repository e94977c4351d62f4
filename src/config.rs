use std::path::PathBuf;
use std::time::Duration;

/// Location of the persistent collections.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding `jobs.json`, `dlq.json` and the stop sentinel.
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn jobs_file(&self) -> PathBuf {
        self.data_dir.join("jobs.json")
    }

    pub fn dlq_file(&self) -> PathBuf {
        self.data_dir.join("dlq.json")
    }

    /// Sentinel file observed by running pools; see [`crate::worker::WorkerPool`].
    pub fn stop_file(&self) -> PathBuf {
        self.data_dir.join("stop")
    }
}

/// Configuration for shell command execution.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Hard limit on a single execution; the child is killed past it.
    pub timeout: Duration,

    /// Shell used to run commands. `None` falls back to `$SHELL`, then
    /// `/bin/sh`.
    pub shell: Option<String>,

    /// Captured output is truncated beyond this many bytes so chatty
    /// commands cannot grow job records without bound.
    pub max_output_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5 * 60),
            shell: None,
            max_output_bytes: 64 * 1024,
        }
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of concurrent polling workers.
    pub workers: usize,

    /// Base of the exponential retry curve; delay is `base^attempts` seconds.
    pub backoff_base: u32,

    /// Sleep between claim attempts when no job is eligible.
    pub poll_interval: Duration,

    /// Sleep after an unexpected worker error before the loop continues.
    pub cooldown: Duration,

    pub executor: ExecutorConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            backoff_base: 2,
            poll_interval: Duration::from_millis(800),
            cooldown: Duration::from_millis(500),
            executor: ExecutorConfig::default(),
        }
    }
}
