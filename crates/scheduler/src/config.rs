//! Processor configuration (SPEC_FULL.md §1).
//!
//! Grounded on `valtron::executors::threads::get_num_threads`'s
//! environment-variable override pattern (`VALTRON_NUM_THREADS`),
//! generalized to this crate's own variable name.

use std::num::NonZeroUsize;
use std::time::Duration;

/// Environment variable overriding the worker pool size, checked when no
/// explicit count is given to [`ProcessorConfig::new`].
pub const NUM_WORKERS_ENV_VAR: &str = "EWE_SCHEDULER_NUM_WORKERS";

/// Resolved settings for a [`crate::processor::Processor`].
#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    num_workers: usize,
    pop_timeout: Duration,
    daemon_workers: bool,
}

impl ProcessorConfig {
    /// Resolves `num_workers` from, in order: `explicit_num_workers`, the
    /// `EWE_SCHEDULER_NUM_WORKERS` environment variable, then
    /// `std::thread::available_parallelism()`. `daemon_workers` defaults to
    /// `true`, matching spec.md §6's `Processor::new(numWorkers=4,
    /// daemonWorkers=true)`.
    pub fn new(explicit_num_workers: Option<usize>) -> Self {
        let num_workers = explicit_num_workers
            .or_else(Self::from_env)
            .unwrap_or_else(Self::default_parallelism)
            .max(1);
        Self {
            num_workers,
            pop_timeout: Duration::from_secs(5),
            daemon_workers: true,
        }
    }

    fn from_env() -> Option<usize> {
        std::env::var(NUM_WORKERS_ENV_VAR)
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
    }

    fn default_parallelism() -> usize {
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    pub fn pop_timeout(&self) -> Duration {
        self.pop_timeout
    }

    pub fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout = timeout;
        self
    }

    /// `true` (the default) if dropping the [`crate::processor::Processor`]
    /// should let its worker threads detach rather than block the drop on
    /// their completion.
    ///
    /// The original's `are_daemon_workers` is passed straight through to
    /// `threading.Thread(daemon=...)`: a daemon thread never keeps the
    /// Python process alive past `main` exiting. `std::thread` has no
    /// non-daemon mode to mirror — an unjoined `JoinHandle` already detaches
    /// and never blocks process exit — so this flag is realized the other
    /// way around: `daemon_workers = false` makes `Processor`'s `Drop`
    /// block until every worker thread has actually exited, the Rust
    /// equivalent of opting OUT of the default daemon-like behavior.
    pub fn daemon_workers(&self) -> bool {
        self.daemon_workers
    }

    pub fn with_daemon_workers(mut self, daemon_workers: bool) -> Self {
        self.daemon_workers = daemon_workers;
        self
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn explicit_count_wins_over_env_and_default() {
        std::env::set_var(NUM_WORKERS_ENV_VAR, "7");
        let config = ProcessorConfig::new(Some(3));
        assert_eq!(config.num_workers(), 3);
        std::env::remove_var(NUM_WORKERS_ENV_VAR);
    }

    #[test]
    #[serial]
    fn env_var_wins_over_default_parallelism() {
        std::env::set_var(NUM_WORKERS_ENV_VAR, "5");
        let config = ProcessorConfig::new(None);
        assert_eq!(config.num_workers(), 5);
        std::env::remove_var(NUM_WORKERS_ENV_VAR);
    }

    #[test]
    #[serial]
    fn falls_back_to_available_parallelism_when_unset() {
        std::env::remove_var(NUM_WORKERS_ENV_VAR);
        let config = ProcessorConfig::new(None);
        assert!(config.num_workers() >= 1);
    }

    #[test]
    fn daemon_workers_defaults_to_true_and_is_overridable() {
        let config = ProcessorConfig::new(Some(1));
        assert!(config.daemon_workers());
        let config = config.with_daemon_workers(false);
        assert!(!config.daemon_workers());
    }
}
