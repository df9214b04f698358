//! Controller configuration
//!
//! One [`ControllerConfig`] is shared by every class controller in the
//! process. The operator binary fills it from command line flags (each with
//! a `CLASSGUARD_*` environment fallback); tests use [`Default`].

use std::time::Duration;

use crate::retry::RetryConfig;

/// Default number of reconcile workers per class kind
pub const DEFAULT_WORKERS: usize = 5;

/// Default number of requeues before a failing key is dropped
pub const DEFAULT_MAX_RETRIES: u32 = 15;

/// Default number of attempts for a finalizer update that keeps conflicting
pub const DEFAULT_FINALIZER_ATTEMPTS: u32 = 5;

/// Default watcher timeout (seconds) - must be less than client read_timeout (30s)
pub const DEFAULT_WATCH_TIMEOUT_SECS: u32 = 25;

/// Runtime configuration for the class controllers
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Namespace to watch. `None` watches all namespaces.
    pub namespace: Option<String>,
    /// Concurrent reconcile workers per class kind
    pub workers: usize,
    /// Requeues allowed for a failing key before it is dropped
    pub max_retries: u32,
    /// Attempts for a finalizer update hitting write conflicts
    pub finalizer_attempts: u32,
    /// First requeue delay for a failing key
    pub requeue_base_delay: Duration,
    /// Upper bound for the requeue delay
    pub requeue_max_delay: Duration,
    /// Server-side timeout for watch requests
    pub watch_timeout_secs: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            workers: DEFAULT_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            finalizer_attempts: DEFAULT_FINALIZER_ATTEMPTS,
            requeue_base_delay: Duration::from_millis(5),
            requeue_max_delay: Duration::from_secs(1000),
            watch_timeout_secs: DEFAULT_WATCH_TIMEOUT_SECS,
        }
    }
}

impl ControllerConfig {
    /// Retry policy for finalizer updates that hit write conflicts
    pub fn finalizer_retry(&self) -> RetryConfig {
        RetryConfig::with_max_attempts(self.finalizer_attempts)
    }
}
