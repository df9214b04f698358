//! Command line interface

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};

use classguard_common::config::{
    DEFAULT_FINALIZER_ATTEMPTS, DEFAULT_MAX_RETRIES, DEFAULT_WATCH_TIMEOUT_SECS, DEFAULT_WORKERS,
};
use classguard_common::ControllerConfig;

/// classguard - keeps machine classes alive while machines still use them
#[derive(Parser, Debug)]
#[command(name = "classguard", version, about, long_about = None)]
pub struct Cli {
    /// Controller flags, accepted with or without the `run` subcommand
    #[command(flatten)]
    pub run: RunArgs,

    /// Subcommand (defaults to `run`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Run the machine class controllers (default)
    Run,
    /// Print the CRD manifests as YAML and exit
    Crd,
}

/// Controller flags
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Path to a kubeconfig file (in-cluster config or $KUBECONFIG when unset)
    #[arg(long, global = true, env = "CLASSGUARD_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Namespace to watch (all namespaces when unset)
    #[arg(long, global = true, env = "CLASSGUARD_NAMESPACE")]
    pub namespace: Option<String>,

    /// Concurrent reconcile workers per class kind
    #[arg(long, global = true, env = "CLASSGUARD_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Requeues allowed for a failing class before it is dropped
    #[arg(long, global = true, env = "CLASSGUARD_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Attempts for a finalizer update that keeps conflicting
    #[arg(long, global = true, env = "CLASSGUARD_FINALIZER_ATTEMPTS", default_value_t = DEFAULT_FINALIZER_ATTEMPTS)]
    pub finalizer_attempts: u32,

    /// First requeue delay for a failing class, in milliseconds
    #[arg(long, global = true, env = "CLASSGUARD_REQUEUE_BASE_DELAY_MS", default_value_t = 5)]
    pub requeue_base_delay_ms: u64,

    /// Upper bound for the requeue delay, in seconds
    #[arg(long, global = true, env = "CLASSGUARD_REQUEUE_MAX_DELAY_SECS", default_value_t = 1000)]
    pub requeue_max_delay_secs: u64,

    /// Server-side watch timeout in seconds (kept below the 30s client read timeout)
    #[arg(long, global = true, env = "CLASSGUARD_WATCH_TIMEOUT_SECS", default_value_t = DEFAULT_WATCH_TIMEOUT_SECS)]
    pub watch_timeout_secs: u32,

    /// Emit JSON log lines (`--log-json=false` for plain text)
    #[arg(long, global = true, env = "CLASSGUARD_LOG_JSON", default_value_t = true, action = ArgAction::Set)]
    pub log_json: bool,
}

impl RunArgs {
    /// Controller configuration described by the flags
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            namespace: self.namespace.clone().filter(|ns| !ns.is_empty()),
            workers: self.workers.max(1),
            max_retries: self.max_retries,
            finalizer_attempts: self.finalizer_attempts.max(1),
            requeue_base_delay: Duration::from_millis(self.requeue_base_delay_ms),
            requeue_max_delay: Duration::from_secs(self.requeue_max_delay_secs),
            watch_timeout_secs: self.watch_timeout_secs,
        }
    }
}
