//! Shared Kubernetes utilities using kube-rs

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::watcher;
use kube::{Client, Config};

use crate::Error;

/// Default connection timeout for kube clients (5s is plenty for local API server)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts
///
/// Without a path the config is inferred (in-cluster service account, then
/// `$KUBECONFIG`, then `~/.kube/config`).
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };

    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Watcher configuration with a server-side timeout.
///
/// The timeout must stay below the client read timeout, otherwise idle
/// watches are cut by the client and surface as errors.
pub fn watcher_config(timeout_secs: u32) -> watcher::Config {
    let read_timeout = DEFAULT_READ_TIMEOUT.as_secs() as u32;
    watcher::Config::default().timeout(timeout_secs.min(read_timeout.saturating_sub(1)))
}

/// True when `finalizers` contains `token`
pub fn has_finalizer(finalizers: Option<&[String]>, token: &str) -> bool {
    finalizers.is_some_and(|f| f.iter().any(|t| t == token))
}

/// Finalizer list with `token` appended, or `None` when already present
pub fn with_finalizer(finalizers: Option<&[String]>, token: &str) -> Option<Vec<String>> {
    if has_finalizer(finalizers, token) {
        return None;
    }
    let mut list = finalizers.map(<[String]>::to_vec).unwrap_or_default();
    list.push(token.to_string());
    Some(list)
}

/// Finalizer list with every occurrence of `token` removed, preserving the
/// order of other tokens, or `None` when `token` is absent
pub fn without_finalizer(finalizers: Option<&[String]>, token: &str) -> Option<Vec<String>> {
    if !has_finalizer(finalizers, token) {
        return None;
    }
    Some(
        finalizers
            .unwrap_or_default()
            .iter()
            .filter(|t| t.as_str() != token)
            .cloned()
            .collect(),
    )
}
