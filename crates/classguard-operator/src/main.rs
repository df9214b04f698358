//! classguard - finalizer-gated deletion for machine classes

use std::sync::Arc;

use clap::Parser;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use classguard_common::crd::{AWSMachineClass, AzureMachineClass};
use classguard_common::kube_utils::create_client;
use classguard_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use classguard_controller::watch::drain_resync_requests;
use classguard_controller::{ChannelResync, DependencyIndex, DependentResync};
use classguard_operator::cli::{Cli, Commands, RunArgs};
use classguard_operator::controller_runner::{build_class_controller, build_dependent_watches};
use classguard_operator::{crd_names, render_crds};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Crd) => {
            print!("{}", render_crds()?);
            Ok(())
        }
        Some(Commands::Run) | None => run(cli.run).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = args.controller_config();
    init_telemetry(TelemetryConfig {
        log_format: LogFormat::from_json_flag(args.log_json),
        watch_namespace: config.namespace.clone(),
        ..Default::default()
    })?;

    info!(
        namespace = config.namespace.as_deref().unwrap_or("<all>"),
        crds = ?crd_names(),
        "Starting classguard"
    );

    let client = create_client(args.kubeconfig.as_deref()).await?;
    let index = Arc::new(DependencyIndex::new());
    let shutdown = CancellationToken::new();

    let (resync, resync_rx) = ChannelResync::channel();
    let resync: Arc<dyn DependentResync> = Arc::new(resync);

    let (azure, mut tasks) = build_class_controller::<AzureMachineClass>(
        client.clone(),
        index.clone(),
        resync.clone(),
        &config,
        shutdown.clone(),
    );
    let (aws, aws_tasks) = build_class_controller::<AWSMachineClass>(
        client.clone(),
        index.clone(),
        resync,
        &config,
        shutdown.clone(),
    );
    tasks.extend(aws_tasks);
    tasks.extend(build_dependent_watches(
        client,
        index,
        vec![azure, aws],
        &config,
        shutdown.clone(),
    ));
    tasks.push(Box::pin(drain_resync_requests(resync_rx, shutdown.clone())));
    tasks.push(Box::pin(cancel_on_signal(shutdown)));

    join_all(tasks).await;
    info!("classguard stopped");
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM
async fn cancel_on_signal(shutdown: CancellationToken) {
    tokio::select! {
        _ = shutdown.cancelled() => return,
        _ = wait_for_signal() => {}
    }
    info!("Shutdown signal received, draining workers");
    shutdown.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
