//! Reconcile worker pool
//!
//! Workers pull keys from the [`WorkQueue`] one at a time. The queue's
//! processing set keeps a key on at most one worker; different keys run in
//! parallel.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use classguard_common::metrics::{self, ReconcileTimer};

use crate::class::MachineClass;
use crate::key::ObjectKey;
use crate::queue::WorkQueue;
use crate::reconciler::{reconcile, Context};

/// Process one key from the queue.
///
/// Returns `false` once the queue is shut down and drained.
pub async fn process_next<K: MachineClass>(
    queue: &Arc<WorkQueue<ObjectKey>>,
    ctx: &Context<K>,
    max_retries: u32,
) -> bool {
    let Some(key) = queue.get().await else {
        return false;
    };

    let kind = K::class_kind();
    let timer = ReconcileTimer::start(kind.clone());
    match reconcile(&key, ctx).await {
        Ok(outcome) => {
            debug!(class = %key, kind = %kind, outcome = %outcome, "Reconciled class");
            timer.success(outcome.as_str());
            queue.forget(&key);
        }
        Err(e) => {
            timer.error(e.error_type());
            let requeues = queue.num_requeues(&key);
            if e.is_retryable() && requeues < max_retries {
                warn!(
                    class = %key,
                    kind = %kind,
                    error = %e,
                    requeues,
                    "Reconcile failed, requeueing with backoff"
                );
                queue.add_rate_limited(key.clone());
            } else {
                error!(
                    class = %key,
                    kind = %kind,
                    error = %e,
                    requeues,
                    retryable = e.is_retryable(),
                    "Dropping class from queue"
                );
                metrics::record_key_dropped(&kind);
                queue.forget(&key);
            }
        }
    }
    queue.done(&key);
    true
}

/// Run `workers` reconcile workers until `shutdown` fires and the queue drains.
///
/// Workers start only once the dependency index has synced; keys queued
/// before then wait in the queue instead of burning their retries.
pub async fn run_workers<K: MachineClass>(
    ctx: Arc<Context<K>>,
    queue: Arc<WorkQueue<ObjectKey>>,
    workers: usize,
    max_retries: u32,
    shutdown: CancellationToken,
) {
    tokio::select! {
        biased;
        _ = ctx.index.wait_synced() => {}
        _ = shutdown.cancelled() => {
            info!(
                kind = %K::class_kind(),
                queued = queue.len(),
                "Shut down before dependents synced"
            );
            queue.shut_down();
            return;
        }
    }
    debug!(kind = %K::class_kind(), "Dependents synced, starting workers");

    let stopper = {
        let queue = queue.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            queue.shut_down();
        })
    };

    let handles: Vec<_> = (0..workers.max(1))
        .map(|_| {
            let ctx = ctx.clone();
            let queue = queue.clone();
            tokio::spawn(async move { while process_next(&queue, &ctx, max_retries).await {} })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!(kind = %K::class_kind(), error = %e, "Reconcile worker panicked");
        }
    }
    stopper.abort();
}
