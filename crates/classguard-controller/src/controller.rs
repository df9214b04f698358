//! Per-kind controller wiring: queue, dispatcher and worker pool

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use classguard_common::ControllerConfig;

use crate::class::MachineClass;
use crate::dispatcher::EventDispatcher;
use crate::key::ObjectKey;
use crate::queue::WorkQueue;
use crate::reconciler::Context;
use crate::runner::run_workers;

/// Finalizer-gated deletion controller for one class kind
pub struct ClassController<K: MachineClass> {
    ctx: Arc<Context<K>>,
    queue: Arc<WorkQueue<ObjectKey>>,
    config: ControllerConfig,
}

impl<K: MachineClass> ClassController<K> {
    /// Create a controller with its own work queue
    pub fn new(ctx: Context<K>, config: ControllerConfig) -> Self {
        let queue = Arc::new(WorkQueue::new(
            config.requeue_base_delay,
            config.requeue_max_delay,
        ));
        Self {
            ctx: Arc::new(ctx),
            queue,
            config,
        }
    }

    /// Dispatcher feeding this controller's queue
    pub fn dispatcher(&self) -> EventDispatcher {
        EventDispatcher::new(K::class_kind(), self.queue.clone())
    }

    /// Run the worker pool until `shutdown` fires and the queue drains
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            kind = %K::class_kind(),
            workers = self.config.workers,
            max_retries = self.config.max_retries,
            "Starting class controller"
        );
        run_workers(
            self.ctx,
            self.queue,
            self.config.workers,
            self.config.max_retries,
            shutdown,
        )
        .await;
        info!(kind = %K::class_kind(), "Class controller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependent::{ClassReference, DependentKey, DependentKind, DependentObject};
    use crate::resync::NoopResync;
    use crate::testing::{azure_class, synced_index, FakeStore, RecordingEvents};
    use classguard_common::crd::AzureMachineClass;
    use classguard_common::DELETE_FINALIZER_NAME;

    fn controller(
        store: Arc<FakeStore<AzureMachineClass>>,
        index: Arc<crate::index::DependencyIndex>,
    ) -> ClassController<AzureMachineClass> {
        let ctx = Context::for_testing(
            store,
            index,
            Arc::new(NoopResync),
            Arc::new(RecordingEvents::default()),
        );
        ClassController::new(ctx, ControllerConfig::default())
    }

    #[tokio::test]
    async fn dispatched_class_is_reconciled_by_workers() {
        let store = FakeStore::with(azure_class("ns", "small"));
        let controller = controller(store.clone(), Arc::new(synced_index()));

        let dispatcher = controller.dispatcher();
        assert_eq!(dispatcher.class_kind(), "AzureMachineClass");
        dispatcher.class_changed(&azure_class("ns", "small"));

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        controller.run(shutdown).await;

        assert_eq!(
            store.finalizers("ns", "small"),
            Some(vec![DELETE_FINALIZER_NAME.to_string()])
        );
    }

    #[tokio::test]
    async fn story_deletion_completes_when_dependent_goes_away() {
        let store = FakeStore::with(azure_class("ns", "small"));
        let index = Arc::new(synced_index());
        let machine = DependentObject {
            key: DependentKey {
                kind: DependentKind::Machine,
                namespace: "ns".to_string(),
                name: "m1".to_string(),
            },
            class: Some(ClassReference::new("ns", "AzureMachineClass", "small")),
        };
        index.apply(&machine);

        let controller = controller(store.clone(), index.clone());
        let dispatcher = controller.dispatcher();
        let shutdown = CancellationToken::new();
        let run = tokio::spawn(controller.run(shutdown.clone()));

        // Created: finalizer added
        dispatcher.class_changed(&azure_class("ns", "small"));
        wait_for(|| store.finalizers("ns", "small").is_some()).await;

        // Deletion requested while the machine exists: stays
        store.mark_deleting("ns", "small");
        dispatcher.class_changed(&azure_class("ns", "small"));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(store.contains("ns", "small"));

        // Machine deleted: class released and removed
        let previous = index.remove(&machine.key);
        dispatcher.dependent_changed(&machine, previous.as_ref());
        wait_for(|| !store.contains("ns", "small")).await;

        shutdown.cancel();
        run.await.unwrap();
    }

    async fn wait_for(cond: impl Fn() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }
}
