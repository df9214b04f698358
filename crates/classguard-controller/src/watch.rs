//! Watch loops feeding the dependency index and the dispatchers
//!
//! Each class kind and each dependent kind gets one watch loop. Dependent
//! loops are the only writers of the [`DependencyIndex`].

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::{watcher, WatchStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::class::MachineClass;
use crate::dependent::{DependentKey, DependentObject, DependentResource};
use crate::dispatcher::EventDispatcher;
use crate::index::DependencyIndex;

/// Apply one class watch event
pub fn ingest_class_event<K: MachineClass>(event: watcher::Event<K>, dispatcher: &EventDispatcher) {
    match event {
        watcher::Event::Apply(class)
        | watcher::Event::InitApply(class)
        | watcher::Event::Delete(class) => dispatcher.class_changed(&class),
        watcher::Event::Init | watcher::Event::InitDone => {}
    }
}

/// Apply one dependent watch event to the index and fan it out
pub fn ingest_dependent_event<D: DependentResource>(
    event: watcher::Event<D>,
    index: &DependencyIndex,
    dispatchers: &[EventDispatcher],
) {
    match event {
        watcher::Event::Init => {
            debug!(kind = %D::KIND, "Dependent relist started");
            index.begin_relist(D::KIND);
        }
        watcher::Event::InitApply(obj) | watcher::Event::Apply(obj) => {
            let Some(dependent) = DependentObject::from_resource(&obj) else {
                debug!(kind = %D::KIND, "Ignoring dependent without name or namespace");
                return;
            };
            let previous = index.apply(&dependent);
            for dispatcher in dispatchers {
                dispatcher.dependent_changed(&dependent, previous.as_ref());
            }
        }
        watcher::Event::Delete(obj) => {
            let Some(dependent) = DependentObject::from_resource(&obj) else {
                debug!(kind = %D::KIND, "Ignoring dependent without name or namespace");
                return;
            };
            let previous = index.remove(&dependent.key);
            for dispatcher in dispatchers {
                dispatcher.dependent_changed(&dependent, previous.as_ref());
            }
        }
        watcher::Event::InitDone => {
            let pruned = index.finish_relist(D::KIND);
            info!(kind = %D::KIND, pruned = pruned.len(), "Dependent cache synced");
            for class in &pruned {
                for dispatcher in dispatchers {
                    dispatcher.enqueue_reference(class);
                }
            }
        }
    }
}

/// Watch one class kind until `shutdown` fires
pub async fn watch_classes<K: MachineClass>(
    api: Api<K>,
    config: watcher::Config,
    dispatcher: EventDispatcher,
    shutdown: CancellationToken,
) {
    info!(kind = %K::class_kind(), "Starting class watch");
    let stream = watcher(api, config).default_backoff();
    tokio::pin!(stream);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = stream.next() => match event {
                Some(Ok(event)) => ingest_class_event(event, &dispatcher),
                Some(Err(e)) => warn!(kind = %K::class_kind(), error = %e, "Class watch error"),
                None => break,
            },
        }
    }
    debug!(kind = %K::class_kind(), "Class watch stopped");
}

/// Watch one dependent kind until `shutdown` fires
pub async fn watch_dependents<D: DependentResource>(
    api: Api<D>,
    config: watcher::Config,
    index: std::sync::Arc<DependencyIndex>,
    dispatchers: Vec<EventDispatcher>,
    shutdown: CancellationToken,
) {
    info!(kind = %D::KIND, "Starting dependent watch");
    let stream = watcher(api, config).default_backoff();
    tokio::pin!(stream);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = stream.next() => match event {
                Some(Ok(event)) => ingest_dependent_event(event, &index, &dispatchers),
                Some(Err(e)) => warn!(kind = %D::KIND, error = %e, "Dependent watch error"),
                None => break,
            },
        }
    }
    debug!(kind = %D::KIND, "Dependent watch stopped");
}

/// Log re-sync requests handed off by the reconcilers until the senders close
/// or `shutdown` fires.
///
/// Requests end here: nothing in this process acts on a dependent, so a
/// re-sync only becomes visible in the debug log. A machine controller that
/// wants them should take the receiver from [`ChannelResync::channel`]
/// instead of running this drain.
///
/// [`ChannelResync::channel`]: crate::resync::ChannelResync::channel
pub async fn drain_resync_requests(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<DependentKey>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            request = rx.recv() => match request {
                Some(dependent) => debug!(dependent = %dependent, "Dependent re-sync requested"),
                None => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependent::DependentKind;
    use crate::key::ObjectKey;
    use crate::testing::{azure_class, machine, test_queue};
    use classguard_common::crd::Machine;

    fn setup() -> (
        DependencyIndex,
        std::sync::Arc<crate::queue::WorkQueue<ObjectKey>>,
        Vec<EventDispatcher>,
    ) {
        let queue = test_queue();
        let dispatchers = vec![EventDispatcher::new("AzureMachineClass", queue.clone())];
        (DependencyIndex::new(), queue, dispatchers)
    }

    async fn drain(queue: &crate::queue::WorkQueue<ObjectKey>) -> Vec<String> {
        let mut keys = Vec::new();
        while !queue.is_empty() {
            let key = queue.get().await.unwrap();
            queue.done(&key);
            keys.push(key.name);
        }
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn class_events_enqueue_the_class() {
        let (_, queue, dispatchers) = setup();
        ingest_class_event(watcher::Event::Apply(azure_class("ns", "a")), &dispatchers[0]);
        ingest_class_event(watcher::Event::Delete(azure_class("ns", "b")), &dispatchers[0]);
        ingest_class_event::<classguard_common::crd::AzureMachineClass>(
            watcher::Event::InitDone,
            &dispatchers[0],
        );
        assert_eq!(drain(&queue).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn dependent_apply_indexes_and_enqueues() {
        let (index, queue, dispatchers) = setup();
        ingest_dependent_event(
            watcher::Event::Apply(machine("ns", "m1", "AzureMachineClass", "small")),
            &index,
            &dispatchers,
        );
        assert_eq!(index.len(), 1);
        assert_eq!(drain(&queue).await, vec!["small"]);
    }

    #[tokio::test]
    async fn moved_dependent_requeues_old_class() {
        let (index, queue, dispatchers) = setup();
        for class in ["old", "new"] {
            ingest_dependent_event(
                watcher::Event::Apply(machine("ns", "m1", "AzureMachineClass", class)),
                &index,
                &dispatchers,
            );
        }
        assert_eq!(drain(&queue).await, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn dependent_delete_releases_class() {
        let (index, queue, dispatchers) = setup();
        let m1 = machine("ns", "m1", "AzureMachineClass", "small");
        ingest_dependent_event(watcher::Event::Apply(m1.clone()), &index, &dispatchers);
        drain(&queue).await;

        ingest_dependent_event(watcher::Event::Delete(m1), &index, &dispatchers);
        assert!(index.is_empty());
        assert_eq!(drain(&queue).await, vec!["small"]);
    }

    #[tokio::test]
    async fn relist_prunes_and_requeues_vanished_dependents() {
        let (index, queue, dispatchers) = setup();
        ingest_dependent_event(
            watcher::Event::Apply(machine("ns", "gone", "AzureMachineClass", "small")),
            &index,
            &dispatchers,
        );
        drain(&queue).await;

        ingest_dependent_event::<Machine>(watcher::Event::Init, &index, &dispatchers);
        ingest_dependent_event::<Machine>(watcher::Event::InitDone, &index, &dispatchers);

        assert!(index.is_empty());
        assert_eq!(drain(&queue).await, vec!["small"]);
    }

    #[tokio::test]
    async fn initial_list_marks_kind_synced() {
        let (index, _, dispatchers) = setup();
        ingest_dependent_event::<Machine>(watcher::Event::Init, &index, &dispatchers);
        ingest_dependent_event(
            watcher::Event::InitApply(machine("ns", "m1", "AzureMachineClass", "small")),
            &index,
            &dispatchers,
        );
        ingest_dependent_event::<Machine>(watcher::Event::InitDone, &index, &dispatchers);

        index.mark_synced(DependentKind::MachineSet);
        index.mark_synced(DependentKind::MachineDeployment);
        let found = index
            .find_dependents("ns", "AzureMachineClass", "small")
            .unwrap();
        assert_eq!(found.machines.len(), 1);
    }

    #[tokio::test]
    async fn resync_drain_consumes_until_senders_close() {
        use crate::resync::{ChannelResync, DependentResync};

        let (resync, rx) = ChannelResync::channel();
        resync.resync(&DependentKey {
            kind: DependentKind::Machine,
            namespace: "ns".to_string(),
            name: "m1".to_string(),
        });
        drop(resync);

        // Returns once the queued request is logged and the channel closes
        drain_resync_requests(rx, CancellationToken::new()).await;
    }

    #[tokio::test]
    async fn resync_drain_stops_on_shutdown() {
        let (_resync, rx) = crate::resync::ChannelResync::channel();
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        drain_resync_requests(rx, shutdown).await;
    }
}
