//! Machine class reconciliation
//!
//! Level-triggered: every invocation re-derives the finalizer state of one
//! class from the freshly fetched object and the dependency index.
//!
//! 1. Class gone: nothing to do.
//! 2. Spec invalid: warn and leave the object alone (no finalizer).
//! 3. Live class: make sure the finalizer is on it.
//! 4. Look up the dependents.
//! 5. Deleting class: remove the finalizer only when nothing references it.
//! 6. Live class: hand every dependent to the re-sync consumer.

use std::fmt;
use std::sync::Arc;

use dashmap::DashSet;
use kube::runtime::events::EventType;
use kube::{Client, Resource};
use tracing::{debug, info, instrument, warn};

use classguard_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use classguard_common::retry::RetryConfig;
use classguard_common::{Error, CONTROLLER_NAME};

use crate::class::MachineClass;
use crate::finalizer::{FinalizerManager, FinalizerUpdate};
use crate::index::DependencyIndex;
use crate::key::ObjectKey;
use crate::resync::{DependentResync, NoopResync};
use crate::store::{ClassStore, KubeClassStore};

/// What a successful reconcile found or did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The class no longer exists
    Deleted,
    /// The spec failed validation; the object was left untouched
    Invalid,
    /// The class is live, carries the finalizer, and its dependents were
    /// handed off for re-sync
    Ready {
        /// Number of dependents handed off
        resynced: usize,
    },
    /// Deletion requested but dependents still reference the class
    DeletionBlocked {
        /// Number of referencing dependents
        dependents: usize,
    },
    /// Deletion requested, no dependents: the finalizer was removed
    FinalizerRemoved,
    /// Deletion requested and the finalizer is not ours to remove
    NotOwned,
}

impl ReconcileOutcome {
    /// Metric label for the outcome
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deleted => "deleted",
            Self::Invalid => "invalid",
            Self::Ready { .. } => "ready",
            Self::DeletionBlocked { .. } => "deletion_blocked",
            Self::FinalizerRemoved => "finalizer_removed",
            Self::NotOwned => "not_owned",
        }
    }
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared state for reconciling one class kind
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::<AzureMachineClass>::builder(client, index)
///     .resync(Arc::new(resync))
///     .build();
/// ```
pub struct Context<K: MachineClass> {
    /// Class reads and writes
    pub store: Arc<dyn ClassStore<K>>,
    /// Reverse index of dependents, shared by every class kind
    pub index: Arc<DependencyIndex>,
    /// Finalizer writes
    pub finalizers: FinalizerManager<K>,
    /// Dependent re-sync hand-off
    pub resync: Arc<dyn DependentResync>,
    /// Kubernetes Events on classes
    pub events: Arc<dyn EventPublisher>,
    /// Deleting classes already reported as blocked
    blocked: DashSet<ObjectKey>,
}

impl<K: MachineClass> Context<K> {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, index: Arc<DependencyIndex>) -> ContextBuilder<K> {
        ContextBuilder::new(client, index)
    }

    /// Create a context for testing with in-memory collaborators
    #[cfg(test)]
    pub fn for_testing(
        store: Arc<dyn ClassStore<K>>,
        index: Arc<DependencyIndex>,
        resync: Arc<dyn DependentResync>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            finalizers: FinalizerManager::new(store.clone(), crate::testing::fast_retry(3)),
            store,
            index,
            resync,
            events,
            blocked: DashSet::new(),
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder<K: MachineClass> {
    client: Client,
    index: Arc<DependencyIndex>,
    store: Option<Arc<dyn ClassStore<K>>>,
    resync: Option<Arc<dyn DependentResync>>,
    events: Option<Arc<dyn EventPublisher>>,
    finalizer_retry: RetryConfig,
}

impl<K: MachineClass> ContextBuilder<K> {
    fn new(client: Client, index: Arc<DependencyIndex>) -> Self {
        Self {
            client,
            index,
            store: None,
            resync: None,
            events: None,
            finalizer_retry: RetryConfig::default(),
        }
    }

    /// Override the class store
    pub fn store(mut self, store: Arc<dyn ClassStore<K>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the dependent re-sync sink (defaults to dropping requests)
    pub fn resync(mut self, resync: Arc<dyn DependentResync>) -> Self {
        self.resync = Some(resync);
        self
    }

    /// Override the event publisher
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Retry policy for conflicting finalizer writes
    pub fn finalizer_retry(mut self, retry: RetryConfig) -> Self {
        self.finalizer_retry = retry;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context<K> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(KubeClassStore::<K>::new(self.client.clone())));
        Context {
            finalizers: FinalizerManager::new(store.clone(), self.finalizer_retry),
            store,
            index: self.index,
            resync: self.resync.unwrap_or_else(|| Arc::new(NoopResync)),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(self.client, CONTROLLER_NAME))),
            blocked: DashSet::new(),
        }
    }
}

/// Reconcile the class identified by `key`
///
/// Errors are returned only for failed reads, failed writes and an unsynced
/// dependency index; the caller requeues them with backoff.
#[instrument(skip(key, ctx), fields(kind = %K::class_kind(), class = %key))]
pub async fn reconcile<K: MachineClass>(
    key: &ObjectKey,
    ctx: &Context<K>,
) -> Result<ReconcileOutcome, Error> {
    let Some(class) = ctx.store.get(&key.namespace, &key.name).await? else {
        ctx.blocked.remove(key);
        debug!("Class no longer exists");
        return Ok(ReconcileOutcome::Deleted);
    };

    if let Err(e) = class.validate() {
        warn!(error = %e, "Class failed validation; leaving it untouched");
        publish(
            ctx,
            &class,
            EventType::Warning,
            reasons::VALIDATION_FAILED,
            actions::VALIDATE,
            Some(e.to_string()),
        )
        .await;
        return Ok(ReconcileOutcome::Invalid);
    }

    let deleting = class.is_deleting();
    if !deleting && !class.has_delete_finalizer() {
        match ctx.finalizers.add(key).await? {
            FinalizerUpdate::Applied => {
                info!("Added deletion finalizer");
                publish(
                    ctx,
                    &class,
                    EventType::Normal,
                    reasons::FINALIZER_ADDED,
                    actions::FINALIZE,
                    None,
                )
                .await;
            }
            FinalizerUpdate::Gone => return Ok(ReconcileOutcome::Deleted),
            FinalizerUpdate::Unchanged => {}
        }
    }

    let dependents = ctx
        .index
        .find_dependents(&key.namespace, &K::class_kind(), &key.name)?;

    if deleting {
        if !class.has_delete_finalizer() {
            ctx.blocked.remove(key);
            debug!("Deletion requested and finalizer already absent");
            return Ok(ReconcileOutcome::NotOwned);
        }

        if !dependents.is_empty() {
            debug!(
                machines = dependents.machines.len(),
                machine_sets = dependents.machine_sets.len(),
                machine_deployments = dependents.machine_deployments.len(),
                "Deletion blocked by dependents"
            );
            // Reported once per blocked period, not on every requeue
            if ctx.blocked.insert(key.clone()) {
                let note = format!(
                    "{} dependents still reference this class",
                    dependents.total()
                );
                publish(
                    ctx,
                    &class,
                    EventType::Normal,
                    reasons::DELETION_BLOCKED,
                    actions::DELETE,
                    Some(note),
                )
                .await;
            }
            return Ok(ReconcileOutcome::DeletionBlocked {
                dependents: dependents.total(),
            });
        }

        ctx.blocked.remove(key);
        return match ctx.finalizers.remove(key).await? {
            FinalizerUpdate::Applied => {
                info!("Removed deletion finalizer");
                publish(
                    ctx,
                    &class,
                    EventType::Normal,
                    reasons::FINALIZER_REMOVED,
                    actions::FINALIZE,
                    None,
                )
                .await;
                Ok(ReconcileOutcome::FinalizerRemoved)
            }
            FinalizerUpdate::Gone => Ok(ReconcileOutcome::Deleted),
            FinalizerUpdate::Unchanged => Ok(ReconcileOutcome::NotOwned),
        };
    }

    for dependent in dependents.iter() {
        ctx.resync.resync(dependent);
    }
    Ok(ReconcileOutcome::Ready {
        resynced: dependents.total(),
    })
}

async fn publish<K: MachineClass>(
    ctx: &Context<K>,
    class: &K,
    type_: EventType,
    reason: &str,
    action: &str,
    note: Option<String>,
) {
    ctx.events
        .publish(&class.object_ref(&()), type_, reason, action, note)
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependent::{ClassReference, DependentKey, DependentKind, DependentObject};
    use crate::resync::MockDependentResync;
    use crate::testing::{azure_class, deleting, synced_index, with_finalizer, FakeStore, RecordingEvents};
    use classguard_common::crd::AzureMachineClass;
    use classguard_common::DELETE_FINALIZER_NAME;

    struct Harness {
        store: Arc<FakeStore<AzureMachineClass>>,
        index: Arc<DependencyIndex>,
        events: Arc<RecordingEvents>,
        ctx: Context<AzureMachineClass>,
    }

    fn harness_with(class: Option<AzureMachineClass>, resync: MockDependentResync) -> Harness {
        let store = match class {
            Some(c) => FakeStore::with(c),
            None => FakeStore::empty(),
        };
        let index = Arc::new(synced_index());
        let events = Arc::new(RecordingEvents::default());
        let ctx = Context::for_testing(store.clone(), index.clone(), Arc::new(resync), events.clone());
        Harness {
            store,
            index,
            events,
            ctx,
        }
    }

    fn harness(class: Option<AzureMachineClass>) -> Harness {
        let mut resync = MockDependentResync::new();
        resync.expect_resync().return_const(());
        harness_with(class, resync)
    }

    fn key() -> ObjectKey {
        ObjectKey::new("ns", "small")
    }

    fn machine_ref(index: &DependencyIndex, name: &str) -> DependentKey {
        let obj = DependentObject {
            key: DependentKey {
                kind: DependentKind::Machine,
                namespace: "ns".to_string(),
                name: name.to_string(),
            },
            class: Some(ClassReference::new("ns", "AzureMachineClass", "small")),
        };
        index.apply(&obj);
        obj.key
    }

    // =========================================================================
    // Missing and invalid classes
    // =========================================================================

    #[tokio::test]
    async fn missing_class_is_success_without_writes() {
        let h = harness(None);
        assert_eq!(reconcile(&key(), &h.ctx).await.unwrap(), ReconcileOutcome::Deleted);
        assert_eq!(h.store.update_count(), 0);
    }

    #[tokio::test]
    async fn invalid_class_gets_no_finalizer() {
        let mut class = azure_class("ns", "small");
        class.spec.resource_group.clear();
        let h = harness(Some(class));

        assert_eq!(reconcile(&key(), &h.ctx).await.unwrap(), ReconcileOutcome::Invalid);
        assert_eq!(h.store.update_count(), 0);
        assert_eq!(h.store.finalizers("ns", "small"), None);
        assert_eq!(h.events.reasons(), vec![reasons::VALIDATION_FAILED]);
    }

    // =========================================================================
    // Live classes
    // =========================================================================

    #[tokio::test]
    async fn new_class_gets_finalizer_once() {
        let h = harness(Some(azure_class("ns", "small")));

        assert_eq!(
            reconcile(&key(), &h.ctx).await.unwrap(),
            ReconcileOutcome::Ready { resynced: 0 }
        );
        reconcile(&key(), &h.ctx).await.unwrap();

        assert_eq!(h.store.update_count(), 1);
        assert_eq!(
            h.store.finalizers("ns", "small"),
            Some(vec![DELETE_FINALIZER_NAME.to_string()])
        );
        assert_eq!(h.events.reasons(), vec![reasons::FINALIZER_ADDED]);
    }

    #[tokio::test]
    async fn live_class_resyncs_every_dependent() {
        let mut resync = MockDependentResync::new();
        resync
            .expect_resync()
            .withf(|d| d.kind == DependentKind::Machine && d.namespace == "ns")
            .times(2)
            .return_const(());
        let h = harness_with(Some(with_finalizer(azure_class("ns", "small"))), resync);
        machine_ref(&h.index, "m1");
        machine_ref(&h.index, "m2");

        assert_eq!(
            reconcile(&key(), &h.ctx).await.unwrap(),
            ReconcileOutcome::Ready { resynced: 2 }
        );
    }

    #[tokio::test]
    async fn unsynced_index_is_a_retryable_error() {
        let h = harness(Some(with_finalizer(azure_class("ns", "small"))));
        let ctx = Context::for_testing(
            h.store.clone(),
            Arc::new(DependencyIndex::new()),
            Arc::new(crate::resync::NoopResync),
            h.events.clone(),
        );

        let err = reconcile(&key(), &ctx).await.unwrap_err();
        assert!(matches!(err, Error::CacheNotSynced { .. }));
        assert!(err.is_retryable());
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    #[tokio::test]
    async fn deletion_without_dependents_removes_finalizer_exactly_once() {
        let h = harness(Some(deleting(
            azure_class("ns", "small"),
            &["other", DELETE_FINALIZER_NAME],
        )));

        assert_eq!(
            reconcile(&key(), &h.ctx).await.unwrap(),
            ReconcileOutcome::FinalizerRemoved
        );
        assert_eq!(h.store.finalizers("ns", "small"), Some(vec!["other".to_string()]));

        assert_eq!(reconcile(&key(), &h.ctx).await.unwrap(), ReconcileOutcome::NotOwned);
        assert_eq!(h.store.update_count(), 1);
        assert_eq!(h.events.reasons(), vec![reasons::FINALIZER_REMOVED]);
    }

    #[tokio::test]
    async fn removing_last_finalizer_deletes_class() {
        let h = harness(Some(deleting(azure_class("ns", "small"), &[DELETE_FINALIZER_NAME])));

        assert_eq!(
            reconcile(&key(), &h.ctx).await.unwrap(),
            ReconcileOutcome::FinalizerRemoved
        );
        assert!(!h.store.contains("ns", "small"));
        assert_eq!(reconcile(&key(), &h.ctx).await.unwrap(), ReconcileOutcome::Deleted);
    }

    #[tokio::test]
    async fn deletion_with_dependents_keeps_finalizer() {
        let h = harness(Some(deleting(azure_class("ns", "small"), &[DELETE_FINALIZER_NAME])));
        machine_ref(&h.index, "m1");

        for _ in 0..3 {
            assert_eq!(
                reconcile(&key(), &h.ctx).await.unwrap(),
                ReconcileOutcome::DeletionBlocked { dependents: 1 }
            );
        }
        assert_eq!(h.store.update_count(), 0);
        assert_eq!(
            h.store.finalizers("ns", "small"),
            Some(vec![DELETE_FINALIZER_NAME.to_string()])
        );
    }

    #[tokio::test]
    async fn blocked_deletion_is_evented_once_per_blocked_period() {
        let h = harness(Some(deleting(azure_class("ns", "small"), &[DELETE_FINALIZER_NAME])));
        let m1 = machine_ref(&h.index, "m1");

        for _ in 0..3 {
            reconcile(&key(), &h.ctx).await.unwrap();
        }
        assert_eq!(h.events.reasons(), vec![reasons::DELETION_BLOCKED]);

        h.index.remove(&m1);
        assert_eq!(
            reconcile(&key(), &h.ctx).await.unwrap(),
            ReconcileOutcome::FinalizerRemoved
        );
        assert_eq!(
            h.events.reasons(),
            vec![reasons::DELETION_BLOCKED, reasons::FINALIZER_REMOVED]
        );
        assert!(h.ctx.blocked.is_empty());
    }

    #[tokio::test]
    async fn deleting_class_without_our_finalizer_is_left_alone() {
        let h = harness(Some(deleting(azure_class("ns", "small"), &["someone-else"])));

        assert_eq!(reconcile(&key(), &h.ctx).await.unwrap(), ReconcileOutcome::NotOwned);
        assert_eq!(h.store.update_count(), 0);
        assert_eq!(
            h.store.finalizers("ns", "small"),
            Some(vec!["someone-else".to_string()])
        );
    }

    #[tokio::test]
    async fn failed_finalizer_write_is_never_success() {
        let h = harness(Some(deleting(azure_class("ns", "small"), &[DELETE_FINALIZER_NAME])));
        h.store.inject_failure(Error::internal("etcd timeout"));

        assert!(reconcile(&key(), &h.ctx).await.is_err());
        assert!(h.events.reasons().is_empty());
    }

    // =========================================================================
    // Scenario: create, block, release
    // =========================================================================

    #[tokio::test]
    async fn story_class_deleted_after_last_machine_goes_away() {
        let h = harness(Some(azure_class("ns", "small")));
        let m1 = machine_ref(&h.index, "m1");

        // Created: finalizer added once, machine re-synced
        assert_eq!(
            reconcile(&key(), &h.ctx).await.unwrap(),
            ReconcileOutcome::Ready { resynced: 1 }
        );

        // Deletion requested while M still references C
        h.store.mark_deleting("ns", "small");
        assert_eq!(
            reconcile(&key(), &h.ctx).await.unwrap(),
            ReconcileOutcome::DeletionBlocked { dependents: 1 }
        );
        assert!(h.store.contains("ns", "small"));

        // M deleted: the index releases C and the next reconcile frees it
        let released = h.index.remove(&m1).unwrap();
        assert_eq!(released.key(), key());
        assert_eq!(
            reconcile(&key(), &h.ctx).await.unwrap(),
            ReconcileOutcome::FinalizerRemoved
        );
        assert!(!h.store.contains("ns", "small"));
    }
}
