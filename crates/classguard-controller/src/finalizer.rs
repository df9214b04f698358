//! Adding and removing the deletion finalizer on a class
//!
//! Every attempt works on a freshly fetched copy and writes only the new
//! finalizer list, guarded by the copy's `resourceVersion`. Write conflicts are retried a bounded
//! number of times; any other error is returned immediately.

use std::sync::Arc;

use kube::Resource;
use tracing::debug;

use classguard_common::kube_utils::{with_finalizer, without_finalizer};
use classguard_common::metrics;
use classguard_common::retry::{retry_with_backoff_if, RetryConfig};
use classguard_common::{Error, Result, DELETE_FINALIZER_NAME};

use crate::class::MachineClass;
use crate::key::ObjectKey;
use crate::store::ClassStore;

/// Result of a finalizer update
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizerUpdate {
    /// The finalizer list was written
    Applied,
    /// Already in the desired state; nothing written
    Unchanged,
    /// The class no longer exists
    Gone,
}

#[derive(Clone, Copy, Debug)]
enum Op {
    Add,
    Remove,
}

impl Op {
    fn name(self) -> &'static str {
        match self {
            Op::Add => "add_finalizer",
            Op::Remove => "remove_finalizer",
        }
    }
}

/// Finalizer writes for one class kind
pub struct FinalizerManager<K: MachineClass> {
    store: Arc<dyn ClassStore<K>>,
    retry: RetryConfig,
    token: String,
}

impl<K: MachineClass> FinalizerManager<K> {
    /// Create a manager for the controller's own finalizer token
    pub fn new(store: Arc<dyn ClassStore<K>>, retry: RetryConfig) -> Self {
        Self {
            store,
            retry,
            token: DELETE_FINALIZER_NAME.to_string(),
        }
    }

    /// Ensure the finalizer is on the class
    pub async fn add(&self, key: &ObjectKey) -> Result<FinalizerUpdate> {
        self.update(key, Op::Add).await
    }

    /// Ensure the finalizer is off the class, keeping every other token in order
    pub async fn remove(&self, key: &ObjectKey) -> Result<FinalizerUpdate> {
        self.update(key, Op::Remove).await
    }

    async fn update(&self, key: &ObjectKey, op: Op) -> Result<FinalizerUpdate> {
        retry_with_backoff_if(&self.retry, op.name(), Error::is_conflict, || {
            self.attempt(key, op)
        })
        .await
    }

    async fn attempt(&self, key: &ObjectKey, op: Op) -> Result<FinalizerUpdate> {
        let Some(class) = self.store.get(&key.namespace, &key.name).await? else {
            return Ok(FinalizerUpdate::Gone);
        };

        // The API server refuses new finalizers once deletion has started
        if matches!(op, Op::Add) && class.is_deleting() {
            return Ok(FinalizerUpdate::Unchanged);
        }

        let current = class.meta().finalizers.as_deref();
        let target = match op {
            Op::Add => with_finalizer(current, &self.token),
            Op::Remove => without_finalizer(current, &self.token),
        };
        let Some(target) = target else {
            return Ok(FinalizerUpdate::Unchanged);
        };

        let written = self
            .store
            .set_finalizers(
                &key.namespace,
                &key.name,
                class.meta().resource_version.as_deref(),
                &target,
            )
            .await;
        match written {
            Ok(()) => Ok(FinalizerUpdate::Applied),
            Err(e) if e.is_not_found() => Ok(FinalizerUpdate::Gone),
            Err(e) => {
                if e.is_conflict() {
                    debug!(class = %key, operation = op.name(), "Finalizer update conflicted");
                    metrics::record_finalizer_conflict(&K::class_kind());
                }
                Err(e)
            }
        }
    }
}
