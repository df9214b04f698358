//! Reverse index from machine classes to the objects referencing them
//!
//! Written only by the dependent watch loops, read concurrently by the
//! reconcile workers. Lookups are answered only once every dependent kind
//! has completed its initial list; before that an empty answer could let a
//! referenced class be deleted.

use std::collections::{BTreeSet, HashSet};

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::debug;

use classguard_common::{Error, Result};

use crate::dependent::{ClassReference, DependentKey, DependentKind, DependentObject, Dependents};

/// Class identity to dependents, plus the inverse for updates and deletes
#[derive(Default)]
pub struct DependencyIndex {
    by_class: DashMap<ClassReference, BTreeSet<DependentKey>>,
    refs: DashMap<DependentKey, ClassReference>,
    /// Keys seen since `begin_relist`, per kind being relisted
    relisting: DashMap<DependentKind, HashSet<DependentKey>>,
    synced: DashMap<DependentKind, bool>,
    synced_notify: Notify,
}

impl DependencyIndex {
    /// Create an empty, unsynced index
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current state of a dependent.
    ///
    /// Returns the class it referenced before when that reference changed
    /// (or was dropped), so the caller can requeue the released class.
    pub fn apply(&self, obj: &DependentObject) -> Option<ClassReference> {
        if let Some(mut seen) = self.relisting.get_mut(&obj.key.kind) {
            seen.insert(obj.key.clone());
        }

        let Some(class) = &obj.class else {
            return self.remove(&obj.key);
        };

        let previous = self.refs.insert(obj.key.clone(), class.clone());
        if previous.as_ref() == Some(class) {
            return None;
        }
        if let Some(prev) = &previous {
            self.unlink(prev, &obj.key);
        }
        self.by_class
            .entry(class.clone())
            .or_default()
            .insert(obj.key.clone());
        previous
    }

    /// Forget a dependent, returning the class it referenced
    pub fn remove(&self, key: &DependentKey) -> Option<ClassReference> {
        let (_, previous) = self.refs.remove(key)?;
        self.unlink(&previous, key);
        Some(previous)
    }

    fn unlink(&self, class: &ClassReference, key: &DependentKey) {
        if let Some(mut set) = self.by_class.get_mut(class) {
            set.remove(key);
        }
        self.by_class.remove_if(class, |_, set| set.is_empty());
    }

    /// Start a full relist of `kind`
    pub fn begin_relist(&self, kind: DependentKind) {
        self.relisting.insert(kind, HashSet::new());
    }

    /// Finish a relist of `kind`: drop every dependent of that kind not seen
    /// since [`begin_relist`](Self::begin_relist) and mark the kind synced.
    ///
    /// Returns the classes the pruned dependents referenced.
    pub fn finish_relist(&self, kind: DependentKind) -> Vec<ClassReference> {
        let seen = self
            .relisting
            .remove(&kind)
            .map(|(_, seen)| seen)
            .unwrap_or_default();

        let stale: Vec<DependentKey> = self
            .refs
            .iter()
            .filter(|entry| entry.key().kind == kind && !seen.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        let pruned: Vec<ClassReference> = stale.iter().filter_map(|key| self.remove(key)).collect();
        if !pruned.is_empty() {
            debug!(kind = %kind, pruned = pruned.len(), "Pruned vanished dependents after relist");
        }

        self.mark_synced(kind);
        pruned
    }

    /// Mark `kind` as having completed its initial list
    pub fn mark_synced(&self, kind: DependentKind) {
        self.synced.insert(kind, true);
        if self.is_synced() {
            self.synced_notify.notify_waiters();
        }
    }

    /// Wait until every dependent kind has completed its initial list
    pub async fn wait_synced(&self) {
        loop {
            let notified = self.synced_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_synced() {
                return;
            }
            notified.await;
        }
    }

    /// True once every dependent kind has completed its initial list
    pub fn is_synced(&self) -> bool {
        self.first_unsynced().is_none()
    }

    fn first_unsynced(&self) -> Option<DependentKind> {
        DependentKind::ALL
            .into_iter()
            .find(|kind| !self.synced.get(kind).is_some_and(|s| *s))
    }

    /// Dependents referencing the class `(namespace, class_kind, class_name)`
    pub fn find_dependents(
        &self,
        namespace: &str,
        class_kind: &str,
        class_name: &str,
    ) -> Result<Dependents> {
        if let Some(kind) = self.first_unsynced() {
            return Err(Error::cache_not_synced(kind.as_str()));
        }

        let class = ClassReference::new(namespace, class_kind, class_name);
        let mut dependents = Dependents::default();
        if let Some(set) = self.by_class.get(&class) {
            for key in set.iter() {
                dependents.push(key.clone());
            }
        }
        Ok(dependents)
    }

    /// Number of indexed dependents
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// True when no dependent is indexed
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}
