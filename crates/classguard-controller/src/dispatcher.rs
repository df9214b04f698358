//! Turns watch notifications into work queue keys

use std::sync::Arc;

use tracing::debug;

use crate::class::MachineClass;
use crate::dependent::{ClassReference, DependentObject};
use crate::key::ObjectKey;
use crate::queue::WorkQueue;

/// Enqueues class keys for one class kind
#[derive(Clone)]
pub struct EventDispatcher {
    class_kind: String,
    queue: Arc<WorkQueue<ObjectKey>>,
}

impl EventDispatcher {
    /// Create a dispatcher feeding `queue` for classes of `class_kind`
    pub fn new(class_kind: impl Into<String>, queue: Arc<WorkQueue<ObjectKey>>) -> Self {
        Self {
            class_kind: class_kind.into(),
            queue,
        }
    }

    /// Class kind this dispatcher serves
    pub fn class_kind(&self) -> &str {
        &self.class_kind
    }

    /// A class was created, updated or deleted
    pub fn class_changed<K: MachineClass>(&self, class: &K) {
        match ObjectKey::from_resource(class) {
            Some(key) => self.queue.add(key),
            None => debug!(kind = %self.class_kind, "Ignoring class notification without name or namespace"),
        }
    }

    /// A dependent was created, updated or deleted.
    ///
    /// Enqueues the class it references and, when the reference moved away,
    /// the class it referenced before. Only classes of this dispatcher's kind
    /// are enqueued.
    pub fn dependent_changed(&self, dependent: &DependentObject, previous: Option<&ClassReference>) {
        match &dependent.class {
            Some(class) => self.enqueue_reference(class),
            None => debug!(
                dependent = %dependent.key,
                "Ignoring dependent without a class reference"
            ),
        }
        if let Some(previous) = previous {
            self.enqueue_reference(previous);
        }
    }

    /// Enqueue a referenced class if it is of this dispatcher's kind
    pub fn enqueue_reference(&self, class: &ClassReference) {
        if class.kind == self.class_kind {
            self.queue.add(class.key());
        }
    }
}
