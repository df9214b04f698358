//! Kubernetes Event recording for the class controllers.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors. A failed event must never break reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// * `resource_ref` - The class this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason (see [`reasons`])
    /// * `action` - What was attempted (see [`actions`])
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                object = ?resource_ref.name,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Event reasons, shown in the REASON column of `kubectl get events`.
pub mod reasons {
    /// Class spec failed validation; no finalizer was added
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// Deletion finalizer placed on the class
    pub const FINALIZER_ADDED: &str = "FinalizerAdded";
    /// Deletion finalizer removed; the API server may now delete the class
    pub const FINALIZER_REMOVED: &str = "FinalizerRemoved";
    /// Deletion requested but dependents still reference the class
    pub const DELETION_BLOCKED: &str = "DeletionBlocked";
}

/// Event actions, shown in the ACTION column of `kubectl get events`.
pub mod actions {
    /// Validating the class spec
    pub const VALIDATE: &str = "Validate";
    /// Adding or removing the finalizer
    pub const FINALIZE: &str = "Finalize";
    /// Evaluating a deletion request
    pub const DELETE: &str = "Delete";
}
