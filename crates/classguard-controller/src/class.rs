//! Machine class abstraction
//!
//! Every class kind the controller gates deletion for implements
//! [`MachineClass`]. The reconciler is generic over it, so adding a new
//! provider is a CRD plus one impl block.

use std::fmt::Debug;

use kube::core::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use classguard_common::crd::{AWSMachineClass, AzureMachineClass};
use classguard_common::kube_utils::has_finalizer;
use classguard_common::{Error, DELETE_FINALIZER_NAME};

/// A namespaced machine class whose deletion is gated on its dependents.
pub trait MachineClass:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Validate the class spec
    fn validate(&self) -> Result<(), Error>;

    /// Kubernetes kind of this class type
    fn class_kind() -> String {
        Self::kind(&()).into_owned()
    }

    /// Human-readable identity used in logs and errors: `Kind ns/name`
    fn describe(&self) -> String {
        format!(
            "{} {}/{}",
            Self::class_kind(),
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }

    /// True once deletion has been requested
    fn is_deleting(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    /// True when the controller's finalizer is on the class
    fn has_delete_finalizer(&self) -> bool {
        has_finalizer(self.meta().finalizers.as_deref(), DELETE_FINALIZER_NAME)
    }
}

impl MachineClass for AzureMachineClass {
    fn validate(&self) -> Result<(), Error> {
        self.spec.validate(&self.describe())
    }
}

impl MachineClass for AWSMachineClass {
    fn validate(&self) -> Result<(), Error> {
        self.spec.validate(&self.describe())
    }
}
