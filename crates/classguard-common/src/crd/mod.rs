//! Custom Resource Definitions for classguard
//!
//! Machine classes (the deletion-gated resources) and the Machine,
//! MachineSet and MachineDeployment objects that reference them.

mod aws_machine_class;
mod azure_machine_class;
mod machine;
mod types;

pub use aws_machine_class::{
    AWSIamProfile, AWSMachineClass, AWSMachineClassSpec, AWSNetworkInterface,
    AWS_CLUSTER_TAG_PREFIX, AWS_ROLE_TAG_PREFIX,
};
pub use azure_machine_class::{
    AzureHardwareProfile, AzureImageReference, AzureLinuxConfiguration, AzureMachineClass,
    AzureMachineClassSpec, AzureOsDisk, AzureOsProfile, AzureSshConfiguration,
    AzureSshPublicKey, AzureStorageProfile, AzureSubnetInfo, AzureVirtualMachineProperties,
};
pub use machine::{
    Machine, MachineDeployment, MachineDeploymentSpec, MachineSet, MachineSetSpec, MachineSpec,
    MachineTemplateMetadata, MachineTemplateSpec,
};
pub use types::{ClassSpec, FieldError, FieldErrors, SecretReference};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// All CRDs served by the machine API group, in installation order
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        AzureMachineClass::crd(),
        AWSMachineClass::crd(),
        Machine::crd(),
        MachineSet::crd(),
        MachineDeployment::crd(),
    ]
}
