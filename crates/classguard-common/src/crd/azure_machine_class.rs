//! AzureMachineClass CRD
//!
//! An AzureMachineClass is the shared template Machines, MachineSets and
//! MachineDeployments reference to describe Azure virtual machines.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{FieldErrors, SecretReference};
use crate::Error;

/// AzureMachineClass describes how to create an Azure VM.
///
/// Example:
/// ```yaml
/// apiVersion: machine.sapcloud.io/v1alpha1
/// kind: AzureMachineClass
/// metadata:
///   name: small
///   namespace: shoot--dev
/// spec:
///   location: westeurope
///   resourceGroup: shoot--dev
///   subnetInfo:
///     vnetName: shoot--dev
///     subnetName: shoot--dev-nodes
///   properties:
///     hardwareProfile:
///       vmSize: Standard_D2s_v3
///     storageProfile:
///       imageReference:
///         urn: Canonical:UbuntuServer:18.04-LTS:latest
///       osDisk:
///         caching: None
///         diskSizeGB: 50
///         createOption: FromImage
///     osProfile:
///       adminUsername: core
///       linuxConfiguration:
///         disablePasswordAuthentication: true
///         ssh:
///           publicKeys:
///             path: /home/core/.ssh/authorized_keys
///             keyData: ssh-rsa AAAA...
///   secretRef:
///     name: cloudprovider
///     namespace: shoot--dev
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "machine.sapcloud.io",
    version = "v1alpha1",
    kind = "AzureMachineClass",
    namespaced,
    printcolumn = r#"{"name":"VM Size","type":"string","jsonPath":".spec.properties.hardwareProfile.vmSize"}"#,
    printcolumn = r#"{"name":"Location","type":"string","jsonPath":".spec.location"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AzureMachineClassSpec {
    /// Azure region
    #[serde(default)]
    pub location: String,

    /// Resource group the VMs are created in
    #[serde(default)]
    pub resource_group: String,

    /// Virtual network placement
    #[serde(default)]
    pub subnet_info: AzureSubnetInfo,

    /// VM properties
    #[serde(default)]
    pub properties: AzureVirtualMachineProperties,

    /// Tags attached to created resources
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    /// Secret with the Azure credentials
    #[serde(default)]
    pub secret_ref: SecretReference,
}

/// Virtual network and subnet the VM NICs attach to
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureSubnetInfo {
    /// Virtual network name
    #[serde(default)]
    pub vnet_name: String,
    /// Subnet name
    #[serde(default)]
    pub subnet_name: String,
}

/// VM profile settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureVirtualMachineProperties {
    /// VM size
    #[serde(default)]
    pub hardware_profile: AzureHardwareProfile,
    /// Image and OS disk
    #[serde(default)]
    pub storage_profile: AzureStorageProfile,
    /// Login configuration
    #[serde(default)]
    pub os_profile: AzureOsProfile,
}

/// VM hardware profile
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureHardwareProfile {
    /// VM size (e.g. Standard_D2s_v3)
    #[serde(default)]
    pub vm_size: String,
}

/// VM storage profile
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureStorageProfile {
    /// Marketplace image
    #[serde(default)]
    pub image_reference: AzureImageReference,
    /// OS disk
    #[serde(default)]
    pub os_disk: AzureOsDisk,
}

/// Marketplace image reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureImageReference {
    /// `publisher:offer:sku:version`
    #[serde(default)]
    pub urn: String,
}

/// OS disk settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureOsDisk {
    /// Caching mode (None, ReadOnly, ReadWrite)
    #[serde(default)]
    pub caching: String,
    /// Disk size in GB
    #[serde(default, rename = "diskSizeGB")]
    pub disk_size_gb: i32,
    /// Create option (e.g. FromImage)
    #[serde(default)]
    pub create_option: String,
}

/// OS login profile
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureOsProfile {
    /// Admin user name
    #[serde(default)]
    pub admin_username: String,
    /// Linux-specific configuration
    #[serde(default)]
    pub linux_configuration: AzureLinuxConfiguration,
}

/// Linux OS configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureLinuxConfiguration {
    /// Disable password login
    #[serde(default)]
    pub disable_password_authentication: bool,
    /// SSH configuration
    #[serde(default)]
    pub ssh: AzureSshConfiguration,
}

/// SSH configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureSshConfiguration {
    /// Authorized public key
    #[serde(default)]
    pub public_keys: AzureSshPublicKey,
}

/// Authorized SSH public key
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureSshPublicKey {
    /// Path of the authorized_keys file on the VM
    #[serde(default)]
    pub path: String,
    /// Public key material
    #[serde(default)]
    pub key_data: String,
}

impl AzureMachineClassSpec {
    /// Validate the spec, reporting every invalid field
    ///
    /// `class` identifies the object in the returned error.
    pub fn validate(&self, class: &str) -> Result<(), Error> {
        let mut errs = FieldErrors::new();

        errs.require("spec.location", &self.location);
        errs.require("spec.resourceGroup", &self.resource_group);
        errs.require("spec.subnetInfo.vnetName", &self.subnet_info.vnet_name);
        errs.require("spec.subnetInfo.subnetName", &self.subnet_info.subnet_name);

        let props = &self.properties;
        errs.require(
            "spec.properties.hardwareProfile.vmSize",
            &props.hardware_profile.vm_size,
        );

        let urn = &props.storage_profile.image_reference.urn;
        if urn.trim().is_empty() {
            errs.push(
                "spec.properties.storageProfile.imageReference.urn",
                "required value",
            );
        } else {
            let parts: Vec<&str> = urn.split(':').collect();
            if parts.len() != 4 || parts.iter().any(|p| p.trim().is_empty()) {
                errs.push(
                    "spec.properties.storageProfile.imageReference.urn",
                    "must have the form publisher:offer:sku:version",
                );
            }
        }

        let os_disk = &props.storage_profile.os_disk;
        if os_disk.disk_size_gb <= 0 {
            errs.push(
                "spec.properties.storageProfile.osDisk.diskSizeGB",
                "must be greater than 0",
            );
        }
        errs.require(
            "spec.properties.storageProfile.osDisk.createOption",
            &os_disk.create_option,
        );

        let os_profile = &props.os_profile;
        errs.require(
            "spec.properties.osProfile.adminUsername",
            &os_profile.admin_username,
        );
        let key = &os_profile.linux_configuration.ssh.public_keys;
        errs.require(
            "spec.properties.osProfile.linuxConfiguration.ssh.publicKeys.path",
            &key.path,
        );
        errs.require(
            "spec.properties.osProfile.linuxConfiguration.ssh.publicKeys.keyData",
            &key.key_data,
        );

        errs.require_secret_ref("spec.secretRef", &self.secret_ref);

        errs.into_result(class)
    }
}
