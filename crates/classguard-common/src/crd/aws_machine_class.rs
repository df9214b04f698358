//! AWSMachineClass CRD

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{FieldErrors, SecretReference};
use crate::Error;

/// Tag key prefix identifying the owning cluster
pub const AWS_CLUSTER_TAG_PREFIX: &str = "kubernetes.io/cluster/";

/// Tag key prefix identifying the node role
pub const AWS_ROLE_TAG_PREFIX: &str = "kubernetes.io/role/";

/// AWSMachineClass describes how to create an EC2 instance.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "machine.sapcloud.io",
    version = "v1alpha1",
    kind = "AWSMachineClass",
    namespaced,
    printcolumn = r#"{"name":"Machine Type","type":"string","jsonPath":".spec.machineType"}"#,
    printcolumn = r#"{"name":"Region","type":"string","jsonPath":".spec.region"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AWSMachineClassSpec {
    /// AMI id
    #[serde(default)]
    pub ami: String,

    /// AWS region
    #[serde(default)]
    pub region: String,

    /// Instance type (e.g. m5.large)
    #[serde(default)]
    pub machine_type: String,

    /// Instance profile
    #[serde(default)]
    pub iam: AWSIamProfile,

    /// EC2 key pair name
    #[serde(default)]
    pub key_name: String,

    /// Network interfaces attached to the instance
    #[serde(default)]
    pub network_interfaces: Vec<AWSNetworkInterface>,

    /// Tags attached to created resources
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Secret with the AWS credentials
    #[serde(default)]
    pub secret_ref: SecretReference,
}

/// IAM instance profile
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AWSIamProfile {
    /// Instance profile name
    #[serde(default)]
    pub name: String,
}

/// Network interface of an instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct AWSNetworkInterface {
    /// Subnet id
    #[serde(default, rename = "subnetID")]
    pub subnet_id: String,
    /// Security group ids
    #[serde(default, rename = "securityGroupIDs")]
    pub security_group_ids: Vec<String>,
}

impl AWSMachineClassSpec {
    /// Validate the spec, reporting every invalid field
    pub fn validate(&self, class: &str) -> Result<(), Error> {
        let mut errs = FieldErrors::new();

        errs.require("spec.ami", &self.ami);
        errs.require("spec.region", &self.region);
        errs.require("spec.machineType", &self.machine_type);
        errs.require("spec.iam.name", &self.iam.name);
        errs.require("spec.keyName", &self.key_name);

        if self.network_interfaces.is_empty() {
            errs.push("spec.networkInterfaces", "at least one network interface is required");
        }
        for (i, nic) in self.network_interfaces.iter().enumerate() {
            errs.require(&format!("spec.networkInterfaces[{i}].subnetID"), &nic.subnet_id);
            if nic.security_group_ids.is_empty() {
                errs.push(
                    format!("spec.networkInterfaces[{i}].securityGroupIDs"),
                    "at least one security group is required",
                );
            }
        }

        let has_tag = |prefix: &str| self.tags.keys().any(|k| k.starts_with(prefix));
        if !has_tag(AWS_CLUSTER_TAG_PREFIX) {
            errs.push(
                "spec.tags",
                format!("a tag with prefix {AWS_CLUSTER_TAG_PREFIX} is required"),
            );
        }
        if !has_tag(AWS_ROLE_TAG_PREFIX) {
            errs.push(
                "spec.tags",
                format!("a tag with prefix {AWS_ROLE_TAG_PREFIX} is required"),
            );
        }

        errs.require_secret_ref("spec.secretRef", &self.secret_ref);

        errs.into_result(class)
    }
}
