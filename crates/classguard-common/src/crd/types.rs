//! Supporting types shared by machine class and dependent CRDs

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Reference from a dependent (Machine, MachineSet, MachineDeployment) to
/// the machine class it consumes.
///
/// The class lives in the same namespace as the dependent.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ClassSpec {
    /// API group of the class (e.g. "machine.sapcloud.io")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,

    /// Kind of the class (e.g. "AzureMachineClass")
    #[serde(default)]
    pub kind: String,

    /// Name of the class
    #[serde(default)]
    pub name: String,
}

impl ClassSpec {
    /// Create a class reference for the given kind and name
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_group: None,
            kind: kind.into(),
            name: name.into(),
        }
    }
}

/// Reference to a Secret holding cloud credentials
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Name of the secret
    #[serde(default)]
    pub name: String,

    /// Namespace of the secret
    #[serde(default)]
    pub namespace: String,
}

/// A single invalid field
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    /// JSON path of the field (e.g. "spec.subnetInfo.vnetName")
    pub field: String,
    /// What is wrong with it
    pub message: String,
}

/// Accumulates every invalid field of a spec so one validation pass reports
/// all problems at once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an invalid field
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Record `field` as required when `value` is blank
    pub fn require(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.push(field, "required value");
        }
    }

    /// Validate a secret reference under `prefix`
    pub fn require_secret_ref(&mut self, prefix: &str, secret: &SecretReference) {
        self.require(&format!("{prefix}.name"), &secret.name);
        self.require(&format!("{prefix}.namespace"), &secret.namespace);
    }

    /// True when no field was recorded
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Recorded errors
    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    /// Convert into a validation error for `class`, or Ok when empty
    pub fn into_result(self, class: &str) -> Result<(), Error> {
        let Some(first) = self.0.first() else {
            return Ok(());
        };
        let message = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(Error::validation_for_field(
            class,
            first.field.clone(),
            message,
        ))
    }
}
