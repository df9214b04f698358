//! Uniform view over the objects that reference machine classes

use std::fmt;

use kube::core::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;

use classguard_common::crd::{ClassSpec, Machine, MachineDeployment, MachineSet};
use classguard_common::MACHINE_API_GROUP;

use crate::key::ObjectKey;

/// Kinds of objects that can block class deletion
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DependentKind {
    /// Machine (`spec.class`)
    Machine,
    /// MachineSet (`spec.template.spec.class`)
    MachineSet,
    /// MachineDeployment (`spec.template.spec.class`)
    MachineDeployment,
}

impl DependentKind {
    /// Every dependent kind
    pub const ALL: [DependentKind; 3] = [
        DependentKind::Machine,
        DependentKind::MachineSet,
        DependentKind::MachineDeployment,
    ];

    /// Kubernetes kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Machine => "Machine",
            Self::MachineSet => "MachineSet",
            Self::MachineDeployment => "MachineDeployment",
        }
    }
}

impl fmt::Display for DependentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A watched resource that references a machine class
pub trait DependentResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Which dependent kind this is
    const KIND: DependentKind;

    /// The class reference carried by the object
    fn class_spec(&self) -> &ClassSpec;
}

impl DependentResource for Machine {
    const KIND: DependentKind = DependentKind::Machine;

    fn class_spec(&self) -> &ClassSpec {
        &self.spec.class
    }
}

impl DependentResource for MachineSet {
    const KIND: DependentKind = DependentKind::MachineSet;

    fn class_spec(&self) -> &ClassSpec {
        &self.spec.template.spec.class
    }
}

impl DependentResource for MachineDeployment {
    const KIND: DependentKind = DependentKind::MachineDeployment;

    fn class_spec(&self) -> &ClassSpec {
        &self.spec.template.spec.class
    }
}

/// Identity of a dependent object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependentKey {
    /// Dependent kind
    pub kind: DependentKind,
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl fmt::Display for DependentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Identity of a referenced class: `(namespace, kind, name)`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassReference {
    /// Namespace of the class (same as the dependent's)
    pub namespace: String,
    /// Class kind
    pub kind: String,
    /// Class name
    pub name: String,
}

impl ClassReference {
    /// Create a reference
    pub fn new(
        namespace: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Work queue key of the referenced class
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

impl fmt::Display for ClassReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Dependent reduced to what the index and dispatchers need
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependentObject {
    /// Identity
    pub key: DependentKey,
    /// Referenced class. `None` when the reference is empty or points at
    /// another API group.
    pub class: Option<ClassReference>,
}

impl DependentObject {
    /// Build the view of a watched object.
    ///
    /// Returns `None` for objects without a name or namespace.
    pub fn from_resource<D: DependentResource>(obj: &D) -> Option<Self> {
        let key = ObjectKey::from_resource(obj)?;
        let spec = obj.class_spec();

        let foreign_group = spec
            .api_group
            .as_deref()
            .is_some_and(|g| !g.is_empty() && g != MACHINE_API_GROUP);
        let class = if spec.kind.is_empty() || spec.name.is_empty() || foreign_group {
            None
        } else {
            Some(ClassReference::new(&key.namespace, &spec.kind, &spec.name))
        };

        Some(Self {
            key: DependentKey {
                kind: D::KIND,
                namespace: key.namespace,
                name: key.name,
            },
            class,
        })
    }
}

/// Dependents referencing one class, grouped by kind
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dependents {
    /// Machines
    pub machines: Vec<DependentKey>,
    /// MachineSets
    pub machine_sets: Vec<DependentKey>,
    /// MachineDeployments
    pub machine_deployments: Vec<DependentKey>,
}

impl Dependents {
    /// True when nothing references the class
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Number of dependents across all kinds
    pub fn total(&self) -> usize {
        self.machines.len() + self.machine_sets.len() + self.machine_deployments.len()
    }

    /// All dependents, machines first
    pub fn iter(&self) -> impl Iterator<Item = &DependentKey> {
        self.machines
            .iter()
            .chain(self.machine_sets.iter())
            .chain(self.machine_deployments.iter())
    }

    pub(crate) fn push(&mut self, key: DependentKey) {
        match key.kind {
            DependentKind::Machine => self.machines.push(key),
            DependentKind::MachineSet => self.machine_sets.push(key),
            DependentKind::MachineDeployment => self.machine_deployments.push(key),
        }
    }
}
