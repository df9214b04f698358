//! Work queue keys

use std::fmt;
use std::str::FromStr;

use kube::core::NamespaceResourceScope;
use kube::Resource;

use classguard_common::Error;

/// Identity of a namespaced object, rendered `namespace/name`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl ObjectKey {
    /// Create a key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a namespaced object, or `None` if its name or namespace is unset
    pub fn from_resource<R>(obj: &R) -> Option<Self>
    where
        R: Resource<Scope = NamespaceResourceScope>,
    {
        let meta = obj.meta();
        match (meta.namespace.as_deref(), meta.name.as_deref()) {
            (Some(ns), Some(name)) if !ns.is_empty() && !name.is_empty() => {
                Some(Self::new(ns, name))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    /// Keys without a namespace are rejected: classes are namespaced.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(Error::invalid_key(s)),
        }
    }
}
