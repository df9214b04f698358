//! Read/write access to machine class objects

use std::marker::PhantomData;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::{json, Value};

use classguard_common::{Error, Result, CONTROLLER_NAME};

use crate::class::MachineClass;

/// Fetch classes of one kind and conditionally rewrite their finalizers.
///
/// The controller owns nothing on a class but its finalizer list, so that
/// list is the only thing a store ever writes.
#[async_trait]
pub trait ClassStore<K: MachineClass>: Send + Sync {
    /// Current state of `namespace/name`, or `None` if it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// Make `finalizers` the complete finalizer list of `namespace/name`.
    ///
    /// Fails with a conflict when `resource_version` is stale and with
    /// not-found when the object is gone. An empty list clears the field.
    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<()>;
}

/// JSON merge patch touching only `metadata.finalizers`.
///
/// A `resourceVersion` in the patch makes the API server reject it with 409
/// when the object changed since it was read.
pub fn finalizer_patch(resource_version: Option<&str>, finalizers: &[String]) -> Value {
    let finalizers = if finalizers.is_empty() {
        Value::Null
    } else {
        json!(finalizers)
    };
    let mut metadata = json!({ "finalizers": finalizers });
    if let Some(version) = resource_version {
        metadata["resourceVersion"] = json!(version);
    }
    json!({ "metadata": metadata })
}

/// Class store backed by the Kubernetes API
pub struct KubeClassStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeClassStore<K> {
    /// Create a store using `client`
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

/// Map API status codes onto the store's conflict / not-found contract
fn map_api_error(kind: &str, name: &str, err: kube::Error) -> Error {
    match &err {
        kube::Error::Api(ae) if ae.code == 409 => Error::conflict(kind, name),
        kube::Error::Api(ae) if ae.code == 404 => Error::not_found(kind, name),
        _ => Error::from(err),
    }
}

#[async_trait]
impl<K: MachineClass> ClassStore<K> for KubeClassStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<()> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let patch = finalizer_patch(resource_version, finalizers);
        api.patch(
            name,
            &PatchParams::apply(CONTROLLER_NAME),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(|e| map_api_error(&K::class_kind(), name, e))?;
        Ok(())
    }
}
