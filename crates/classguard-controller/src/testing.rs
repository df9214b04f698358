//! In-memory collaborators and fixtures for unit tests

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::runtime::events::EventType;
use kube::Resource;
use parking_lot::Mutex;

use classguard_common::crd::{
    AzureHardwareProfile, AzureImageReference, AzureLinuxConfiguration, AzureMachineClass,
    AzureMachineClassSpec, AzureOsDisk, AzureOsProfile, AzureSshConfiguration, AzureSshPublicKey,
    AzureStorageProfile, AzureSubnetInfo, AzureVirtualMachineProperties, ClassSpec, Machine,
    MachineSet, MachineSetSpec, MachineSpec, MachineTemplateSpec, SecretReference,
};
use classguard_common::events::EventPublisher;
use classguard_common::retry::RetryConfig;
use classguard_common::{Error, Result, DELETE_FINALIZER_NAME};

use crate::class::MachineClass;
use crate::dependent::DependentKind;
use crate::index::DependencyIndex;
use crate::key::ObjectKey;
use crate::queue::WorkQueue;
use crate::store::ClassStore;

// =============================================================================
// Fixtures
// =============================================================================

/// A valid AzureMachineClass without finalizers
pub fn azure_class(namespace: &str, name: &str) -> AzureMachineClass {
    let spec = AzureMachineClassSpec {
        location: "westeurope".to_string(),
        resource_group: namespace.to_string(),
        subnet_info: AzureSubnetInfo {
            vnet_name: namespace.to_string(),
            subnet_name: format!("{namespace}-nodes"),
        },
        properties: AzureVirtualMachineProperties {
            hardware_profile: AzureHardwareProfile {
                vm_size: "Standard_D2s_v3".to_string(),
            },
            storage_profile: AzureStorageProfile {
                image_reference: AzureImageReference {
                    urn: "Canonical:UbuntuServer:18.04-LTS:latest".to_string(),
                },
                os_disk: AzureOsDisk {
                    caching: "None".to_string(),
                    disk_size_gb: 50,
                    create_option: "FromImage".to_string(),
                },
            },
            os_profile: AzureOsProfile {
                admin_username: "core".to_string(),
                linux_configuration: AzureLinuxConfiguration {
                    disable_password_authentication: true,
                    ssh: AzureSshConfiguration {
                        public_keys: AzureSshPublicKey {
                            path: "/home/core/.ssh/authorized_keys".to_string(),
                            key_data: "ssh-rsa AAAA".to_string(),
                        },
                    },
                },
            },
        },
        tags: BTreeMap::new(),
        secret_ref: SecretReference {
            name: "cloudprovider".to_string(),
            namespace: namespace.to_string(),
        },
    };
    let mut class = AzureMachineClass::new(name, spec);
    class.metadata.namespace = Some(namespace.to_string());
    class
}

/// `class` carrying the controller's finalizer
pub fn with_finalizer<K: MachineClass>(mut class: K) -> K {
    class.meta_mut().finalizers = Some(vec![DELETE_FINALIZER_NAME.to_string()]);
    class
}

/// `class` with deletion requested and the given finalizers
pub fn deleting<K: MachineClass>(mut class: K, finalizers: &[&str]) -> K {
    let meta = class.meta_mut();
    meta.deletion_timestamp = Some(Time(chrono::Utc::now()));
    meta.finalizers = Some(finalizers.iter().map(|f| f.to_string()).collect());
    class
}

/// A Machine referencing `class_kind/class_name`
pub fn machine(namespace: &str, name: &str, class_kind: &str, class_name: &str) -> Machine {
    Machine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: MachineSpec {
            class: ClassSpec::new(class_kind, class_name),
            ..Default::default()
        },
    }
}

/// A MachineSet whose template references `class_kind/class_name`
pub fn machine_set(namespace: &str, name: &str, class_kind: &str, class_name: &str) -> MachineSet {
    MachineSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: MachineSetSpec {
            replicas: 1,
            template: MachineTemplateSpec {
                metadata: None,
                spec: MachineSpec {
                    class: ClassSpec::new(class_kind, class_name),
                    ..Default::default()
                },
            },
            ..Default::default()
        },
    }
}

/// An index with every dependent kind synced and nothing indexed
pub fn synced_index() -> DependencyIndex {
    let index = DependencyIndex::new();
    for kind in DependentKind::ALL {
        index.mark_synced(kind);
    }
    index
}

/// Queue with millisecond backoff
pub fn test_queue() -> Arc<WorkQueue<ObjectKey>> {
    Arc::new(WorkQueue::new(
        Duration::from_millis(5),
        Duration::from_millis(50),
    ))
}

/// Retry policy without meaningful sleeps
pub fn fast_retry(attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts: attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        backoff_multiplier: 2.0,
    }
}

// =============================================================================
// FakeStore
// =============================================================================

/// In-memory class store with `resourceVersion` preconditions.
///
/// Like the API server it deletes a deleting object once its last finalizer
/// is removed.
pub struct FakeStore<K> {
    objects: Mutex<HashMap<ObjectKey, K>>,
    next_version: AtomicU32,
    conflicts: AtomicU32,
    update_failures: Mutex<VecDeque<Error>>,
    get_failures: Mutex<VecDeque<Error>>,
    get_delay: Mutex<Option<Duration>>,
    gets: AtomicUsize,
    updates: AtomicUsize,
}

impl<K: MachineClass> FakeStore<K> {
    /// Store with no objects
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            objects: Mutex::new(HashMap::new()),
            next_version: AtomicU32::new(1),
            conflicts: AtomicU32::new(0),
            update_failures: Mutex::new(VecDeque::new()),
            get_failures: Mutex::new(VecDeque::new()),
            get_delay: Mutex::new(None),
            gets: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
        })
    }

    /// Store holding `class`
    pub fn with(class: K) -> Arc<Self> {
        let store = Self::empty();
        store.insert(class);
        store
    }

    /// Insert or overwrite an object, assigning a fresh resourceVersion
    pub fn insert(&self, mut class: K) {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        class.meta_mut().resource_version = Some(version.to_string());
        if let Some(key) = ObjectKey::from_resource(&class) {
            self.objects.lock().insert(key, class);
        }
    }

    /// Fail the next `n` finalizer writes with a conflict
    pub fn inject_conflicts(&self, n: u32) {
        self.conflicts.store(n, Ordering::SeqCst);
    }

    /// Fail the next finalizer write with `err`
    pub fn inject_failure(&self, err: Error) {
        self.update_failures.lock().push_back(err);
    }

    /// Fail the next get with `err`
    pub fn inject_get_failure(&self, err: Error) {
        self.get_failures.lock().push_back(err);
    }

    /// Make every `get` take `delay`
    pub fn slow_gets(&self, delay: Duration) {
        *self.get_delay.lock() = Some(delay);
    }

    /// Request deletion of a stored object
    pub fn mark_deleting(&self, namespace: &str, name: &str) {
        let mut objects = self.objects.lock();
        if let Some(class) = objects.get_mut(&ObjectKey::new(namespace, name)) {
            class.meta_mut().deletion_timestamp = Some(Time(chrono::Utc::now()));
        }
    }

    /// Finalizers of a stored object
    pub fn finalizers(&self, namespace: &str, name: &str) -> Option<Vec<String>> {
        self.objects
            .lock()
            .get(&ObjectKey::new(namespace, name))
            .and_then(|c| c.meta().finalizers.clone())
    }

    /// True if the object exists
    pub fn contains(&self, namespace: &str, name: &str) -> bool {
        self.objects
            .lock()
            .contains_key(&ObjectKey::new(namespace, name))
    }

    /// Number of `get` calls
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of successful finalizer writes
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<K: MachineClass> ClassStore<K> for FakeStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let delay = *self.get_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.get_failures.lock().pop_front() {
            return Err(err);
        }
        Ok(self
            .objects
            .lock()
            .get(&ObjectKey::new(namespace, name))
            .cloned())
    }

    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<()> {
        if let Some(err) = self.update_failures.lock().pop_front() {
            return Err(err);
        }
        if self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::conflict(K::class_kind(), name));
        }

        let key = ObjectKey::new(namespace, name);
        let mut objects = self.objects.lock();
        let Some(stored) = objects.get_mut(&key) else {
            return Err(Error::not_found(K::class_kind(), name));
        };
        if resource_version.is_some_and(|v| stored.meta().resource_version.as_deref() != Some(v)) {
            return Err(Error::conflict(K::class_kind(), name));
        }

        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let meta = stored.meta_mut();
        meta.finalizers = (!finalizers.is_empty()).then(|| finalizers.to_vec());
        meta.resource_version = Some(version.to_string());
        self.updates.fetch_add(1, Ordering::SeqCst);

        if meta.deletion_timestamp.is_some() && meta.finalizers.is_none() {
            objects.remove(&key);
        }
        Ok(())
    }
}

// =============================================================================
// RecordingEvents
// =============================================================================

/// Event publisher that remembers every reason it was given
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<(EventType, String)>>,
}

impl RecordingEvents {
    /// Reasons in publish order
    pub fn reasons(&self) -> Vec<String> {
        self.events.lock().iter().map(|(_, r)| r.clone()).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        self.events.lock().push((type_, reason.to_string()));
    }
}
