//! Controller runner - builds the watch and worker futures
//!
//! Each `build_*` function returns boxed futures that the caller composes.
//! Construction is pure; nothing runs until the futures are awaited.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use kube::api::Api;
use kube::core::NamespaceResourceScope;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::info;

use classguard_common::crd::{Machine, MachineDeployment, MachineSet};
use classguard_common::events::KubeEventPublisher;
use classguard_common::kube_utils::watcher_config;
use classguard_common::{ControllerConfig, CONTROLLER_NAME};
use classguard_controller::watch::{watch_classes, watch_dependents};
use classguard_controller::{
    ClassController, Context, DependencyIndex, DependentResource, DependentResync,
    EventDispatcher, MachineClass,
};

/// A spawned-later unit of work
pub type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Namespaced API, or cluster-wide when no namespace is configured
pub fn scoped_api<R>(client: Client, namespace: Option<&str>) -> Api<R>
where
    R: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Build the worker pool and class watch for one class kind.
///
/// Returns the dispatcher so dependent watches can feed this kind's queue.
pub fn build_class_controller<K: MachineClass>(
    client: Client,
    index: Arc<DependencyIndex>,
    resync: Arc<dyn DependentResync>,
    config: &ControllerConfig,
    shutdown: CancellationToken,
) -> (EventDispatcher, Vec<BoxedTask>) {
    let ctx = Context::<K>::builder(client.clone(), index)
        .resync(resync)
        .events(Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME)))
        .finalizer_retry(config.finalizer_retry())
        .build();
    let controller = ClassController::new(ctx, config.clone());
    let dispatcher = controller.dispatcher();

    info!(kind = %K::class_kind(), "- class controller");

    let api: Api<K> = scoped_api(client, config.namespace.as_deref());
    let tasks: Vec<BoxedTask> = vec![
        Box::pin(watch_classes(
            api,
            watcher_config(config.watch_timeout_secs),
            dispatcher.clone(),
            shutdown.clone(),
        )),
        Box::pin(controller.run(shutdown)),
    ];
    (dispatcher, tasks)
}

fn build_dependent_watch<D: DependentResource>(
    client: Client,
    index: Arc<DependencyIndex>,
    dispatchers: Vec<EventDispatcher>,
    config: &ControllerConfig,
    shutdown: CancellationToken,
) -> BoxedTask {
    info!(kind = %D::KIND, "- dependent watch");
    let api: Api<D> = scoped_api(client, config.namespace.as_deref());
    Box::pin(watch_dependents(
        api,
        watcher_config(config.watch_timeout_secs),
        index,
        dispatchers,
        shutdown,
    ))
}

/// Build one watch per dependent kind, each feeding every class dispatcher
pub fn build_dependent_watches(
    client: Client,
    index: Arc<DependencyIndex>,
    dispatchers: Vec<EventDispatcher>,
    config: &ControllerConfig,
    shutdown: CancellationToken,
) -> Vec<BoxedTask> {
    vec![
        build_dependent_watch::<Machine>(
            client.clone(),
            index.clone(),
            dispatchers.clone(),
            config,
            shutdown.clone(),
        ),
        build_dependent_watch::<MachineSet>(
            client.clone(),
            index.clone(),
            dispatchers.clone(),
            config,
            shutdown.clone(),
        ),
        build_dependent_watch::<MachineDeployment>(client, index, dispatchers, config, shutdown),
    ]
}
