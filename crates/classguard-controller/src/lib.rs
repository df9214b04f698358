//! Finalizer-gated deletion controller for machine classes
//!
//! A machine class carries the controller's finalizer for as long as it
//! lives. Once deletion is requested the finalizer is removed only when no
//! Machine, MachineSet or MachineDeployment in the class's namespace still
//! references it.
//!
//! Data flow: watch loops ([`watch`]) keep the [`DependencyIndex`] current
//! and feed [`EventDispatcher`]s, which enqueue class keys on each kind's
//! [`WorkQueue`]. Workers ([`runner`]) run [`reconcile`] per key.

#![deny(missing_docs)]

pub mod class;
mod controller;
pub mod dependent;
pub mod dispatcher;
pub mod finalizer;
pub mod index;
pub mod key;
pub mod queue;
pub mod reconciler;
pub mod resync;
pub mod runner;
pub mod store;
pub mod watch;

#[cfg(test)]
pub(crate) mod testing;

pub use class::MachineClass;
pub use controller::ClassController;
pub use dependent::{
    ClassReference, DependentKey, DependentKind, DependentObject, DependentResource, Dependents,
};
pub use dispatcher::EventDispatcher;
pub use finalizer::{FinalizerManager, FinalizerUpdate};
pub use index::DependencyIndex;
pub use key::ObjectKey;
pub use queue::WorkQueue;
pub use reconciler::{reconcile, Context, ContextBuilder, ReconcileOutcome};
pub use resync::{ChannelResync, DependentResync, NoopResync};
pub use store::{ClassStore, KubeClassStore};
