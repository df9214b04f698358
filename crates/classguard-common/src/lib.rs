//! Common types for classguard: machine class CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod metrics;
pub mod retry;
pub mod telemetry;

pub use config::ControllerConfig;
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group shared by machine classes and their dependents
pub const MACHINE_API_GROUP: &str = "machine.sapcloud.io";

/// Finalizer token the controller places on every valid machine class.
///
/// While present the API server keeps the class around; it is removed only
/// once no Machine, MachineSet or MachineDeployment references the class.
pub const DELETE_FINALIZER_NAME: &str = "machine.sapcloud.io/machine-controller-manager";

/// Field manager / reporting component name used for writes and events
pub const CONTROLLER_NAME: &str = "classguard-controller";
