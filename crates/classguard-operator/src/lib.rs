//! classguard operator - wiring for the machine class controllers
//!
//! The binary in `main.rs` parses [`cli::Cli`], then composes the futures
//! built by [`controller_runner`] under one cancellation token.

#![deny(missing_docs)]

pub mod cli;
pub mod controller_runner;

use kube::CustomResourceExt;

use classguard_common::crd::{
    all_crds, AWSMachineClass, AzureMachineClass, Machine, MachineDeployment, MachineSet,
};

/// All CRD manifests as one multi-document YAML stream
pub fn render_crds() -> anyhow::Result<String> {
    let docs = all_crds()
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(docs.join("---\n"))
}

/// CRD names this operator serves, for startup logging
pub fn crd_names() -> [&'static str; 5] {
    [
        AzureMachineClass::crd_name(),
        AWSMachineClass::crd_name(),
        Machine::crd_name(),
        MachineSet::crd_name(),
        MachineDeployment::crd_name(),
    ]
}
