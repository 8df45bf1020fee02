//! Shared type definitions for the provisioner workspace.
//!
//! - [`handle`]: resource handles and their property keys
//! - [`spec`]: payloads handed to the cloud capability
//! - [`run`]: run phases, step records, outcomes, reports and events

pub mod handle;
pub mod run;
pub mod spec;

pub use handle::{ResourceHandle, ResourceKind};
pub use run::{RunEvent, RunOutcome, RunPhase, RunReport, StepError, StepRecord, StepStatus, TeardownError, TeardownReport};
pub use spec::{ExtensionSpec, ImageReference, RemoteCommandResult, VirtualMachineSpec};
