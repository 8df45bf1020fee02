//! # Provisioner Engine
//!
//! Runs an ordered plan of provisioning steps against a [`provisioner_api::CloudCapability`]
//! and always tears down what the run created, newest first.
//!
//! ## Architecture
//!
//! - **`step`**: steps, step actions, and what a step produces
//! - **`plan`**: ordered plans whose dependencies only point backwards
//! - **`context`**: handles produced so far and template interpolation over them
//! - **`registry`**: owned resources and best-effort reverse-order release
//! - **`orchestrator`**: the run loop, phase tracking, cancellation and events
//! - **`actions`**: step actions backed by the cloud capability
//! - **`sample`**: the managed-identity virtual machine scenario
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use provisioner_api::InMemoryCloud;
//! use provisioner_engine::{Orchestrator, SampleSettings, managed_identity_vm_plan};
//!
//! let runtime = tokio::runtime::Builder::new_current_thread().build().expect("runtime");
//! let cloud = Arc::new(InMemoryCloud::new());
//! let settings = SampleSettings::generate("westus", "00000000-0000-0000-0000-000000000000");
//! let plan = managed_identity_vm_plan(cloud.clone(), &settings).expect("valid plan");
//!
//! let report = runtime.block_on(Orchestrator::new().run(plan));
//! assert!(report.outcome.is_completed());
//! assert!(cloud.live_resources().is_empty());
//! ```

pub mod actions;
pub mod context;
mod events;
pub mod orchestrator;
pub mod plan;
pub mod registry;
pub mod sample;
pub mod step;

pub use context::{ProvisioningContext, ResolvedDependencies};
pub use orchestrator::Orchestrator;
pub use plan::{Plan, PlanError};
pub use registry::{CleanupRegistry, CloudReleaser, OwnedResource, ResourceReleaser};
pub use sample::{SampleSettings, managed_identity_vm_plan};
pub use step::{FnAction, ProvisioningStep, StepAction, StepOutput};
