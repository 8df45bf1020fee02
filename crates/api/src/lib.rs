//! Cloud resource capability for the provisioner.
//!
//! The orchestrator never talks to a cloud directly; it drives a [`CloudCapability`]. Two
//! implementations live here:
//!
//! - [`RestCloudClient`]: JSON-over-HTTPS client for a resource-management endpoint,
//!   configured from the environment via [`ClientConfig::from_env`]
//! - [`InMemoryCloud`]: deterministic simulation with call recording and fault injection

pub mod capability;
pub mod config;
pub mod error;
pub mod memory;
pub mod rest;

pub use capability::{CloudCapability, HandleStream};
pub use config::{ClientConfig, ConfigError, Credentials};
pub use error::CloudError;
pub use memory::{CloudCall, CloudOperation, InMemoryCloud, SIMULATED_SUBSCRIPTION_ID};
pub use rest::RestCloudClient;
