//! Resource handles returned by provisioning steps.
//!
//! A [`ResourceHandle`] is the descriptive half of a provisioned resource: the identifier the
//! cloud assigned, its kind, a display name, and any string properties later steps need (for
//! example an identity's `principal_id`). The release capability is kept separately by the
//! engine's cleanup registry so handles can be copied into the run context freely.

use std::fmt;

use anyhow::{Result, anyhow};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Property key carrying the principal identifier of a managed identity.
pub const PRINCIPAL_ID: &str = "principal_id";
/// Property key carrying the client identifier of a managed identity.
pub const CLIENT_ID: &str = "client_id";
/// Property key carrying the default subnet identifier of a virtual network.
pub const SUBNET_ID: &str = "subnet_id";
/// Property key carrying the region a resource was placed in.
pub const REGION: &str = "region";
/// Property key carrying the allocated public IP address, when known.
pub const IP_ADDRESS: &str = "ip_address";

/// Category of a resource handle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ResourceGroup,
    ManagedIdentity,
    RoleAssignment,
    VirtualNetwork,
    PublicAddress,
    NetworkInterface,
    VirtualMachine,
    Extension,
    /// Result of a remote command; not a cloud resource and never released.
    CommandInvocation,
    /// Result of a listing call; not a cloud resource and never released.
    Listing,
}

impl ResourceKind {
    /// Stable snake_case label used in logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceGroup => "resource_group",
            Self::ManagedIdentity => "managed_identity",
            Self::RoleAssignment => "role_assignment",
            Self::VirtualNetwork => "virtual_network",
            Self::PublicAddress => "public_address",
            Self::NetworkInterface => "network_interface",
            Self::VirtualMachine => "virtual_machine",
            Self::Extension => "extension",
            Self::CommandInvocation => "command_invocation",
            Self::Listing => "listing",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque reference to a provisioned resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceHandle {
    /// Identifier assigned by the cloud; release is always keyed on this value.
    pub id: String,
    /// Category of the resource.
    pub kind: ResourceKind,
    /// Human-readable name the resource was created with.
    pub name: String,
    /// Extra string attributes exposed to later steps.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, String>,
}

impl ResourceHandle {
    pub fn new(kind: ResourceKind, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            properties: IndexMap::new(),
        }
    }

    /// Builder-style property setter.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Looks up a property by key.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Looks up a property that a dependent step cannot proceed without.
    ///
    /// # Errors
    ///
    /// Returns an error naming the handle and the missing key when the property is absent.
    pub fn require_property(&self, key: &str) -> Result<&str> {
        self.property(key)
            .ok_or_else(|| anyhow!("{} '{}' does not expose required property '{}'", self.kind, self.id, key))
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.kind, self.name, self.id)
    }
}
