//! The cloud resource capability consumed by the orchestrator.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use provisioner_types::{ExtensionSpec, RemoteCommandResult, ResourceHandle, VirtualMachineSpec};

/// Lazy, finite, non-restartable sequence of handles.
pub type HandleStream = BoxStream<'static, Result<ResourceHandle>>;

/// Narrow interface onto a cloud resource-management API.
///
/// Every call is treated as a black box: implementations own retries, polling of long-running
/// operations, and authentication. All creates return a [`ResourceHandle`] whose `id` is the
/// only thing [`CloudCapability::delete`] needs.
#[async_trait]
pub trait CloudCapability: Send + Sync {
    async fn create_resource_group(&self, name: &str, region: &str) -> Result<ResourceHandle>;

    /// Creates a user-assigned identity. The handle exposes `principal_id` and `client_id`.
    async fn create_managed_identity(&self, name: &str, resource_group: &ResourceHandle) -> Result<ResourceHandle>;

    /// Binds `principal_id` to `role_id` at the scope of `scope`.
    async fn grant_role(&self, principal_id: &str, role_id: &str, scope: &ResourceHandle) -> Result<ResourceHandle>;

    /// Creates a virtual network. The handle exposes its default subnet as `subnet_id`.
    async fn create_network(&self, resource_group: &ResourceHandle, address_space: &str) -> Result<ResourceHandle>;

    async fn create_public_address(&self, resource_group: &ResourceHandle, label: &str) -> Result<ResourceHandle>;

    async fn create_network_interface(
        &self,
        resource_group: &ResourceHandle,
        subnet_id: &str,
        address: &ResourceHandle,
    ) -> Result<ResourceHandle>;

    async fn create_virtual_machine(&self, resource_group: &ResourceHandle, spec: &VirtualMachineSpec) -> Result<ResourceHandle>;

    async fn attach_extension(&self, vm: &ResourceHandle, extension: &ExtensionSpec) -> Result<ResourceHandle>;

    async fn run_remote_command(&self, vm: &ResourceHandle, command_lines: &[String]) -> Result<RemoteCommandResult>;

    fn list_virtual_machines(&self, resource_group: &ResourceHandle) -> HandleStream;

    /// Releases a resource by identifier.
    async fn delete(&self, handle: &ResourceHandle) -> Result<()>;
}
