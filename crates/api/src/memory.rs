//! In-process simulated cloud.
//!
//! [`InMemoryCloud`] implements [`CloudCapability`] without any network access. It hands out
//! deterministic identifiers, records every call in order, and can be told to fail specific
//! operations or deletions. The CLI uses it for `--simulate` runs; tests use it to observe
//! release ordering.

use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{Mutex, MutexGuard, PoisonError},
};

use anyhow::Result;
use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use indexmap::IndexMap;
use provisioner_types::{
    ExtensionSpec, RemoteCommandResult, ResourceHandle, ResourceKind, VirtualMachineSpec,
    handle::{CLIENT_ID, IP_ADDRESS, PRINCIPAL_ID, REGION, SUBNET_ID},
};
use tracing::debug;

use crate::{
    capability::{CloudCapability, HandleStream},
    error::CloudError,
};

/// Subscription every simulated resource lives under.
pub const SIMULATED_SUBSCRIPTION_ID: &str = "00000000-0000-0000-0000-000000000000";
const SIMULATED_SUBSCRIPTION: &str = "/subscriptions/00000000-0000-0000-0000-000000000000";

/// Operations exposed by the capability, used to target fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudOperation {
    CreateResourceGroup,
    CreateManagedIdentity,
    GrantRole,
    CreateNetwork,
    CreatePublicAddress,
    CreateNetworkInterface,
    CreateVirtualMachine,
    AttachExtension,
    RunRemoteCommand,
    ListVirtualMachines,
    Delete,
}

impl CloudOperation {
    pub const ALL: [CloudOperation; 11] = [
        Self::CreateResourceGroup,
        Self::CreateManagedIdentity,
        Self::GrantRole,
        Self::CreateNetwork,
        Self::CreatePublicAddress,
        Self::CreateNetworkInterface,
        Self::CreateVirtualMachine,
        Self::AttachExtension,
        Self::RunRemoteCommand,
        Self::ListVirtualMachines,
        Self::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateResourceGroup => "create-resource-group",
            Self::CreateManagedIdentity => "create-managed-identity",
            Self::GrantRole => "grant-role",
            Self::CreateNetwork => "create-network",
            Self::CreatePublicAddress => "create-public-address",
            Self::CreateNetworkInterface => "create-network-interface",
            Self::CreateVirtualMachine => "create-virtual-machine",
            Self::AttachExtension => "attach-extension",
            Self::RunRemoteCommand => "run-remote-command",
            Self::ListVirtualMachines => "list-virtual-machines",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for CloudOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|operation| operation.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(CloudOperation::as_str).collect();
                format!("unknown operation '{s}'; expected one of: {}", known.join(", "))
            })
    }
}

/// One recorded capability call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudCall {
    pub operation: CloudOperation,
    /// Name or identifier the call targeted.
    pub target: String,
}

#[derive(Default)]
struct SimulatedState {
    serial: u64,
    live: IndexMap<String, ResourceHandle>,
    calls: Vec<CloudCall>,
    remote_commands: Vec<Vec<String>>,
    deleted: Vec<String>,
    operation_failures: HashMap<CloudOperation, String>,
    target_failures: HashMap<String, String>,
    delete_failures: HashMap<String, String>,
}

impl SimulatedState {
    fn next_serial(&mut self) -> u64 {
        self.serial += 1;
        self.serial
    }

    fn next_guid(&mut self) -> String {
        format!("00000000-0000-4000-8000-{:012}", self.next_serial())
    }

    fn record(&mut self, operation: CloudOperation, target: &str) -> Result<()> {
        self.calls.push(CloudCall {
            operation,
            target: target.to_string(),
        });
        if let Some(message) = self.operation_failures.get(&operation) {
            return Err(CloudError::rejected(operation.as_str(), message.clone()).into());
        }
        if operation != CloudOperation::Delete
            && let Some(message) = self.target_failures.get(target)
        {
            return Err(CloudError::rejected(operation.as_str(), message.clone()).into());
        }
        Ok(())
    }

    fn insert(&mut self, handle: ResourceHandle) -> ResourceHandle {
        self.live.insert(handle.id.clone(), handle.clone());
        handle
    }
}

/// Simulated cloud capability.
#[derive(Default)]
pub struct InMemoryCloud {
    state: Mutex<SimulatedState>,
}

impl InMemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call to `operation` fails with `message`.
    pub fn fail_operation(self, operation: CloudOperation, message: impl Into<String>) -> Self {
        self.lock().operation_failures.insert(operation, message.into());
        self
    }

    /// Any create or read call targeting `target` (a resource name, or an identifier for calls
    /// that act on an existing resource) fails with `message`.
    pub fn fail_target(self, target: impl Into<String>, message: impl Into<String>) -> Self {
        self.lock().target_failures.insert(target.into(), message.into());
        self
    }

    /// Deleting the resource whose name or identifier is `target` fails with `message`.
    pub fn fail_delete(self, target: impl Into<String>, message: impl Into<String>) -> Self {
        self.lock().delete_failures.insert(target.into(), message.into());
        self
    }

    /// All calls in the order they were made.
    pub fn calls(&self) -> Vec<CloudCall> {
        self.lock().calls.clone()
    }

    /// Identifiers successfully deleted, in deletion order.
    /// Command lines of every remote command that reached a machine, in call order.
    pub fn remote_commands(&self) -> Vec<Vec<String>> {
        self.lock().remote_commands.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    /// Resources created and not yet deleted, in creation order.
    pub fn live_resources(&self) -> Vec<ResourceHandle> {
        self.lock().live.values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn create(
        &self,
        operation: CloudOperation,
        kind: ResourceKind,
        id: impl FnOnce(&mut SimulatedState) -> String,
        name: &str,
        properties: &[(&str, String)],
    ) -> Result<ResourceHandle> {
        let mut state = self.lock();
        state.record(operation, name)?;
        let id = id(&mut *state);
        if state.live.contains_key(&id) {
            return Err(CloudError::rejected(operation.as_str(), format!("'{name}' already exists")).into());
        }
        let mut handle = ResourceHandle::new(kind, id, name);
        for (key, value) in properties {
            handle = handle.with_property(*key, value.clone());
        }
        debug!(operation = %operation, resource_id = %handle.id, "simulated create");
        Ok(state.insert(handle))
    }
}

fn region_of(handle: &ResourceHandle) -> String {
    handle.property(REGION).unwrap_or("simulated").to_string()
}

#[async_trait]
impl CloudCapability for InMemoryCloud {
    async fn create_resource_group(&self, name: &str, region: &str) -> Result<ResourceHandle> {
        self.create(
            CloudOperation::CreateResourceGroup,
            ResourceKind::ResourceGroup,
            |_| format!("{SIMULATED_SUBSCRIPTION}/resourceGroups/{name}"),
            name,
            &[(REGION, region.to_string())],
        )
    }

    async fn create_managed_identity(&self, name: &str, resource_group: &ResourceHandle) -> Result<ResourceHandle> {
        let group_id = resource_group.id.clone();
        let (principal_id, client_id) = {
            let mut state = self.lock();
            (state.next_guid(), state.next_guid())
        };
        self.create(
            CloudOperation::CreateManagedIdentity,
            ResourceKind::ManagedIdentity,
            |_| format!("{group_id}/identities/{name}"),
            name,
            &[
                (PRINCIPAL_ID, principal_id),
                (CLIENT_ID, client_id),
                (REGION, region_of(resource_group)),
            ],
        )
    }

    async fn grant_role(&self, principal_id: &str, role_id: &str, scope: &ResourceHandle) -> Result<ResourceHandle> {
        let scope_id = scope.id.clone();
        self.create(
            CloudOperation::GrantRole,
            ResourceKind::RoleAssignment,
            |state| format!("{scope_id}/roleAssignments/{}", state.next_guid()),
            &format!("{principal_id}:{role_id}"),
            &[],
        )
    }

    async fn create_network(&self, resource_group: &ResourceHandle, address_space: &str) -> Result<ResourceHandle> {
        let group_id = resource_group.id.clone();
        let name = format!("vnet-{}", address_space.replace(['.', '/'], "-"));
        let subnet_id = format!("{group_id}/networks/{name}/subnets/subnet1");
        self.create(
            CloudOperation::CreateNetwork,
            ResourceKind::VirtualNetwork,
            |_| format!("{group_id}/networks/{name}"),
            &name,
            &[(SUBNET_ID, subnet_id), (REGION, region_of(resource_group))],
        )
    }

    async fn create_public_address(&self, resource_group: &ResourceHandle, label: &str) -> Result<ResourceHandle> {
        let group_id = resource_group.id.clone();
        let serial = self.lock().next_serial();
        self.create(
            CloudOperation::CreatePublicAddress,
            ResourceKind::PublicAddress,
            |_| format!("{group_id}/publicAddresses/{label}"),
            label,
            &[
                (IP_ADDRESS, format!("203.0.113.{}", serial % 254 + 1)),
                (REGION, region_of(resource_group)),
            ],
        )
    }

    async fn create_network_interface(
        &self,
        resource_group: &ResourceHandle,
        subnet_id: &str,
        address: &ResourceHandle,
    ) -> Result<ResourceHandle> {
        let group_id = resource_group.id.clone();
        let name = format!("nic-{}", address.name);
        {
            let state = self.lock();
            if !state.live.contains_key(&address.id) {
                return Err(CloudError::not_found(address.id.clone()).into());
            }
        }
        self.create(
            CloudOperation::CreateNetworkInterface,
            ResourceKind::NetworkInterface,
            |_| format!("{group_id}/networkInterfaces/{name}"),
            &name,
            &[(SUBNET_ID, subnet_id.to_string()), (REGION, region_of(resource_group))],
        )
    }

    async fn create_virtual_machine(&self, resource_group: &ResourceHandle, spec: &VirtualMachineSpec) -> Result<ResourceHandle> {
        let group_id = resource_group.id.clone();
        self.create(
            CloudOperation::CreateVirtualMachine,
            ResourceKind::VirtualMachine,
            |_| format!("{group_id}/virtualMachines/{}", spec.name),
            &spec.name,
            &[(REGION, spec.region.clone())],
        )
    }

    async fn attach_extension(&self, vm: &ResourceHandle, extension: &ExtensionSpec) -> Result<ResourceHandle> {
        let vm_id = vm.id.clone();
        self.create(
            CloudOperation::AttachExtension,
            ResourceKind::Extension,
            |_| format!("{vm_id}/extensions/{}", extension.name),
            &extension.name,
            &[],
        )
    }

    async fn run_remote_command(&self, vm: &ResourceHandle, command_lines: &[String]) -> Result<RemoteCommandResult> {
        let mut state = self.lock();
        state.record(CloudOperation::RunRemoteCommand, &vm.id)?;
        if !state.live.contains_key(&vm.id) {
            return Err(CloudError::not_found(vm.id.clone()).into());
        }
        state.remote_commands.push(command_lines.to_vec());
        let invocation_id = format!("{}/runCommands/{}", vm.id, state.next_serial());
        let stdout = command_lines.iter().map(|line| format!("$ {line}\n")).collect();
        Ok(RemoteCommandResult {
            invocation_id,
            exit_code: 0,
            stdout,
            stderr: String::new(),
        })
    }

    fn list_virtual_machines(&self, resource_group: &ResourceHandle) -> HandleStream {
        let mut state = self.lock();
        if let Err(error) = state.record(CloudOperation::ListVirtualMachines, &resource_group.id) {
            return stream::iter(vec![Err(error)]).boxed();
        }
        let prefix = format!("{}/", resource_group.id);
        let machines: Vec<Result<ResourceHandle>> = state
            .live
            .values()
            .filter(|handle| handle.kind == ResourceKind::VirtualMachine && handle.id.starts_with(&prefix))
            .cloned()
            .map(Ok)
            .collect();
        stream::iter(machines).boxed()
    }

    async fn delete(&self, handle: &ResourceHandle) -> Result<()> {
        let mut state = self.lock();
        state.record(CloudOperation::Delete, &handle.id)?;
        let injected = state
            .delete_failures
            .get(&handle.id)
            .or_else(|| state.delete_failures.get(&handle.name))
            .cloned();
        if let Some(message) = injected {
            return Err(CloudError::rejected(CloudOperation::Delete.as_str(), message).into());
        }
        if state.live.shift_remove(&handle.id).is_none() {
            return Err(CloudError::not_found(handle.id.clone()).into());
        }
        state.deleted.push(handle.id.clone());
        debug!(resource_id = %handle.id, "simulated delete");
        Ok(())
    }
}
