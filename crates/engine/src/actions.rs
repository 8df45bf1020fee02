//! Step actions backed by the cloud capability.
//!
//! Each action names the earlier steps it reads by identifier, so a plan can wire them together
//! without closures. Actions that allocate something return an owned output released through
//! [`CloudReleaser`]; commands and listings return observed outputs.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use provisioner_api::CloudCapability;
use provisioner_types::{
    ExtensionSpec, ImageReference, ResourceHandle, ResourceKind, VirtualMachineSpec,
    handle::{PRINCIPAL_ID, SUBNET_ID},
};
use tracing::{debug, info};

use crate::{
    context::ResolvedDependencies,
    registry::CloudReleaser,
    step::{StepAction, StepOutput},
};

/// Creates a resource group.
pub struct CreateResourceGroup {
    pub cloud: Arc<dyn CloudCapability>,
    pub name: String,
    pub region: String,
}

#[async_trait]
impl StepAction for CreateResourceGroup {
    async fn execute(&self, _dependencies: &ResolvedDependencies) -> Result<StepOutput> {
        let handle = self.cloud.create_resource_group(&self.name, &self.region).await?;
        Ok(StepOutput::owned(handle, CloudReleaser::shared(&self.cloud)))
    }
}

/// Creates a user-assigned identity inside the group produced by `resource_group_step`.
pub struct CreateManagedIdentity {
    pub cloud: Arc<dyn CloudCapability>,
    pub name: String,
    pub resource_group_step: String,
}

#[async_trait]
impl StepAction for CreateManagedIdentity {
    fn dependencies(&self) -> Vec<String> {
        vec![self.resource_group_step.clone()]
    }

    async fn execute(&self, dependencies: &ResolvedDependencies) -> Result<StepOutput> {
        let group = dependencies.get(&self.resource_group_step)?;
        let handle = self.cloud.create_managed_identity(&self.name, group).await?;
        Ok(StepOutput::owned(handle, CloudReleaser::shared(&self.cloud)))
    }
}

/// Grants the identity from `identity_step` a role on the resource from `scope_step`.
pub struct GrantRole {
    pub cloud: Arc<dyn CloudCapability>,
    pub role_id: String,
    pub identity_step: String,
    pub scope_step: String,
}

#[async_trait]
impl StepAction for GrantRole {
    fn dependencies(&self) -> Vec<String> {
        vec![self.identity_step.clone(), self.scope_step.clone()]
    }

    async fn execute(&self, dependencies: &ResolvedDependencies) -> Result<StepOutput> {
        let principal_id = dependencies.property(&self.identity_step, PRINCIPAL_ID)?;
        let scope = dependencies.get(&self.scope_step)?;
        let handle = self.cloud.grant_role(principal_id, &self.role_id, scope).await?;
        Ok(StepOutput::owned(handle, CloudReleaser::shared(&self.cloud)))
    }
}

/// Creates a virtual network with one default subnet.
pub struct CreateNetwork {
    pub cloud: Arc<dyn CloudCapability>,
    pub resource_group_step: String,
    pub address_space: String,
}

#[async_trait]
impl StepAction for CreateNetwork {
    fn dependencies(&self) -> Vec<String> {
        vec![self.resource_group_step.clone()]
    }

    async fn execute(&self, dependencies: &ResolvedDependencies) -> Result<StepOutput> {
        let group = dependencies.get(&self.resource_group_step)?;
        let handle = self.cloud.create_network(group, &self.address_space).await?;
        Ok(StepOutput::owned(handle, CloudReleaser::shared(&self.cloud)))
    }
}

/// Allocates a public address under a DNS label.
pub struct CreatePublicAddress {
    pub cloud: Arc<dyn CloudCapability>,
    pub resource_group_step: String,
    pub label: String,
}

#[async_trait]
impl StepAction for CreatePublicAddress {
    fn dependencies(&self) -> Vec<String> {
        vec![self.resource_group_step.clone()]
    }

    async fn execute(&self, dependencies: &ResolvedDependencies) -> Result<StepOutput> {
        let group = dependencies.get(&self.resource_group_step)?;
        let handle = self.cloud.create_public_address(group, &self.label).await?;
        Ok(StepOutput::owned(handle, CloudReleaser::shared(&self.cloud)))
    }
}

/// Creates a network interface on the network's default subnet, bound to a public address.
pub struct CreateNetworkInterface {
    pub cloud: Arc<dyn CloudCapability>,
    pub resource_group_step: String,
    pub network_step: String,
    pub address_step: String,
}

#[async_trait]
impl StepAction for CreateNetworkInterface {
    fn dependencies(&self) -> Vec<String> {
        vec![
            self.resource_group_step.clone(),
            self.network_step.clone(),
            self.address_step.clone(),
        ]
    }

    async fn execute(&self, dependencies: &ResolvedDependencies) -> Result<StepOutput> {
        let group = dependencies.get(&self.resource_group_step)?;
        let subnet_id = dependencies.property(&self.network_step, SUBNET_ID)?;
        let address = dependencies.get(&self.address_step)?;
        let handle = self.cloud.create_network_interface(group, subnet_id, address).await?;
        Ok(StepOutput::owned(handle, CloudReleaser::shared(&self.cloud)))
    }
}

/// Machine settings that do not come from earlier steps.
#[derive(Clone)]
pub struct VirtualMachineTemplate {
    pub name: String,
    pub region: String,
    pub size: String,
    pub image: ImageReference,
    pub admin_username: String,
    pub admin_password: String,
}

/// Creates a Linux virtual machine on the interface from `interface_step`, optionally with the
/// identity from `identity_step` attached.
pub struct CreateVirtualMachine {
    pub cloud: Arc<dyn CloudCapability>,
    pub resource_group_step: String,
    pub interface_step: String,
    pub identity_step: Option<String>,
    pub template: VirtualMachineTemplate,
}

#[async_trait]
impl StepAction for CreateVirtualMachine {
    fn dependencies(&self) -> Vec<String> {
        let mut dependencies = vec![self.resource_group_step.clone(), self.interface_step.clone()];
        dependencies.extend(self.identity_step.iter().cloned());
        dependencies
    }

    async fn execute(&self, dependencies: &ResolvedDependencies) -> Result<StepOutput> {
        let group = dependencies.get(&self.resource_group_step)?;
        let interface = dependencies.get(&self.interface_step)?;
        let identity_ids = match &self.identity_step {
            Some(step_id) => vec![dependencies.get(step_id)?.id.clone()],
            None => Vec::new(),
        };
        let template = &self.template;
        let spec = VirtualMachineSpec {
            name: template.name.clone(),
            region: template.region.clone(),
            size: template.size.clone(),
            image: template.image.clone(),
            admin_username: template.admin_username.clone(),
            admin_password: template.admin_password.clone(),
            network_interface_id: interface.id.clone(),
            identity_ids,
        };
        let handle = self.cloud.create_virtual_machine(group, &spec).await?;
        Ok(StepOutput::owned(handle, CloudReleaser::shared(&self.cloud)))
    }
}

/// Installs an extension on the machine from `vm_step`.
pub struct AttachExtension {
    pub cloud: Arc<dyn CloudCapability>,
    pub vm_step: String,
    pub extension: ExtensionSpec,
}

#[async_trait]
impl StepAction for AttachExtension {
    fn dependencies(&self) -> Vec<String> {
        vec![self.vm_step.clone()]
    }

    async fn execute(&self, dependencies: &ResolvedDependencies) -> Result<StepOutput> {
        let vm = dependencies.get(&self.vm_step)?;
        let handle = self.cloud.attach_extension(vm, &self.extension).await?;
        Ok(StepOutput::owned(handle, CloudReleaser::shared(&self.cloud)))
    }
}

/// Runs shell lines on the machine from `vm_step`.
///
/// Lines may reference earlier steps with `${{ steps.<step_id>.<field> }}`; every referenced
/// step must be listed in `reads`. A non-zero exit status fails the step.
pub struct RunRemoteCommand {
    pub cloud: Arc<dyn CloudCapability>,
    pub vm_step: String,
    pub reads: Vec<String>,
    pub command_lines: Vec<String>,
}

#[async_trait]
impl StepAction for RunRemoteCommand {
    fn dependencies(&self) -> Vec<String> {
        let mut dependencies = vec![self.vm_step.clone()];
        for step_id in &self.reads {
            if !dependencies.contains(step_id) {
                dependencies.push(step_id.clone());
            }
        }
        dependencies
    }

    async fn execute(&self, dependencies: &ResolvedDependencies) -> Result<StepOutput> {
        let vm = dependencies.get(&self.vm_step)?;
        let lines = self
            .command_lines
            .iter()
            .map(|line| dependencies.interpolate(line))
            .collect::<Result<Vec<_>>>()
            .context("failed to render remote command")?;

        let result = self.cloud.run_remote_command(vm, &lines).await?;
        debug!(invocation_id = %result.invocation_id, stdout = %result.stdout, "remote command output");
        if !result.succeeded() {
            bail!("remote command exited with status {}: {}", result.exit_code, result.stderr.trim());
        }

        let handle = ResourceHandle::new(ResourceKind::CommandInvocation, &result.invocation_id, &vm.name)
            .with_property("exit_code", result.exit_code.to_string());
        Ok(StepOutput::observed(handle))
    }
}

/// Lists the machines in the group from `resource_group_step`.
///
/// The listing is drained once; each machine identifier is reported as a detail of the step.
pub struct ListVirtualMachines {
    pub cloud: Arc<dyn CloudCapability>,
    pub resource_group_step: String,
}

#[async_trait]
impl StepAction for ListVirtualMachines {
    fn dependencies(&self) -> Vec<String> {
        vec![self.resource_group_step.clone()]
    }

    async fn execute(&self, dependencies: &ResolvedDependencies) -> Result<StepOutput> {
        let group = dependencies.get(&self.resource_group_step)?;
        let machines: Vec<ResourceHandle> = self.cloud.list_virtual_machines(group).try_collect().await?;
        for machine in &machines {
            info!(resource_id = %machine.id, name = %machine.name, "found virtual machine");
        }

        let handle = ResourceHandle::new(ResourceKind::Listing, format!("{}/virtualMachines", group.id), &group.name)
            .with_property("count", machines.len().to_string());
        let ids = machines.into_iter().map(|machine| machine.id).collect();
        Ok(StepOutput::observed(handle).with_detail_ids(ids))
    }
}
