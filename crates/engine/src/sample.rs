//! The managed-identity virtual machine scenario.
//!
//! Builds an eleven-step plan: a primary resource group, a workload group holding a
//! user-assigned identity with Contributor rights on the primary group, a Linux machine running
//! as that identity, a script extension installing the toolchain, a remote command that creates
//! a second machine from inside the first, and finally a listing of the primary group.

use std::{fmt, sync::Arc};

use provisioner_api::CloudCapability;
use provisioner_types::{ExtensionSpec, ImageReference, spec::CONTRIBUTOR_ROLE};
use provisioner_util::{generate_password, generate_username, random_name};

use crate::{
    actions::{
        AttachExtension, CreateManagedIdentity, CreateNetwork, CreateNetworkInterface, CreatePublicAddress, CreateResourceGroup,
        CreateVirtualMachine, GrantRole, ListVirtualMachines, RunRemoteCommand, VirtualMachineTemplate,
    },
    plan::{Plan, PlanError},
    step::ProvisioningStep,
};

pub const PRIMARY_GROUP: &str = "primary-group";
pub const WORKLOAD_GROUP: &str = "workload-group";
pub const IDENTITY: &str = "identity";
pub const CONTRIBUTOR_GRANT: &str = "contributor-grant";
pub const NETWORK: &str = "network";
pub const PUBLIC_ADDRESS: &str = "public-address";
pub const NETWORK_INTERFACE: &str = "network-interface";
pub const VIRTUAL_MACHINE: &str = "virtual-machine";
pub const SCRIPT_EXTENSION: &str = "script-extension";
pub const REMOTE_COMMAND: &str = "remote-command";
pub const LIST_MACHINES: &str = "list-machines";

pub const DEFAULT_REGION: &str = "westus";
pub const DEFAULT_PRIMARY_GROUP: &str = "ComputeRG0000";
const DEFAULT_VM_SIZE: &str = "Standard_D2a_v4";
const DEFAULT_ADDRESS_SPACE: &str = "10.0.0.0/28";
const INSTALL_SCRIPT_URI: &str =
    "https://raw.githubusercontent.com/Azure/azure-libraries-for-net/master/Samples/Asset/install_dotnet_git.sh";
const INSTALL_SCRIPT_COMMAND: &str = "bash install_dotnet_git.sh";
const APPLICATION_REPOSITORY: &str = "compute-dotnet-manage-vm-from-vm-with-msi-credentials";

/// Names and credentials for one run of the scenario.
#[derive(Clone)]
pub struct SampleSettings {
    pub region: String,
    pub subscription_id: String,
    pub primary_group: String,
    pub workload_group: String,
    pub identity_name: String,
    pub vm_name: String,
    pub public_address_label: String,
    pub admin_username: String,
    pub admin_password: String,
    pub vm_size: String,
    pub address_space: String,
    pub script_uris: Vec<String>,
    pub script_command: String,
}

impl SampleSettings {
    /// Settings with freshly generated names and credentials.
    pub fn generate(region: impl Into<String>, subscription_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            subscription_id: subscription_id.into(),
            primary_group: DEFAULT_PRIMARY_GROUP.to_string(),
            workload_group: random_name("uamsi-rg-2"),
            identity_name: random_name("id"),
            vm_name: random_name("VM1"),
            public_address_label: random_name("pip1"),
            admin_username: generate_username(),
            admin_password: generate_password(),
            vm_size: DEFAULT_VM_SIZE.to_string(),
            address_space: DEFAULT_ADDRESS_SPACE.to_string(),
            script_uris: vec![INSTALL_SCRIPT_URI.to_string()],
            script_command: INSTALL_SCRIPT_COMMAND.to_string(),
        }
    }

    pub fn with_primary_group(mut self, name: impl Into<String>) -> Self {
        self.primary_group = name.into();
        self
    }

    /// Shell lines run on the first machine. The identity's client id is filled in at run time.
    pub fn remote_command_lines(&self) -> Vec<String> {
        vec![
            format!("git clone https://github.com/Azure-Samples/{APPLICATION_REPOSITORY}.git"),
            format!("cd {APPLICATION_REPOSITORY}"),
            format!(
                "dotnet run {} {} ${{{{ steps.{IDENTITY}.client_id }}}}",
                self.subscription_id, self.primary_group
            ),
        ]
    }
}

impl fmt::Debug for SampleSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleSettings")
            .field("region", &self.region)
            .field("subscription_id", &self.subscription_id)
            .field("primary_group", &self.primary_group)
            .field("workload_group", &self.workload_group)
            .field("identity_name", &self.identity_name)
            .field("vm_name", &self.vm_name)
            .field("public_address_label", &self.public_address_label)
            .field("admin_username", &self.admin_username)
            .field("admin_password", &"[REDACTED]")
            .field("vm_size", &self.vm_size)
            .finish_non_exhaustive()
    }
}

/// Builds the scenario plan against `cloud`.
pub fn managed_identity_vm_plan(cloud: Arc<dyn CloudCapability>, settings: &SampleSettings) -> Result<Plan, PlanError> {
    let mut plan = Plan::new();

    plan.push(
        ProvisioningStep::new(
            PRIMARY_GROUP,
            CreateResourceGroup {
                cloud: cloud.clone(),
                name: settings.primary_group.clone(),
                region: settings.region.clone(),
            },
        )
        .describe("Create the primary resource group"),
    )?;

    plan.push(
        ProvisioningStep::new(
            WORKLOAD_GROUP,
            CreateResourceGroup {
                cloud: cloud.clone(),
                name: settings.workload_group.clone(),
                region: settings.region.clone(),
            },
        )
        .describe("Create the workload resource group"),
    )?;

    plan.push(
        ProvisioningStep::new(
            IDENTITY,
            CreateManagedIdentity {
                cloud: cloud.clone(),
                name: settings.identity_name.clone(),
                resource_group_step: WORKLOAD_GROUP.into(),
            },
        )
        .describe("Create a user-assigned identity"),
    )?;

    plan.push(
        ProvisioningStep::new(
            CONTRIBUTOR_GRANT,
            GrantRole {
                cloud: cloud.clone(),
                role_id: CONTRIBUTOR_ROLE.into(),
                identity_step: IDENTITY.into(),
                scope_step: PRIMARY_GROUP.into(),
            },
        )
        .describe("Grant the identity Contributor on the primary group"),
    )?;

    plan.push(
        ProvisioningStep::new(
            NETWORK,
            CreateNetwork {
                cloud: cloud.clone(),
                resource_group_step: WORKLOAD_GROUP.into(),
                address_space: settings.address_space.clone(),
            },
        )
        .describe("Create the virtual network"),
    )?;

    plan.push(
        ProvisioningStep::new(
            PUBLIC_ADDRESS,
            CreatePublicAddress {
                cloud: cloud.clone(),
                resource_group_step: WORKLOAD_GROUP.into(),
                label: settings.public_address_label.clone(),
            },
        )
        .describe("Allocate a public address"),
    )?;

    plan.push(
        ProvisioningStep::new(
            NETWORK_INTERFACE,
            CreateNetworkInterface {
                cloud: cloud.clone(),
                resource_group_step: WORKLOAD_GROUP.into(),
                network_step: NETWORK.into(),
                address_step: PUBLIC_ADDRESS.into(),
            },
        )
        .describe("Create the machine's network interface"),
    )?;

    plan.push(
        ProvisioningStep::new(
            VIRTUAL_MACHINE,
            CreateVirtualMachine {
                cloud: cloud.clone(),
                resource_group_step: WORKLOAD_GROUP.into(),
                interface_step: NETWORK_INTERFACE.into(),
                identity_step: Some(IDENTITY.into()),
                template: VirtualMachineTemplate {
                    name: settings.vm_name.clone(),
                    region: settings.region.clone(),
                    size: settings.vm_size.clone(),
                    image: ImageReference::ubuntu_server_16_04_lts(),
                    admin_username: settings.admin_username.clone(),
                    admin_password: settings.admin_password.clone(),
                },
            },
        )
        .describe("Create a Linux machine running as the identity"),
    )?;

    plan.push(
        ProvisioningStep::new(
            SCRIPT_EXTENSION,
            AttachExtension {
                cloud: cloud.clone(),
                vm_step: VIRTUAL_MACHINE.into(),
                extension: ExtensionSpec::custom_script_for_linux(&settings.script_uris, settings.script_command.clone()),
            },
        )
        .describe("Install the toolchain with a custom script extension"),
    )?;

    plan.push(
        ProvisioningStep::new(
            REMOTE_COMMAND,
            RunRemoteCommand {
                cloud: cloud.clone(),
                vm_step: VIRTUAL_MACHINE.into(),
                reads: vec![IDENTITY.into()],
                command_lines: settings.remote_command_lines(),
            },
        )
        .describe("Run the application that provisions from inside the machine"),
    )?;

    plan.push(
        ProvisioningStep::new(
            LIST_MACHINES,
            ListVirtualMachines {
                cloud,
                resource_group_step: PRIMARY_GROUP.into(),
            },
        )
        .describe("List machines in the primary group"),
    )?;

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisioner_api::InMemoryCloud;

    fn settings() -> SampleSettings {
        SampleSettings::generate(DEFAULT_REGION, "sub-1")
    }

    #[test]
    fn plan_has_eleven_steps_in_scenario_order() {
        let plan = managed_identity_vm_plan(Arc::new(InMemoryCloud::new()), &settings()).expect("valid plan");
        assert_eq!(
            plan.step_ids().collect::<Vec<_>>(),
            vec![
                PRIMARY_GROUP,
                WORKLOAD_GROUP,
                IDENTITY,
                CONTRIBUTOR_GRANT,
                NETWORK,
                PUBLIC_ADDRESS,
                NETWORK_INTERFACE,
                VIRTUAL_MACHINE,
                SCRIPT_EXTENSION,
                REMOTE_COMMAND,
                LIST_MACHINES,
            ]
        );
    }

    #[test]
    fn remote_command_references_the_identity_client_id() {
        let settings = settings();
        let lines = settings.remote_command_lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[2],
            format!("dotnet run sub-1 {DEFAULT_PRIMARY_GROUP} ${{{{ steps.identity.client_id }}}}")
        );

        let plan = managed_identity_vm_plan(Arc::new(InMemoryCloud::new()), &settings).expect("valid plan");
        let command = &plan.steps()[9];
        assert_eq!(command.dependencies(), [VIRTUAL_MACHINE.to_string(), IDENTITY.to_string()]);
    }

    #[test]
    fn debug_output_hides_the_password() {
        let settings = settings();
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains(&settings.admin_password));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn generated_names_use_scenario_prefixes() {
        let settings = settings();
        assert_eq!(settings.primary_group, DEFAULT_PRIMARY_GROUP);
        assert!(settings.workload_group.starts_with("uamsi-rg-2"));
        assert!(settings.public_address_label.starts_with("pip1"));
        assert_eq!(settings.vm_size, "Standard_D2a_v4");
    }
}
