//! Request payloads passed to the cloud capability.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Built-in role granting full management rights except access control.
pub const CONTRIBUTOR_ROLE: &str = "b24988ac-6180-42a0-ab88-20f7382dd24c";

/// Marketplace image reference for a virtual machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageReference {
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    #[serde(default = "latest_version")]
    pub version: String,
}

impl ImageReference {
    /// Ubuntu Server 16.04 LTS, the image the managed-identity scenario boots.
    pub fn ubuntu_server_16_04_lts() -> Self {
        Self {
            publisher: "Canonical".into(),
            offer: "UbuntuServer".into(),
            sku: "16.04-LTS".into(),
            version: latest_version(),
        }
    }
}

fn latest_version() -> String {
    "latest".into()
}

/// Everything needed to create a Linux virtual machine.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VirtualMachineSpec {
    pub name: String,
    pub region: String,
    /// Size label, for example `Standard_D2a_v4`.
    pub size: String,
    pub image: ImageReference,
    pub admin_username: String,
    /// Never logged; reports redact it.
    #[serde(skip_serializing)]
    pub admin_password: String,
    /// Identifier of the primary network interface.
    pub network_interface_id: String,
    /// User-assigned identities attached to the machine.
    #[serde(default)]
    pub identity_ids: Vec<String>,
}

impl fmt::Debug for VirtualMachineSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualMachineSpec")
            .field("name", &self.name)
            .field("region", &self.region)
            .field("size", &self.size)
            .field("image", &self.image)
            .field("admin_username", &self.admin_username)
            .field("admin_password", &"[REDACTED]")
            .field("network_interface_id", &self.network_interface_id)
            .field("identity_ids", &self.identity_ids)
            .finish()
    }
}

/// Post-provisioning agent installed onto a virtual machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtensionSpec {
    pub name: String,
    pub publisher: String,
    pub extension_type: String,
    pub version: String,
    #[serde(default)]
    pub auto_upgrade_minor_version: bool,
    #[serde(default)]
    pub public_settings: JsonMap<String, JsonValue>,
}

impl ExtensionSpec {
    /// Custom script extension that downloads `file_uris` and executes `command`.
    pub fn custom_script_for_linux(file_uris: &[String], command: impl Into<String>) -> Self {
        let mut public_settings = JsonMap::new();
        public_settings.insert(
            "fileUris".into(),
            JsonValue::Array(file_uris.iter().cloned().map(JsonValue::String).collect()),
        );
        public_settings.insert("commandToExecute".into(), JsonValue::String(command.into()));
        Self {
            name: "CustomScriptForLinux".into(),
            publisher: "Microsoft.OSTCExtensions".into(),
            extension_type: "CustomScriptForLinux".into(),
            version: "1.4".into(),
            auto_upgrade_minor_version: true,
            public_settings,
        }
    }
}

/// Outcome of a shell script executed inside a virtual machine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteCommandResult {
    /// Identifier the cloud assigned to the invocation.
    pub invocation_id: String,
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

impl RemoteCommandResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}
