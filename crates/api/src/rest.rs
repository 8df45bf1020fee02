//! JSON-over-HTTPS implementation of [`CloudCapability`].
//!
//! Resources are addressed by their identifiers, which double as API-relative paths. Creates are
//! idempotent `PUT`s; a `202 Accepted` with a `Location` header is polled until the operation
//! settles. Deletes treat `404` as already released so teardown can be re-run safely.
//!
//! Absolute URLs handed back by the service (`Location`, `nextLink`) are only followed when they
//! share the scheme, host and port of the configured base URL, since every request carries the
//! client credentials.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt, stream};
use provisioner_types::{
    ExtensionSpec, RemoteCommandResult, ResourceHandle, ResourceKind, VirtualMachineSpec,
    handle::{CLIENT_ID, IP_ADDRESS, PRINCIPAL_ID, REGION, SUBNET_ID},
};
use provisioner_util::{random_guid, random_name};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use crate::{
    capability::{CloudCapability, HandleStream},
    config::{ClientConfig, Credentials},
    error::CloudError,
};

/// Upper bound on polls of a single long-running operation.
const MAX_POLL_ATTEMPTS: u32 = 120;
/// Default delay between polls of a long-running operation.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const TENANT_HEADER: &str = "x-tenant-id";
const DEFAULT_SUBNET_NAME: &str = "subnet1";

/// Management API client authenticated with service principal credentials.
#[derive(Debug, Clone)]
pub struct RestCloudClient {
    base_url: String,
    origin: Url,
    subscription_id: String,
    credentials: Credentials,
    http: Client,
    user_agent: String,
    poll_interval: Duration,
    max_poll_attempts: u32,
}

#[derive(Debug, Deserialize)]
struct ResourceEnvelope {
    id: String,
    name: String,
    #[serde(default)]
    properties: Value,
}

#[derive(Debug, Deserialize)]
struct ListPage {
    #[serde(default)]
    value: Vec<ResourceEnvelope>,
    #[serde(default, rename = "nextLink")]
    next_link: Option<String>,
}

impl RestCloudClient {
    /// Construct a client from validated configuration.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        default_headers.insert(
            TENANT_HEADER,
            header::HeaderValue::from_str(&config.credentials.tenant_id).context("tenant id is not a valid header value")?,
        );

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(60))
            .build()
            .context("build http client")?;
        let origin = Url::parse(&config.base_url).with_context(|| format!("invalid base url '{}'", config.base_url))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            origin,
            subscription_id: config.subscription_id,
            credentials: config.credentials,
            http,
            user_agent: format!("provisioner/0.1; {}", std::env::consts::OS),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: MAX_POLL_ATTEMPTS,
        })
    }

    /// Override the delay between polls of long-running operations.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Resolves a path against the base URL. Absolute URLs must stay on the base URL's origin.
    fn url(&self, operation: &str, path_or_url: &str) -> Result<String> {
        if !(path_or_url.starts_with("http://") || path_or_url.starts_with("https://")) {
            return Ok(format!("{}{}", self.base_url, path_or_url));
        }

        let target = Url::parse(path_or_url).map_err(|error| CloudError::invalid_response(operation, error.to_string()))?;
        let same_origin = target.scheme() == self.origin.scheme()
            && target.host_str() == self.origin.host_str()
            && target.port_or_known_default() == self.origin.port_or_known_default();
        if !same_origin {
            return Err(CloudError::invalid_response(
                operation,
                format!("refusing to follow '{path_or_url}' outside of '{}'", self.base_url),
            )
            .into());
        }
        Ok(path_or_url.to_string())
    }

    fn request(&self, operation: &str, method: Method, path: &str, api_version: Option<&str>) -> Result<RequestBuilder> {
        let url = self.url(operation, path)?;
        debug!(operation, %method, %url, "building request");
        let builder = self
            .http
            .request(method, url)
            .header(header::USER_AGENT, &self.user_agent)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret));
        Ok(match api_version {
            Some(version) => builder.query(&[("api-version", version)]),
            None => builder,
        })
    }

    async fn put_resource(&self, operation: &str, path: &str, api_version: &str, body: Value) -> Result<ResourceEnvelope> {
        let response = self
            .request(operation, Method::PUT, path, Some(api_version))?
            .json(&body)
            .send()
            .await?;
        let payload = self.settle(operation, response).await?;
        serde_json::from_value(payload).map_err(|error| CloudError::invalid_response(operation, error.to_string()).into())
    }

    /// Resolves a response to its final JSON payload, polling accepted operations.
    async fn settle(&self, operation: &str, mut response: Response) -> Result<Value> {
        let mut attempts = 0;
        while response.status() == StatusCode::ACCEPTED {
            let Some(location) = location_header(&response) else {
                break;
            };
            attempts += 1;
            if attempts > self.max_poll_attempts {
                return Err(CloudError::PollingExhausted {
                    operation: operation.to_string(),
                    attempts: self.max_poll_attempts,
                }
                .into());
            }
            debug!(operation, attempts, %location, "operation accepted; polling");
            tokio::time::sleep(self.poll_interval).await;
            response = self.request(operation, Method::GET, &location, None)?.send().await?;
        }

        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("failed to read {operation} response body"))?;
        if !status.is_success() {
            return Err(CloudError::status(operation, status.as_u16(), text).into());
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|error| CloudError::invalid_response(operation, error.to_string()).into())
    }

    fn region_of(resource_group: &ResourceHandle) -> Result<&str> {
        resource_group.require_property(REGION)
    }

    fn role_definition_id(&self, role_id: &str) -> String {
        format!(
            "/subscriptions/{}/providers/Microsoft.Authorization/roleDefinitions/{}",
            self.subscription_id, role_id
        )
    }
}

fn location_header(response: &Response) -> Option<String> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// API version used for each resource kind.
fn api_version(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::ResourceGroup => "2022-09-01",
        ResourceKind::ManagedIdentity => "2023-01-31",
        ResourceKind::RoleAssignment => "2022-04-01",
        ResourceKind::VirtualNetwork | ResourceKind::PublicAddress | ResourceKind::NetworkInterface => "2023-09-01",
        ResourceKind::VirtualMachine | ResourceKind::Extension | ResourceKind::CommandInvocation | ResourceKind::Listing => {
            "2023-09-01"
        }
    }
}

fn string_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn handle_from(kind: ResourceKind, envelope: &ResourceEnvelope) -> ResourceHandle {
    ResourceHandle::new(kind, envelope.id.clone(), envelope.name.clone())
}

/// Splits run-command status entries into stdout, stderr and an exit code.
fn remote_command_result(payload: &Value) -> RemoteCommandResult {
    let mut result = RemoteCommandResult {
        invocation_id: string_at(payload, "/id").map(str::to_string).unwrap_or_else(random_guid),
        ..Default::default()
    };
    let entries = payload.get("value").and_then(Value::as_array).cloned().unwrap_or_default();
    for entry in entries {
        let code = string_at(&entry, "/code").unwrap_or_default();
        let message = string_at(&entry, "/message").unwrap_or_default();
        if code.contains("StdErr") {
            result.stderr.push_str(message);
        } else {
            result.stdout.push_str(message);
        }
        if code.ends_with("failed") {
            result.exit_code = 1;
        }
    }
    result
}

#[async_trait]
impl CloudCapability for RestCloudClient {
    async fn create_resource_group(&self, name: &str, region: &str) -> Result<ResourceHandle> {
        let path = format!("/subscriptions/{}/resourcegroups/{}", self.subscription_id, name);
        let envelope = self
            .put_resource(
                "create_resource_group",
                &path,
                api_version(ResourceKind::ResourceGroup),
                json!({ "location": region }),
            )
            .await?;
        Ok(handle_from(ResourceKind::ResourceGroup, &envelope).with_property(REGION, region))
    }

    async fn create_managed_identity(&self, name: &str, resource_group: &ResourceHandle) -> Result<ResourceHandle> {
        let region = Self::region_of(resource_group)?;
        let path = format!(
            "{}/providers/Microsoft.ManagedIdentity/userAssignedIdentities/{}",
            resource_group.id, name
        );
        let envelope = self
            .put_resource(
                "create_managed_identity",
                &path,
                api_version(ResourceKind::ManagedIdentity),
                json!({ "location": region }),
            )
            .await?;
        let principal_id = string_at(&envelope.properties, "/principalId")
            .ok_or_else(|| CloudError::invalid_response("create_managed_identity", "missing principalId"))?;
        let client_id = string_at(&envelope.properties, "/clientId")
            .ok_or_else(|| CloudError::invalid_response("create_managed_identity", "missing clientId"))?;

        Ok(handle_from(ResourceKind::ManagedIdentity, &envelope)
            .with_property(PRINCIPAL_ID, principal_id)
            .with_property(CLIENT_ID, client_id)
            .with_property(REGION, region))
    }

    async fn grant_role(&self, principal_id: &str, role_id: &str, scope: &ResourceHandle) -> Result<ResourceHandle> {
        let path = format!("{}/providers/Microsoft.Authorization/roleAssignments/{}", scope.id, random_guid());
        let body = json!({
            "properties": {
                "roleDefinitionId": self.role_definition_id(role_id),
                "principalId": principal_id,
                "principalType": "ServicePrincipal",
            }
        });
        let envelope = self
            .put_resource("grant_role", &path, api_version(ResourceKind::RoleAssignment), body)
            .await?;
        Ok(handle_from(ResourceKind::RoleAssignment, &envelope))
    }

    async fn create_network(&self, resource_group: &ResourceHandle, address_space: &str) -> Result<ResourceHandle> {
        let region = Self::region_of(resource_group)?;
        let name = random_name("vnet");
        let path = format!("{}/providers/Microsoft.Network/virtualNetworks/{}", resource_group.id, name);
        let body = json!({
            "location": region,
            "properties": {
                "addressSpace": { "addressPrefixes": [address_space] },
                "subnets": [{ "name": DEFAULT_SUBNET_NAME, "properties": { "addressPrefix": address_space } }],
            }
        });
        let envelope = self
            .put_resource("create_network", &path, api_version(ResourceKind::VirtualNetwork), body)
            .await?;
        let subnet_id = string_at(&envelope.properties, "/subnets/0/id")
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}/subnets/{}", envelope.id, DEFAULT_SUBNET_NAME));

        Ok(handle_from(ResourceKind::VirtualNetwork, &envelope)
            .with_property(SUBNET_ID, subnet_id)
            .with_property(REGION, region))
    }

    async fn create_public_address(&self, resource_group: &ResourceHandle, label: &str) -> Result<ResourceHandle> {
        let region = Self::region_of(resource_group)?;
        let path = format!("{}/providers/Microsoft.Network/publicIPAddresses/{}", resource_group.id, label);
        let body = json!({
            "location": region,
            "properties": {
                "publicIPAllocationMethod": "Dynamic",
                "dnsSettings": { "domainNameLabel": label },
            }
        });
        let envelope = self
            .put_resource("create_public_address", &path, api_version(ResourceKind::PublicAddress), body)
            .await?;
        let mut handle = handle_from(ResourceKind::PublicAddress, &envelope).with_property(REGION, region);
        if let Some(ip_address) = string_at(&envelope.properties, "/ipAddress") {
            handle = handle.with_property(IP_ADDRESS, ip_address);
        }
        Ok(handle)
    }

    async fn create_network_interface(
        &self,
        resource_group: &ResourceHandle,
        subnet_id: &str,
        address: &ResourceHandle,
    ) -> Result<ResourceHandle> {
        let region = Self::region_of(resource_group)?;
        let name = random_name("nic");
        let path = format!("{}/providers/Microsoft.Network/networkInterfaces/{}", resource_group.id, name);
        let body = json!({
            "location": region,
            "properties": {
                "ipConfigurations": [{
                    "name": "primary",
                    "properties": {
                        "subnet": { "id": subnet_id },
                        "privateIPAllocationMethod": "Dynamic",
                        "publicIPAddress": { "id": address.id },
                    }
                }]
            }
        });
        let envelope = self
            .put_resource("create_network_interface", &path, api_version(ResourceKind::NetworkInterface), body)
            .await?;
        Ok(handle_from(ResourceKind::NetworkInterface, &envelope).with_property(REGION, region))
    }

    async fn create_virtual_machine(&self, resource_group: &ResourceHandle, spec: &VirtualMachineSpec) -> Result<ResourceHandle> {
        let path = format!("{}/providers/Microsoft.Compute/virtualMachines/{}", resource_group.id, spec.name);
        let identities: serde_json::Map<String, Value> = spec.identity_ids.iter().map(|id| (id.clone(), json!({}))).collect();
        let mut body = json!({
            "location": spec.region,
            "properties": {
                "hardwareProfile": { "vmSize": spec.size },
                "storageProfile": {
                    "imageReference": {
                        "publisher": spec.image.publisher,
                        "offer": spec.image.offer,
                        "sku": spec.image.sku,
                        "version": spec.image.version,
                    }
                },
                "osProfile": {
                    "computerName": spec.name,
                    "adminUsername": spec.admin_username,
                    "adminPassword": spec.admin_password,
                },
                "networkProfile": {
                    "networkInterfaces": [{ "id": spec.network_interface_id, "properties": { "primary": true } }]
                },
            }
        });
        if !identities.is_empty() {
            body["identity"] = json!({ "type": "UserAssigned", "userAssignedIdentities": identities });
        }
        let envelope = self
            .put_resource("create_virtual_machine", &path, api_version(ResourceKind::VirtualMachine), body)
            .await?;
        Ok(handle_from(ResourceKind::VirtualMachine, &envelope).with_property(REGION, spec.region.clone()))
    }

    async fn attach_extension(&self, vm: &ResourceHandle, extension: &ExtensionSpec) -> Result<ResourceHandle> {
        let region = vm.require_property(REGION)?;
        let path = format!("{}/extensions/{}", vm.id, extension.name);
        let body = json!({
            "location": region,
            "properties": {
                "publisher": extension.publisher,
                "type": extension.extension_type,
                "typeHandlerVersion": extension.version,
                "autoUpgradeMinorVersion": extension.auto_upgrade_minor_version,
                "settings": extension.public_settings,
            }
        });
        let envelope = self
            .put_resource("attach_extension", &path, api_version(ResourceKind::Extension), body)
            .await?;
        Ok(handle_from(ResourceKind::Extension, &envelope))
    }

    async fn run_remote_command(&self, vm: &ResourceHandle, command_lines: &[String]) -> Result<RemoteCommandResult> {
        let path = format!("{}/runCommand", vm.id);
        let body = json!({ "commandId": "RunShellScript", "script": command_lines });
        let response = self
            .request("run_remote_command", Method::POST, &path, Some(api_version(ResourceKind::CommandInvocation)))?
            .json(&body)
            .send()
            .await?;
        let payload = self.settle("run_remote_command", response).await?;
        Ok(remote_command_result(&payload))
    }

    fn list_virtual_machines(&self, resource_group: &ResourceHandle) -> HandleStream {
        let client = self.clone();
        let first_page = format!("{}/providers/Microsoft.Compute/virtualMachines", resource_group.id);

        stream::try_unfold(Some(first_page), move |cursor| {
            let client = client.clone();
            async move {
                let Some(page_path) = cursor else {
                    return Ok(None);
                };
                let version_query = (!page_path.contains("api-version=")).then(|| api_version(ResourceKind::VirtualMachine));
                let response = client
                    .request("list_virtual_machines", Method::GET, &page_path, version_query)?
                    .send()
                    .await?;
                let payload = client.settle("list_virtual_machines", response).await?;
                let page: ListPage = serde_json::from_value(payload)
                    .map_err(|error| CloudError::invalid_response("list_virtual_machines", error.to_string()))?;
                let handles: Vec<Result<ResourceHandle>> = page
                    .value
                    .iter()
                    .map(|envelope| Ok(handle_from(ResourceKind::VirtualMachine, envelope)))
                    .collect();
                Ok::<_, anyhow::Error>(Some((stream::iter(handles), page.next_link)))
            }
        })
        .try_flatten()
        .boxed()
    }

    async fn delete(&self, handle: &ResourceHandle) -> Result<()> {
        let response = self
            .request("delete", Method::DELETE, &handle.id, Some(api_version(handle.kind)))?
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(resource_id = %handle.id, "resource already gone");
            return Ok(());
        }
        match self.settle("delete", response).await {
            Err(error) if matches!(error.downcast_ref::<CloudError>(), Some(CloudError::Status { status: 404, .. })) => Ok(()),
            Err(error) => Err(error),
            Ok(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };

    use super::*;

    #[test]
    fn remote_command_result_splits_streams() {
        let payload = json!({
            "value": [
                { "code": "ComponentStatus/StdOut/succeeded", "message": "cloned\n" },
                { "code": "ComponentStatus/StdErr/succeeded", "message": "warning: detached HEAD" }
            ]
        });
        let result = remote_command_result(&payload);
        assert_eq!(result.stdout, "cloned\n");
        assert_eq!(result.stderr, "warning: detached HEAD");
        assert!(result.succeeded());
        assert!(!result.invocation_id.is_empty());
    }

    #[test]
    fn remote_command_result_flags_failed_entries() {
        let payload = json!({
            "id": "/invocations/1",
            "value": [{ "code": "ProvisioningState/failed", "message": "script exited 2" }]
        });
        let result = remote_command_result(&payload);
        assert_eq!(result.invocation_id, "/invocations/1");
        assert_eq!(result.exit_code, 1);
    }

    fn config(base_url: &str) -> ClientConfig {
        ClientConfig {
            base_url: base_url.into(),
            subscription_id: "sub".into(),
            credentials: Credentials {
                tenant_id: "tenant".into(),
                client_id: "client".into(),
                client_secret: "secret".into(),
            },
        }
    }

    /// Serves one canned HTTP/1.1 response per connection and records each request head.
    struct StubServer {
        listener: TcpListener,
        base_url: String,
    }

    impl StubServer {
        async fn bind() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub server");
            let base_url = format!("http://{}", listener.local_addr().expect("local addr"));
            Self { listener, base_url }
        }

        fn client(&self) -> RestCloudClient {
            RestCloudClient::new(config(&self.base_url))
                .expect("client")
                .with_poll_interval(Duration::ZERO)
        }

        fn serve(self, responses: Vec<String>) -> Arc<Mutex<Vec<String>>> {
            let requests = Arc::new(Mutex::new(Vec::new()));
            let seen = requests.clone();
            tokio::spawn(async move {
                for response in responses {
                    let Ok((mut socket, _)) = self.listener.accept().await else {
                        return;
                    };
                    let head = read_request_head(&mut socket).await;
                    seen.lock().expect("request log").push(head);
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            });
            requests
        }
    }

    async fn read_request_head(socket: &mut TcpStream) -> String {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let read = socket.read(&mut chunk).await.unwrap_or(0);
            if read == 0 {
                return String::from_utf8_lossy(&buffer).into_owned();
            }
            buffer.extend_from_slice(&chunk[..read]);
            let Some(end) = buffer.windows(4).position(|window| window == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buffer[..end]).into_owned();
            let body_length = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            while buffer.len() < end + 4 + body_length {
                let read = socket.read(&mut chunk).await.unwrap_or(0);
                if read == 0 {
                    break;
                }
                buffer.extend_from_slice(&chunk[..read]);
            }
            return head;
        }
    }

    fn reply(status: &str, headers: &[(&str, &str)], body: &str) -> String {
        let mut response = format!("HTTP/1.1 {status}\r\n");
        for (name, value) in headers {
            response.push_str(&format!("{name}: {value}\r\n"));
        }
        response.push_str(&format!(
            "Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ));
        response
    }

    fn request_lines(requests: &Mutex<Vec<String>>) -> Vec<String> {
        requests
            .lock()
            .expect("request log")
            .iter()
            .map(|head| head.lines().next().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn urls_resolve_against_the_base_origin() {
        let client = RestCloudClient::new(config("https://management.example.com")).expect("client");

        assert_eq!(
            client.url("delete", "/subscriptions/sub/resourcegroups/rg1").expect("relative path"),
            "https://management.example.com/subscriptions/sub/resourcegroups/rg1"
        );
        assert_eq!(
            client.url("delete", "https://management.example.com:443/operations/1").expect("same origin"),
            "https://management.example.com:443/operations/1"
        );
        for foreign in [
            "https://poll.example.com/operations/1",
            "http://management.example.com/operations/1",
            "https://management.example.com:8443/operations/1",
        ] {
            let error = client.url("delete", foreign).expect_err("foreign origin");
            assert!(matches!(error.downcast_ref::<CloudError>(), Some(CloudError::InvalidResponse { .. })));
        }
    }

    #[tokio::test]
    async fn location_on_another_origin_is_not_followed() {
        let server = StubServer::bind().await;
        let client = server.client();
        let requests = server.serve(vec![reply(
            "202 Accepted",
            &[("Location", "http://attacker.example/poll")],
            "",
        )]);

        let error = client.create_resource_group("rg1", "westus").await.expect_err("foreign location");

        assert!(error.to_string().contains("refusing to follow 'http://attacker.example/poll'"));
        assert_eq!(request_lines(&requests).len(), 1);
    }

    #[tokio::test]
    async fn accepted_create_polls_location_until_it_settles() {
        let server = StubServer::bind().await;
        let client = server.client();
        let absolute_location = format!("{}/operations/1?attempt=2", server.base_url);
        let requests = server.serve(vec![
            reply("202 Accepted", &[("Location", "/operations/1")], ""),
            reply("202 Accepted", &[("Location", absolute_location.as_str())], ""),
            reply("200 OK", &[], r#"{"id":"/subscriptions/sub/resourcegroups/rg1","name":"rg1"}"#),
        ]);

        let group = client.create_resource_group("rg1", "westus").await.expect("group created");

        assert_eq!(group.id, "/subscriptions/sub/resourcegroups/rg1");
        assert_eq!(group.property(REGION), Some("westus"));
        let lines = request_lines(&requests);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("PUT /subscriptions/sub/resourcegroups/rg1?api-version=2022-09-01 "));
        assert!(lines[1].starts_with("GET /operations/1 "));
        assert!(lines[2].starts_with("GET /operations/1?attempt=2 "));
    }

    #[tokio::test]
    async fn polling_gives_up_after_the_attempt_limit() {
        let server = StubServer::bind().await;
        let mut client = server.client();
        client.max_poll_attempts = 2;
        let accepted = reply("202 Accepted", &[("Location", "/operations/1")], "");
        let requests = server.serve(vec![accepted.clone(), accepted.clone(), accepted]);

        let error = client.create_resource_group("rg1", "westus").await.expect_err("never settles");

        assert!(matches!(
            error.downcast_ref::<CloudError>(),
            Some(CloudError::PollingExhausted { attempts: 2, .. })
        ));
        assert_eq!(request_lines(&requests).len(), 3);
    }

    #[tokio::test]
    async fn delete_treats_not_found_as_released() {
        let server = StubServer::bind().await;
        let client = server.client();
        let requests = server.serve(vec![reply("404 Not Found", &[], r#"{"error":{"code":"ResourceGroupNotFound"}}"#)]);
        let group = ResourceHandle::new(ResourceKind::ResourceGroup, "/subscriptions/sub/resourcegroups/rg1", "rg1");

        client.delete(&group).await.expect("missing resource counts as released");

        let lines = request_lines(&requests);
        assert!(lines[0].starts_with("DELETE /subscriptions/sub/resourcegroups/rg1?api-version=2022-09-01 "));
    }

    #[tokio::test]
    async fn listing_follows_next_link_only_when_polled() {
        let server = StubServer::bind().await;
        let client = server.client();
        let first_page = format!(
            r#"{{"value":[{{"id":"/vms/vm1","name":"vm1"}}],"nextLink":"{}/vms?api-version=2023-09-01&skiptoken=abc"}}"#,
            server.base_url
        );
        let requests = server.serve(vec![
            reply("200 OK", &[], &first_page),
            reply("200 OK", &[], r#"{"value":[{"id":"/vms/vm2","name":"vm2"}]}"#),
        ]);
        let group = ResourceHandle::new(ResourceKind::ResourceGroup, "/subscriptions/sub/resourcegroups/rg1", "rg1");

        let machines = client.list_virtual_machines(&group);
        assert!(request_lines(&requests).is_empty());
        let machines: Vec<ResourceHandle> = machines.try_collect().await.expect("both pages");

        let ids: Vec<&str> = machines.iter().map(|machine| machine.id.as_str()).collect();
        assert_eq!(ids, vec!["/vms/vm1", "/vms/vm2"]);
        let lines = request_lines(&requests);
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("GET /vms?api-version=2023-09-01&skiptoken=abc "));
    }

    #[tokio::test]
    async fn identity_without_principal_id_is_an_invalid_response() {
        let server = StubServer::bind().await;
        let client = server.client();
        server.serve(vec![reply(
            "200 OK",
            &[],
            r#"{"id":"/identities/id1","name":"id1","properties":{"clientId":"client-1"}}"#,
        )]);
        let group = ResourceHandle::new(ResourceKind::ResourceGroup, "/subscriptions/sub/resourcegroups/rg1", "rg1")
            .with_property(REGION, "westus");

        let error = client.create_managed_identity("id1", &group).await.expect_err("incomplete identity");

        assert!(matches!(error.downcast_ref::<CloudError>(), Some(CloudError::InvalidResponse { .. })));
        assert!(error.to_string().contains("missing principalId"));
    }
}
