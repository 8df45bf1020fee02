//! Handles produced so far in a run.
//!
//! The [`ProvisioningContext`] maps step identifiers to the handle each successful step
//! produced. The orchestrator appends to it; steps only ever see a [`ResolvedDependencies`]
//! view restricted to what they declared.

use anyhow::{Result, anyhow, bail};
use indexmap::IndexMap;
use provisioner_types::{ResourceHandle, StepError};

/// Append-only map of step identifier to produced handle.
#[derive(Debug, Default, Clone)]
pub struct ProvisioningContext {
    handles: IndexMap<String, ResourceHandle>,
}

impl ProvisioningContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the handle produced by `step_id`. A step identifier is only ever recorded once;
    /// later inserts for the same identifier are ignored.
    pub(crate) fn insert(&mut self, step_id: &str, handle: ResourceHandle) {
        self.handles.entry(step_id.to_string()).or_insert(handle);
    }

    pub fn get(&self, step_id: &str) -> Option<&ResourceHandle> {
        self.handles.get(step_id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Collects the handles `step_id` declared, failing on the first one that is absent.
    pub fn resolve(&self, step_id: &str, depends_on: &[String]) -> Result<ResolvedDependencies, StepError> {
        let mut resolved = IndexMap::with_capacity(depends_on.len());
        for dependency in depends_on {
            let handle = self
                .handles
                .get(dependency)
                .ok_or_else(|| StepError::missing_dependency(step_id, dependency))?;
            resolved.insert(dependency.clone(), handle.clone());
        }
        Ok(ResolvedDependencies { handles: resolved })
    }
}

/// The dependency handles handed to one step action.
#[derive(Debug, Default, Clone)]
pub struct ResolvedDependencies {
    handles: IndexMap<String, ResourceHandle>,
}

impl ResolvedDependencies {
    /// Handle produced by `step_id`.
    ///
    /// # Errors
    ///
    /// Fails when the step did not declare `step_id` as a dependency.
    pub fn get(&self, step_id: &str) -> Result<&ResourceHandle> {
        self.handles
            .get(step_id)
            .ok_or_else(|| anyhow!("step '{step_id}' was not declared as a dependency"))
    }

    /// Property `key` of the handle produced by `step_id`.
    pub fn property(&self, step_id: &str, key: &str) -> Result<&str> {
        self.get(step_id)?.require_property(key)
    }

    /// Replaces `${{ steps.<step_id>.<field> }}` references in `template`.
    ///
    /// `<field>` is `id`, `name`, or any handle property key. Unknown steps and fields are
    /// errors rather than empty strings so a command never runs with a hole in it.
    pub fn interpolate(&self, template: &str) -> Result<String> {
        let mut rendered = String::with_capacity(template.len());
        let mut remainder = template;

        while let Some(start) = remainder.find("${{") {
            rendered.push_str(&remainder[..start]);
            let after_start = &remainder[start + 3..];
            let Some(end) = after_start.find("}}") else {
                bail!("unterminated template expression in '{template}'");
            };
            let expression = after_start[..end].trim();
            rendered.push_str(&self.lookup(expression)?);
            remainder = &after_start[end + 2..];
        }

        rendered.push_str(remainder);
        Ok(rendered)
    }

    fn lookup(&self, expression: &str) -> Result<String> {
        let Some(reference) = expression.strip_prefix("steps.") else {
            bail!("unsupported template expression '{expression}'");
        };
        let Some((step_id, field)) = reference.split_once('.') else {
            bail!("template expression '{expression}' must name a field");
        };
        let handle = self.get(step_id)?;
        let value = match field {
            "id" => handle.id.as_str(),
            "name" => handle.name.as_str(),
            key => handle.require_property(key)?,
        };
        Ok(value.to_string())
    }
}

impl FromIterator<(String, ResourceHandle)> for ResolvedDependencies {
    fn from_iter<T: IntoIterator<Item = (String, ResourceHandle)>>(iter: T) -> Self {
        Self {
            handles: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisioner_types::{ResourceKind, handle::CLIENT_ID};

    fn context() -> ProvisioningContext {
        let mut context = ProvisioningContext::new();
        context.insert("group", ResourceHandle::new(ResourceKind::ResourceGroup, "/rg/one", "one"));
        context.insert(
            "identity",
            ResourceHandle::new(ResourceKind::ManagedIdentity, "/rg/one/identities/id1", "id1").with_property(CLIENT_ID, "client-1"),
        );
        context
    }

    #[test]
    fn resolve_returns_declared_handles_only() {
        let resolved = context().resolve("vm", &["identity".to_string()]).expect("resolves");
        assert_eq!(resolved.get("identity").expect("identity").name, "id1");
        assert!(resolved.get("group").is_err());
    }

    #[test]
    fn resolve_reports_missing_dependency() {
        let error = context()
            .resolve("vm", &["group".to_string(), "network".to_string()])
            .expect_err("network absent");
        assert_eq!(error, StepError::missing_dependency("vm", "network"));
    }

    #[test]
    fn insert_never_replaces_an_existing_handle() {
        let mut context = context();
        context.insert("group", ResourceHandle::new(ResourceKind::ResourceGroup, "/rg/two", "two"));
        assert_eq!(context.get("group").expect("group").id, "/rg/one");
        assert_eq!(context.len(), 2);
    }

    #[test]
    fn interpolate_substitutes_step_fields() {
        let resolved = context()
            .resolve("cmd", &["group".to_string(), "identity".to_string()])
            .expect("resolves");
        let line = resolved
            .interpolate("dotnet run sub ${{ steps.group.name }} ${{steps.identity.client_id}}")
            .expect("renders");
        assert_eq!(line, "dotnet run sub one client-1");

        assert!(resolved.interpolate("echo ${{ steps.identity.principal_id }}").is_err());
        assert!(resolved.interpolate("echo ${{ env.HOME }}").is_err());
        assert!(resolved.interpolate("echo ${{ steps.group.id").is_err());
        assert_eq!(resolved.interpolate("plain").expect("no templates"), "plain");
    }
}
