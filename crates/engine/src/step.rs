//! Provisioning steps and what they produce.
//!
//! A [`ProvisioningStep`] pairs an identifier and its declared dependencies with a
//! [`StepAction`]. Actions receive only the handles they declared and return a [`StepOutput`]:
//! the new handle plus, for anything the cloud allocated, the capability that releases it.

use std::{fmt, future::Future, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use provisioner_types::ResourceHandle;

use crate::{context::ResolvedDependencies, registry::ResourceReleaser};

/// Result of a successful step.
pub struct StepOutput {
    pub handle: ResourceHandle,
    /// Present when the handle refers to something that must be released during teardown.
    pub release: Option<Arc<dyn ResourceReleaser>>,
    /// Additional identifiers the step observed, for example machines found by a listing.
    pub detail_ids: Vec<String>,
}

impl StepOutput {
    /// Output for a resource the run now owns and must release.
    pub fn owned(handle: ResourceHandle, releaser: Arc<dyn ResourceReleaser>) -> Self {
        Self {
            handle,
            release: Some(releaser),
            detail_ids: Vec::new(),
        }
    }

    /// Output that only describes something; teardown has nothing to do for it.
    pub fn observed(handle: ResourceHandle) -> Self {
        Self {
            handle,
            release: None,
            detail_ids: Vec::new(),
        }
    }

    pub fn with_detail_ids(mut self, ids: Vec<String>) -> Self {
        self.detail_ids = ids;
        self
    }
}

impl fmt::Debug for StepOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepOutput")
            .field("handle", &self.handle)
            .field("releasable", &self.release.is_some())
            .field("detail_ids", &self.detail_ids)
            .finish()
    }
}

/// The work a step performs.
#[async_trait]
pub trait StepAction: Send + Sync {
    /// Step identifiers whose handles this action reads.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    async fn execute(&self, dependencies: &ResolvedDependencies) -> Result<StepOutput>;
}

/// Adapts an async closure into a [`StepAction`].
pub struct FnAction<F> {
    action: F,
}

#[async_trait]
impl<F, Fut> StepAction for FnAction<F>
where
    F: Fn(ResolvedDependencies) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StepOutput>> + Send + 'static,
{
    async fn execute(&self, dependencies: &ResolvedDependencies) -> Result<StepOutput> {
        (self.action)(dependencies.clone()).await
    }
}

/// One unit of work in a plan. Immutable once added to a plan.
pub struct ProvisioningStep {
    pub(crate) id: String,
    pub(crate) description: Option<String>,
    pub(crate) depends_on: Vec<String>,
    pub(crate) action: Box<dyn StepAction>,
}

impl ProvisioningStep {
    /// Creates a step whose dependencies are those the action declares.
    pub fn new(id: impl Into<String>, action: impl StepAction + 'static) -> Self {
        let depends_on = action.dependencies();
        Self {
            id: id.into(),
            description: None,
            depends_on,
            action: Box::new(action),
        }
    }

    /// Creates a step from an async closure. Dependencies must be declared with
    /// [`ProvisioningStep::depends_on`].
    pub fn from_fn<F, Fut>(id: impl Into<String>, action: F) -> Self
    where
        F: Fn(ResolvedDependencies) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepOutput>> + Send + 'static,
    {
        Self::new(id, FnAction { action })
    }

    /// Adds dependencies on earlier steps. Duplicates are ignored.
    pub fn depends_on<I, S>(mut self, step_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for step_id in step_ids {
            let step_id = step_id.into();
            if !self.depends_on.contains(&step_id) {
                self.depends_on.push(step_id);
            }
        }
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }
}

impl fmt::Debug for ProvisioningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningStep")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}
