//! Ordered provisioning plans.
//!
//! Steps run in the order they were added. A step may only depend on steps added before it, so
//! the insertion order is already a valid execution order and no graph analysis is needed.

use std::collections::HashSet;

use thiserror::Error;

use crate::step::ProvisioningStep;

/// Reasons a step is refused when added to a plan.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("duplicate step identifier detected: '{step_id}'")]
    DuplicateStep { step_id: String },

    #[error("step '{step_id}' cannot depend on itself")]
    SelfDependency { step_id: String },

    #[error("step '{step_id}' depends on '{dependency}' which is not an earlier step")]
    UnknownDependency { step_id: String, dependency: String },
}

impl PlanError {
    pub fn duplicate_step(step_id: impl Into<String>) -> Self {
        Self::DuplicateStep { step_id: step_id.into() }
    }

    pub fn self_dependency(step_id: impl Into<String>) -> Self {
        Self::SelfDependency { step_id: step_id.into() }
    }

    pub fn unknown_dependency(step_id: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::UnknownDependency {
            step_id: step_id.into(),
            dependency: dependency.into(),
        }
    }
}

/// An ordered sequence of steps whose dependencies all point backwards.
#[derive(Debug, Default)]
pub struct Plan {
    steps: Vec<ProvisioningStep>,
    known: HashSet<String>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `step` after validating its identifier and dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError`] for a duplicate identifier, a self-dependency, or a dependency on a
    /// step that has not been added yet.
    pub fn push(&mut self, step: ProvisioningStep) -> Result<(), PlanError> {
        if self.known.contains(step.id()) {
            return Err(PlanError::duplicate_step(step.id()));
        }
        for dependency in step.dependencies() {
            if dependency == step.id() {
                return Err(PlanError::self_dependency(step.id()));
            }
            if !self.known.contains(dependency) {
                return Err(PlanError::unknown_dependency(step.id(), dependency));
            }
        }
        self.known.insert(step.id().to_string());
        self.steps.push(step);
        Ok(())
    }

    /// Builder-style [`Plan::push`].
    pub fn with_step(mut self, step: ProvisioningStep) -> Result<Self, PlanError> {
        self.push(step)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(ProvisioningStep::id)
    }

    pub fn steps(&self) -> &[ProvisioningStep] {
        &self.steps
    }

    pub(crate) fn into_steps(self) -> Vec<ProvisioningStep> {
        self.steps
    }

    /// Plan that skips validation, for exercising the orchestrator's own dependency check.
    #[cfg(test)]
    pub(crate) fn unchecked(steps: Vec<ProvisioningStep>) -> Self {
        let known = steps.iter().map(|step| step.id().to_string()).collect();
        Self { steps, known }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepOutput;
    use provisioner_types::{ResourceHandle, ResourceKind};

    fn step(id: &str) -> ProvisioningStep {
        let handle = ResourceHandle::new(ResourceKind::ResourceGroup, format!("/rg/{id}"), id);
        ProvisioningStep::from_fn(id, move |_| {
            let handle = handle.clone();
            async move { Ok(StepOutput::observed(handle)) }
        })
    }

    #[test]
    fn keeps_insertion_order() {
        let plan = Plan::new()
            .with_step(step("a"))
            .and_then(|plan| plan.with_step(step("b").depends_on(["a"])))
            .and_then(|plan| plan.with_step(step("c").depends_on(["a", "b"])))
            .expect("valid plan");

        assert_eq!(plan.step_ids().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn rejects_duplicate_identifiers() {
        let mut plan = Plan::new();
        plan.push(step("a")).expect("first");
        assert_eq!(plan.push(step("a")).expect_err("duplicate"), PlanError::duplicate_step("a"));
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn rejects_forward_unknown_and_self_dependencies() {
        let mut plan = Plan::new();
        plan.push(step("a")).expect("first");

        let error = plan.push(step("b").depends_on(["c"])).expect_err("forward");
        assert_eq!(error, PlanError::unknown_dependency("b", "c"));

        let error = plan.push(step("b").depends_on(["b"])).expect_err("self");
        assert_eq!(error, PlanError::self_dependency("b"));

        assert_eq!(plan.step_ids().collect::<Vec<_>>(), vec!["a"]);
    }
}
