//! Resources a run owns and how they are released.
//!
//! Every releasable handle a step produces is recorded in the [`CleanupRegistry`] in creation
//! order. [`CleanupRegistry::teardown`] consumes the registry, releasing newest first and
//! carrying on past individual failures.

use std::{fmt, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use provisioner_api::CloudCapability;
use provisioner_types::{ResourceHandle, RunEvent, TeardownError, TeardownReport};
use tracing::{info, warn};

use crate::events::EventSink;

/// Capability to release one kind of resource.
#[async_trait]
pub trait ResourceReleaser: Send + Sync {
    async fn release(&self, handle: &ResourceHandle) -> Result<()>;
}

/// Releases handles by identifier through a [`CloudCapability`].
#[derive(Clone)]
pub struct CloudReleaser {
    cloud: Arc<dyn CloudCapability>,
}

impl CloudReleaser {
    pub fn new(cloud: Arc<dyn CloudCapability>) -> Self {
        Self { cloud }
    }

    /// Shared releaser, ready to hand to a [`crate::StepOutput`].
    pub fn shared(cloud: &Arc<dyn CloudCapability>) -> Arc<dyn ResourceReleaser> {
        Arc::new(Self::new(Arc::clone(cloud)))
    }
}

#[async_trait]
impl ResourceReleaser for CloudReleaser {
    async fn release(&self, handle: &ResourceHandle) -> Result<()> {
        self.cloud.delete(handle).await
    }
}

/// A handle paired with the only capability able to release it.
pub struct OwnedResource {
    pub step_id: String,
    pub handle: ResourceHandle,
    releaser: Arc<dyn ResourceReleaser>,
}

impl fmt::Debug for OwnedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedResource")
            .field("step_id", &self.step_id)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Owned resources in creation order.
#[derive(Debug, Default)]
pub struct CleanupRegistry {
    entries: Vec<OwnedResource>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step_id: impl Into<String>, handle: ResourceHandle, releaser: Arc<dyn ResourceReleaser>) {
        self.entries.push(OwnedResource {
            step_id: step_id.into(),
            handle,
            releaser,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Releases every recorded resource, newest first.
    ///
    /// A failed release is logged and collected; it never stops the remaining releases.
    pub async fn teardown(self) -> TeardownReport {
        self.teardown_with(&EventSink::default()).await
    }

    pub(crate) async fn teardown_with(self, events: &EventSink) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.entries.is_empty() {
            info!("nothing to release");
            return report;
        }

        for entry in self.entries.into_iter().rev() {
            let OwnedResource { step_id, handle, releaser } = entry;
            match releaser.release(&handle).await {
                Ok(()) => {
                    info!(step_id = %step_id, resource_id = %handle.id, kind = %handle.kind, "released resource");
                    events.emit(RunEvent::ResourceReleased {
                        step_id: step_id.clone(),
                        resource_id: handle.id.clone(),
                    });
                    report.released.push(handle.id);
                }
                Err(error) => {
                    warn!(
                        step_id = %step_id,
                        resource_id = %handle.id,
                        kind = %handle.kind,
                        error = %format!("{error:#}"),
                        "failed to release resource"
                    );
                    let failure = TeardownError {
                        step_id,
                        resource_id: handle.id,
                        kind: handle.kind,
                        message: format!("{error:#}"),
                    };
                    events.emit(RunEvent::ReleaseFailed { error: failure.clone() });
                    report.failures.push(failure);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use provisioner_types::ResourceKind;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingReleaser {
        released: Mutex<Vec<String>>,
        refuse: Option<String>,
    }

    #[async_trait]
    impl ResourceReleaser for RecordingReleaser {
        async fn release(&self, handle: &ResourceHandle) -> Result<()> {
            self.released.lock().expect("lock").push(handle.id.clone());
            if self.refuse.as_deref() == Some(handle.id.as_str()) {
                bail!("locked by policy");
            }
            Ok(())
        }
    }

    fn group(name: &str) -> ResourceHandle {
        ResourceHandle::new(ResourceKind::ResourceGroup, format!("/rg/{name}"), name)
    }

    #[tokio::test]
    async fn releases_in_reverse_creation_order() {
        let releaser = Arc::new(RecordingReleaser::default());
        let mut registry = CleanupRegistry::new();
        for name in ["a", "b", "c"] {
            registry.record(name, group(name), releaser.clone());
        }

        let report = registry.teardown().await;

        assert_eq!(report.released, vec!["/rg/c", "/rg/b", "/rg/a"]);
        assert!(report.is_clean());
        assert_eq!(*releaser.released.lock().expect("lock"), vec!["/rg/c", "/rg/b", "/rg/a"]);
    }

    #[tokio::test]
    async fn failed_release_does_not_stop_older_releases() {
        let releaser = Arc::new(RecordingReleaser {
            refuse: Some("/rg/b".into()),
            ..Default::default()
        });
        let mut registry = CleanupRegistry::new();
        for name in ["a", "b", "c"] {
            registry.record(format!("step-{name}"), group(name), releaser.clone());
        }

        let report = registry.teardown().await;

        assert_eq!(report.attempted(), 3);
        assert_eq!(report.released, vec!["/rg/c", "/rg/a"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].step_id, "step-b");
        assert!(report.failures[0].message.contains("locked by policy"));
    }

    #[tokio::test]
    async fn empty_registry_is_a_no_op() {
        let report = CleanupRegistry::new().teardown().await;
        assert_eq!(report, TeardownReport::default());
    }
}
