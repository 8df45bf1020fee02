//! Runs a plan and always tears down what it created.
//!
//! The orchestrator executes steps strictly in plan order. Each successful step's handle is
//! stored in the run context, and its release capability (if any) is recorded in the cleanup
//! registry. The first failure stops execution. Whether the plan completed, failed, or was
//! cancelled, the registry is then drained newest first and the whole run is summarized in a
//! [`RunReport`].
//!
//! The token is checked before every step and raced against the step in flight. A step
//! interrupted by cancellation is abandoned and reported as cancelled. Anything it had started to
//! create is not in the registry and is logged as needing manual cleanup.

use std::time::Instant;

use chrono::Utc;
use provisioner_types::{RunEvent, RunOutcome, RunPhase, RunReport, StepError, StepRecord, StepStatus, TeardownReport};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    context::ProvisioningContext,
    events::EventSink,
    plan::Plan,
    registry::CleanupRegistry,
    step::{ProvisioningStep, StepOutput},
};

/// Drives one run of a [`Plan`].
#[derive(Debug, Default)]
pub struct Orchestrator {
    cancellation: CancellationToken,
    events: EventSink,
    phase: RunPhase,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `token` as the run's cancellation signal.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Streams lifecycle events to `sender` while the run progresses.
    pub fn with_events(mut self, sender: UnboundedSender<RunEvent>) -> Self {
        self.events = EventSink::new(Some(sender));
        self
    }

    /// Token that cancels this run when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Executes `plan`, then tears down every resource it created.
    ///
    /// Never fails: step and release errors are reported in the returned [`RunReport`].
    pub async fn run(mut self, plan: Plan) -> RunReport {
        let started_at = Utc::now();
        let step_count = plan.len();
        info!(steps = step_count, "starting provisioning run");
        self.transition(RunPhase::Running);

        let mut context = ProvisioningContext::new();
        let mut registry = CleanupRegistry::new();
        let mut records = Vec::with_capacity(step_count);
        let mut outcome = RunOutcome::Completed;

        for (index, step) in plan.into_steps().into_iter().enumerate() {
            if self.cancellation.is_cancelled() {
                warn!(step_id = %step.id, "cancellation requested; skipping remaining steps");
                outcome = RunOutcome::failed(StepError::cancelled(&step.id));
                break;
            }

            let (record, result) = self.execute_step(index, &step, &context).await;
            self.events.emit(RunEvent::StepFinished { record: record.clone() });
            records.push(record);

            match result {
                Ok(output) => {
                    let StepOutput { handle, release, .. } = output;
                    if let Some(releaser) = release {
                        registry.record(&step.id, handle.clone(), releaser);
                    }
                    context.insert(&step.id, handle);
                }
                Err(step_error) => {
                    outcome = RunOutcome::failed(step_error);
                    break;
                }
            }
        }

        match &outcome {
            RunOutcome::Completed => {
                info!(steps = records.len(), "all steps succeeded");
                self.transition(RunPhase::Completed);
            }
            RunOutcome::Failed { step_id, error } => {
                error!(step_id = %step_id, error = %error, "run failed");
                self.transition(RunPhase::Failed);
            }
        }

        let teardown = self.teardown(registry).await;

        let finished_at = Utc::now();
        self.events.emit(RunEvent::RunFinished {
            outcome: outcome.clone(),
            finished_at,
        });

        RunReport {
            outcome,
            steps: records,
            teardown,
            phase: self.phase,
            started_at,
            finished_at,
        }
    }

    async fn execute_step(
        &self,
        index: usize,
        step: &ProvisioningStep,
        context: &ProvisioningContext,
    ) -> (StepRecord, Result<StepOutput, StepError>) {
        let started_at = Utc::now();
        info!(step_id = %step.id, index, "starting step");
        self.events.emit(RunEvent::StepStarted {
            index,
            step_id: step.id.clone(),
            description: step.description.clone(),
            started_at,
        });

        let clock = Instant::now();
        let result = match context.resolve(&step.id, &step.depends_on) {
            Ok(dependencies) => tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => {
                    warn!(
                        step_id = %step.id,
                        "cancellation requested; abandoning step in flight, anything it created needs manual cleanup"
                    );
                    Err(StepError::cancelled(&step.id))
                }
                result = step.action.execute(&dependencies) => {
                    result.map_err(|error| StepError::execution(&step.id, format!("{error:#}")))
                }
            },
            Err(missing) => Err(missing),
        };
        let duration_ms = clock.elapsed().as_millis().try_into().unwrap_or(u64::MAX);

        let record = match &result {
            Ok(output) => {
                info!(step_id = %step.id, resource_id = %output.handle.id, duration_ms, "step succeeded");
                let mut output_ids = vec![output.handle.id.clone()];
                output_ids.extend(output.detail_ids.iter().cloned());
                StepRecord {
                    step_id: step.id.clone(),
                    description: step.description.clone(),
                    status: StepStatus::Succeeded,
                    output_ids,
                    handle: Some(output.handle.clone()),
                    error: None,
                    started_at,
                    duration_ms,
                }
            }
            Err(step_error) => {
                error!(step_id = %step.id, error = %step_error, duration_ms, "step failed");
                StepRecord {
                    step_id: step.id.clone(),
                    description: step.description.clone(),
                    status: StepStatus::Failed,
                    output_ids: Vec::new(),
                    handle: None,
                    error: Some(step_error.to_string()),
                    started_at,
                    duration_ms,
                }
            }
        };

        (record, result)
    }

    async fn teardown(&mut self, registry: CleanupRegistry) -> TeardownReport {
        self.transition(RunPhase::TearingDown);
        info!(resources = registry.len(), "tearing down");
        let report = registry.teardown_with(&self.events).await;
        if report.is_clean() {
            info!(released = report.released.len(), "teardown finished");
        } else {
            warn!(
                released = report.released.len(),
                failed = report.failures.len(),
                "teardown finished with release failures; manual cleanup required"
            );
        }
        self.transition(RunPhase::Finished);
        report
    }

    fn transition(&mut self, next: RunPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal run phase transition {} -> {}",
            self.phase,
            next
        );
        debug!(from = %self.phase, to = %next, "run phase changed");
        self.phase = next;
        self.events.emit(RunEvent::PhaseChanged { phase: next });
    }
}
