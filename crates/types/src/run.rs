//! Run lifecycle types shared by the engine and its callers.
//!
//! The orchestrator moves through [`RunPhase`]s, records a [`StepRecord`] per executed step,
//! and finishes with a [`RunReport`]. Callers that want live progress subscribe to
//! [`RunEvent`]s.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::handle::{ResourceHandle, ResourceKind};

/// Failure that stops a run.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepError {
    /// The step's remote call failed (quota, naming conflict, authorization, ...).
    #[error("step '{step_id}' failed: {message}")]
    Execution { step_id: String, message: String },

    /// A declared dependency had no handle in the run context.
    #[error("step '{step_id}' depends on '{dependency}' which has not been provisioned")]
    MissingDependency { step_id: String, dependency: String },

    /// Cancellation was observed before or while the step ran.
    #[error("run cancelled at step '{step_id}'")]
    Cancelled { step_id: String },
}

impl StepError {
    /// Create an execution error.
    pub fn execution(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            step_id: step_id.into(),
            message: message.into(),
        }
    }

    /// Create a missing dependency error.
    pub fn missing_dependency(step_id: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::MissingDependency {
            step_id: step_id.into(),
            dependency: dependency.into(),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(step_id: impl Into<String>) -> Self {
        Self::Cancelled { step_id: step_id.into() }
    }

    /// Identifier of the step the error is attributed to.
    pub fn step_id(&self) -> &str {
        match self {
            Self::Execution { step_id, .. } | Self::MissingDependency { step_id, .. } | Self::Cancelled { step_id } => step_id,
        }
    }
}

/// A release call that failed during teardown. Never fatal; collected for manual reconciliation.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("failed to release {kind} '{resource_id}' created by step '{step_id}': {message}")]
pub struct TeardownError {
    pub step_id: String,
    pub resource_id: String,
    pub kind: ResourceKind,
    pub message: String,
}

/// Lifecycle phase of a run.
///
/// `NotStarted -> Running -> {Completed, Failed} -> TearingDown -> Finished`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    #[default]
    NotStarted,
    Running,
    Completed,
    Failed,
    TearingDown,
    Finished,
}

impl RunPhase {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: RunPhase) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Completed, Self::TearingDown)
                | (Self::Failed, Self::TearingDown)
                | (Self::TearingDown, Self::Finished)
        )
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TearingDown => "tearing_down",
            Self::Finished => "finished",
        };
        f.write_str(label)
    }
}

/// Final result of the provisioning phase of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every step succeeded.
    Completed,
    /// The first failing step and its error.
    Failed { step_id: String, error: StepError },
}

impl RunOutcome {
    pub fn failed(error: StepError) -> Self {
        Self::Failed {
            step_id: error.step_id().to_string(),
            error,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Status of an executed step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
}

/// Observability record for one executed step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepRecord {
    pub step_id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: StepStatus,
    /// Identifiers the step produced (the handle id plus any it reports).
    #[serde(default)]
    pub output_ids: Vec<String>,
    /// The produced handle, when the step succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<ResourceHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Everything teardown did.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeardownReport {
    /// Resource identifiers released, in release order.
    pub released: Vec<String>,
    /// Release failures, in release order.
    pub failures: Vec<TeardownError>,
}

impl TeardownReport {
    /// Number of release calls issued.
    pub fn attempted(&self) -> usize {
        self.released.len() + self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Complete account of a run: the outcome, the step log, and the teardown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub steps: Vec<StepRecord>,
    pub teardown: TeardownReport,
    pub phase: RunPhase,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Process exit code for this report: 0 on completion, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.outcome.is_completed() { 0 } else { 1 }
    }
}

/// Lifecycle event streamed while a run progresses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    PhaseChanged {
        phase: RunPhase,
    },
    StepStarted {
        index: usize,
        step_id: String,
        description: Option<String>,
        started_at: DateTime<Utc>,
    },
    StepFinished {
        record: StepRecord,
    },
    ResourceReleased {
        step_id: String,
        resource_id: String,
    },
    ReleaseFailed {
        error: TeardownError,
    },
    RunFinished {
        outcome: RunOutcome,
        finished_at: DateTime<Utc>,
    },
}
