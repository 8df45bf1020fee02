//! Human-readable rendering of a run report, and the redacted copy printed as JSON.

use std::fmt::Write as _;

use provisioner_types::{RunOutcome, RunReport, StepError, StepStatus};
use provisioner_util::redact_sensitive;

/// Renders the step log, the outcome, and every teardown failure.
pub fn render(report: &RunReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Step log");
    if report.steps.is_empty() {
        let _ = writeln!(out, "  (no steps executed)");
    }
    for record in &report.steps {
        let status = match record.status {
            StepStatus::Succeeded => "ok",
            StepStatus::Failed => "failed",
        };
        let _ = write!(out, "  [{status:<6}] {}", record.step_id);
        if let Some(description) = &record.description {
            let _ = write!(out, " - {description}");
        }
        let _ = writeln!(out, " ({} ms)", record.duration_ms);

        for id in &record.output_ids {
            let _ = writeln!(out, "           -> {id}");
        }
        if let Some(handle) = &record.handle {
            for (key, value) in &handle.properties {
                let _ = writeln!(out, "              {}", redact_sensitive(&format!("{key}={value}")));
            }
        }
        if let Some(error) = &record.error {
            let _ = writeln!(out, "           error: {}", redact_sensitive(error));
        }
    }

    match &report.outcome {
        RunOutcome::Completed => {
            let _ = writeln!(out, "Outcome: completed");
        }
        RunOutcome::Failed { step_id, error } => {
            let _ = writeln!(out, "Outcome: failed at step '{step_id}'");
            let _ = writeln!(out, "  {}", redact_sensitive(&error.to_string()));
        }
    }

    let teardown = &report.teardown;
    let _ = writeln!(out, "Teardown: released {} of {} resource(s)", teardown.released.len(), teardown.attempted());
    for failure in &teardown.failures {
        let _ = writeln!(out, "  release failed: {}", redact_sensitive(&failure.to_string()));
    }

    out
}

/// Copy of `report` with secrets masked in every free-text field.
pub fn redacted(report: &RunReport) -> RunReport {
    let mut report = report.clone();

    for record in &mut report.steps {
        if let Some(error) = &mut record.error {
            *error = redact_sensitive(error);
        }
        if let Some(handle) = &mut record.handle {
            for (key, value) in handle.properties.iter_mut() {
                let masked = redact_sensitive(&format!("{key}={value}"));
                *value = masked.strip_prefix(&format!("{key}=")).unwrap_or(&masked).to_string();
            }
        }
    }
    if let RunOutcome::Failed {
        error: StepError::Execution { message, .. },
        ..
    } = &mut report.outcome
    {
        *message = redact_sensitive(message);
    }
    for failure in &mut report.teardown.failures {
        failure.message = redact_sensitive(&failure.message);
    }

    report
}
