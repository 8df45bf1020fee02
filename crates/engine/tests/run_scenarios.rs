use std::sync::Arc;

use provisioner_api::{CloudCapability, CloudOperation, InMemoryCloud};
use provisioner_engine::{
    Orchestrator, Plan, ProvisioningStep, SampleSettings,
    actions::{CreateManagedIdentity, CreateResourceGroup},
    managed_identity_vm_plan,
    sample::{CONTRIBUTOR_GRANT, IDENTITY, LIST_MACHINES, PRIMARY_GROUP, WORKLOAD_GROUP},
};
use provisioner_types::{RunEvent, RunOutcome, RunPhase, StepError, StepStatus};
use tokio::sync::mpsc::unbounded_channel;

const SIMULATED_GROUPS: &str = "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups";

fn group_step(cloud: &Arc<dyn CloudCapability>, name: &str) -> ProvisioningStep {
    ProvisioningStep::new(
        name,
        CreateResourceGroup {
            cloud: cloud.clone(),
            name: name.into(),
            region: "westus".into(),
        },
    )
}

fn shared(cloud: &Arc<InMemoryCloud>) -> Arc<dyn CloudCapability> {
    cloud.clone()
}

#[tokio::test]
async fn two_groups_complete_and_delete_newest_first() {
    let memory = Arc::new(InMemoryCloud::new());
    let cloud = shared(&memory);
    let plan = Plan::new()
        .with_step(group_step(&cloud, "rg1"))
        .and_then(|plan| plan.with_step(group_step(&cloud, "rg2")))
        .expect("valid plan");

    let report = Orchestrator::new().run(plan).await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(
        memory.deleted(),
        vec![format!("{SIMULATED_GROUPS}/rg2"), format!("{SIMULATED_GROUPS}/rg1")]
    );
    assert!(memory.live_resources().is_empty());
}

#[tokio::test]
async fn identity_quota_failure_deletes_only_the_group() {
    let memory = Arc::new(InMemoryCloud::new().fail_target("id1", "quota exceeded"));
    let cloud = shared(&memory);
    let identity = ProvisioningStep::new(
        "id1",
        CreateManagedIdentity {
            cloud: cloud.clone(),
            name: "id1".into(),
            resource_group_step: "rg1".into(),
        },
    );
    let plan = Plan::new()
        .with_step(group_step(&cloud, "rg1"))
        .and_then(|plan| plan.with_step(identity))
        .expect("valid plan");

    let report = Orchestrator::new().run(plan).await;

    match &report.outcome {
        RunOutcome::Failed { step_id, error } => {
            assert_eq!(step_id, "id1");
            assert!(error.to_string().contains("quota exceeded"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(report.exit_code(), 1);
    assert_eq!(memory.deleted(), vec![format!("{SIMULATED_GROUPS}/rg1")]);
    assert_eq!(report.teardown.released, vec![format!("{SIMULATED_GROUPS}/rg1")]);
}

#[tokio::test]
async fn release_failure_does_not_stop_older_releases() {
    let memory = Arc::new(InMemoryCloud::new().fail_delete("rg2", "resource is locked"));
    let cloud = shared(&memory);
    let mut plan = Plan::new();
    for name in ["rg1", "rg2", "rg3"] {
        plan.push(group_step(&cloud, name)).expect("valid step");
    }

    let report = Orchestrator::new().run(plan).await;

    assert!(report.outcome.is_completed());
    assert_eq!(report.teardown.attempted(), 3);
    assert_eq!(
        memory.deleted(),
        vec![format!("{SIMULATED_GROUPS}/rg3"), format!("{SIMULATED_GROUPS}/rg1")]
    );
    assert_eq!(report.teardown.failures.len(), 1);
    assert_eq!(report.teardown.failures[0].step_id, "rg2");
    assert!(report.teardown.failures[0].message.contains("resource is locked"));
}

#[tokio::test]
async fn failing_first_step_still_finishes() {
    let memory = Arc::new(InMemoryCloud::new().fail_operation(CloudOperation::CreateResourceGroup, "authorization failed"));
    let cloud = shared(&memory);
    let plan = Plan::new()
        .with_step(group_step(&cloud, "rg1"))
        .and_then(|plan| plan.with_step(group_step(&cloud, "rg2")))
        .expect("valid plan");

    let report = Orchestrator::new().run(plan).await;

    assert_eq!(report.phase, RunPhase::Finished);
    assert_eq!(report.steps.len(), 1);
    assert_eq!(report.teardown.attempted(), 0);
    assert!(memory.calls().iter().all(|call| call.operation != CloudOperation::Delete));
}

#[tokio::test]
async fn sample_plan_completes_and_leaves_nothing_behind() {
    let memory = Arc::new(InMemoryCloud::new());
    let settings = SampleSettings::generate("westus", "sub-1");
    let plan = managed_identity_vm_plan(shared(&memory), &settings).expect("valid plan");
    let (sender, mut receiver) = unbounded_channel();

    let report = Orchestrator::new().with_events(sender).run(plan).await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.steps.len(), 11);
    // Remote command and listing produce nothing to release.
    assert_eq!(report.teardown.released.len(), 9);
    assert!(memory.live_resources().is_empty());

    let remote_command = memory
        .calls()
        .into_iter()
        .find(|call| call.operation == CloudOperation::RunRemoteCommand)
        .expect("remote command issued");
    assert!(remote_command.target.contains(&settings.vm_name));
    let sent = memory.remote_commands();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].iter().all(|line| !line.contains("${{")));

    let listing = report.steps.iter().find(|record| record.step_id == LIST_MACHINES).expect("listing recorded");
    assert_eq!(listing.status, StepStatus::Succeeded);

    let mut finished = 0;
    while let Ok(event) = receiver.try_recv() {
        if let RunEvent::RunFinished { outcome, .. } = event {
            assert!(outcome.is_completed());
            finished += 1;
        }
    }
    assert_eq!(finished, 1);
}

#[tokio::test]
async fn sample_plan_role_failure_unwinds_groups_and_identity() {
    let memory = Arc::new(InMemoryCloud::new().fail_operation(CloudOperation::GrantRole, "not authorized"));
    let settings = SampleSettings::generate("westus", "sub-1").with_primary_group("rg-primary");
    let plan = managed_identity_vm_plan(shared(&memory), &settings).expect("valid plan");

    let report = Orchestrator::new().run(plan).await;

    assert!(matches!(
        &report.outcome,
        RunOutcome::Failed { step_id, error: StepError::Execution { .. } } if step_id == CONTRIBUTOR_GRANT
    ));
    let released_steps: Vec<&str> = report.steps.iter().take(3).map(|record| record.step_id.as_str()).collect();
    assert_eq!(released_steps, vec![PRIMARY_GROUP, WORKLOAD_GROUP, IDENTITY]);
    assert_eq!(report.teardown.released.len(), 3);
    assert!(report.teardown.released[0].contains("/identities/"));
    assert_eq!(report.teardown.released[2], format!("{SIMULATED_GROUPS}/rg-primary"));
    assert!(memory.live_resources().is_empty());
}

#[tokio::test]
async fn cancelled_token_skips_every_step_but_still_finishes() {
    let memory = Arc::new(InMemoryCloud::new());
    let settings = SampleSettings::generate("westus", "sub-1");
    let plan = managed_identity_vm_plan(shared(&memory), &settings).expect("valid plan");
    let orchestrator = Orchestrator::new();
    orchestrator.cancellation_token().cancel();

    let report = orchestrator.run(plan).await;

    assert_eq!(report.outcome, RunOutcome::failed(StepError::cancelled(PRIMARY_GROUP)));
    assert!(report.steps.is_empty());
    assert!(memory.calls().is_empty());
    assert_eq!(report.phase, RunPhase::Finished);
}
