//! Behavioural tests for pass ordering, abort semantics and error messages.

use azrig::test_support::{CallLog, RecordingService, sample_machine, sample_skus};
use azrig::{AzureMachineService, Context, Operation, ServiceReconciler};
use rstest::rstest;

const CAUSE: &str = "some error happened";

fn names(count: usize) -> Vec<String> {
    (0..count).map(|index| format!("service-{index}")).collect()
}

#[rstest]
#[case(1, 0)]
#[case(3, 0)]
#[case(3, 1)]
#[case(3, 2)]
#[case(5, 3)]
fn reconcile_stops_at_first_failure(#[case] count: usize, #[case] failing: usize) {
    let scope = sample_machine();
    let skus = sample_skus();
    let log = CallLog::new();
    let services: Vec<Box<dyn ServiceReconciler>> = names(count)
        .into_iter()
        .enumerate()
        .map(|(index, name)| {
            let service = RecordingService::new(name, &log);
            if index == failing {
                service.failing(Operation::Reconcile, CAUSE).boxed()
            } else {
                service.boxed()
            }
        })
        .collect();
    let orchestrator = AzureMachineService::new(&scope, services, &skus);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");
    let err = runtime
        .block_on(orchestrator.reconcile(&Context::new()))
        .expect_err("reconcile should fail");

    let expected: Vec<String> = names(failing + 1)
        .into_iter()
        .map(|name| format!("{name}:reconcile"))
        .collect();
    assert_eq!(log.labels(), expected);
    assert_eq!(err.service(), format!("service-{failing}"));
}

#[tokio::test]
async fn delete_runs_in_reverse_and_stops_at_failure() {
    let scope = sample_machine();
    let skus = sample_skus();
    let log = CallLog::new();
    let orchestrator = AzureMachineService::new(
        &scope,
        vec![
            RecordingService::new("a", &log).boxed(),
            RecordingService::new("b", &log)
                .failing(Operation::Delete, CAUSE)
                .boxed(),
            RecordingService::new("c", &log).boxed(),
        ],
        &skus,
    );

    let result = orchestrator.delete(&Context::new()).await;

    assert!(result.is_err());
    assert_eq!(log.labels(), vec!["c:delete", "b:delete"]);
    assert_eq!(log.count("a", Operation::Delete), 0);
}

#[tokio::test]
async fn pause_skips_managers_without_the_capability() {
    let scope = sample_machine();
    let skus = sample_skus();
    let log = CallLog::new();
    let orchestrator = AzureMachineService::new(
        &scope,
        vec![
            RecordingService::new("a", &log).pausable().boxed(),
            RecordingService::new("b", &log).boxed(),
            RecordingService::new("c", &log).pausable().boxed(),
        ],
        &skus,
    );

    orchestrator
        .pause(&Context::new())
        .await
        .expect("pause should succeed");

    assert_eq!(log.labels(), vec!["a:pause", "c:pause"]);
}

#[tokio::test]
async fn every_pass_succeeds_when_all_managers_succeed() {
    let scope = sample_machine();
    let skus = sample_skus();
    let log = CallLog::new();
    let orchestrator = AzureMachineService::new(
        &scope,
        vec![
            RecordingService::new("a", &log).pausable().boxed(),
            RecordingService::new("b", &log).boxed(),
        ],
        &skus,
    );
    let ctx = Context::new();

    assert!(orchestrator.reconcile(&ctx).await.is_ok());
    assert!(orchestrator.pause(&ctx).await.is_ok());
    assert!(orchestrator.delete(&ctx).await.is_ok());
    assert_eq!(
        log.labels(),
        vec!["a:reconcile", "b:reconcile", "a:pause", "b:delete", "a:delete"]
    );
}

#[tokio::test]
async fn reconcile_error_uses_name_reported_after_failure() {
    let scope = sample_machine();
    let skus = sample_skus();
    let log = CallLog::new();
    let orchestrator = AzureMachineService::new(
        &scope,
        vec![
            RecordingService::new("one", &log).boxed(),
            RecordingService::new("two", &log)
                .failing(Operation::Reconcile, CAUSE)
                .renamed_after_failure("foo")
                .boxed(),
            RecordingService::new("three", &log).boxed(),
        ],
        &skus,
    );

    let err = orchestrator
        .reconcile(&Context::new())
        .await
        .expect_err("reconcile should fail");

    assert_eq!(
        err.to_string(),
        "failed to reconcile AzureMachine service foo: some error happened"
    );
    assert_eq!(log.count("three", Operation::Reconcile), 0);
}

#[tokio::test]
async fn pause_error_names_the_failing_manager() {
    let scope = sample_machine();
    let skus = sample_skus();
    let log = CallLog::new();
    let orchestrator = AzureMachineService::new(
        &scope,
        vec![
            RecordingService::new("one", &log).pausable().boxed(),
            RecordingService::new("two", &log)
                .failing(Operation::Pause, CAUSE)
                .pausable()
                .boxed(),
            RecordingService::new("three", &log).pausable().boxed(),
        ],
        &skus,
    );

    let err = orchestrator
        .pause(&Context::new())
        .await
        .expect_err("pause should fail");

    assert_eq!(
        err.to_string(),
        "failed to pause AzureMachine service two: some error happened"
    );
    assert_eq!(log.labels(), vec!["one:pause", "two:pause"]);
}

#[tokio::test]
async fn delete_error_names_the_failing_manager() {
    let scope = sample_machine();
    let skus = sample_skus();
    let log = CallLog::new();
    let orchestrator = AzureMachineService::new(
        &scope,
        vec![
            RecordingService::new("one", &log).boxed(),
            RecordingService::new("two", &log)
                .failing(Operation::Delete, CAUSE)
                .renamed_after_failure("test-service-two")
                .boxed(),
            RecordingService::new("three", &log).boxed(),
        ],
        &skus,
    );

    let err = orchestrator
        .delete(&Context::new())
        .await
        .expect_err("delete should fail");

    assert_eq!(
        err.to_string(),
        "failed to delete AzureMachine service test-service-two: some error happened"
    );
    assert_eq!(log.labels(), vec!["three:delete", "two:delete"]);
}

#[tokio::test]
async fn repeated_reconcile_calls_each_manager_once_per_pass() {
    let scope = sample_machine();
    let skus = sample_skus();
    let log = CallLog::new();
    let orchestrator = AzureMachineService::new(
        &scope,
        vec![
            RecordingService::new("one", &log).boxed(),
            RecordingService::new("two", &log).boxed(),
        ],
        &skus,
    );
    let ctx = Context::new();

    orchestrator.reconcile(&ctx).await.expect("first pass");
    assert_eq!(log.count("one", Operation::Reconcile), 1);
    assert_eq!(log.count("two", Operation::Reconcile), 1);

    orchestrator.reconcile(&ctx).await.expect("second pass");
    assert_eq!(log.count("one", Operation::Reconcile), 2);
    assert_eq!(log.count("two", Operation::Reconcile), 2);
}
