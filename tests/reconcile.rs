//! Submission-to-terminal run lifecycle through the reconciliation loop.

mod common;

use common::FakeExecutor;
use serde_json::Value;

use rowforge::executor::JobQuery;
use rowforge::monitor::poll_cycle;
use rowforge::run::{submit_run, JsonRunStore, PipelineRun, RunStatus, RunStore};

fn fresh_store() -> (tempfile::TempDir, JsonRunStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonRunStore::new(dir.path().join("runs.json"));
    (dir, store)
}

#[test]
fn run_advances_from_submission_to_completion() {
    let (_dir, store) = fresh_store();
    store.insert(&PipelineRun::new(1, 10)).unwrap();
    let executor = FakeExecutor::reporting(&["SUBMITTED", "RUNNING", "FINISHED"]);

    let job_id = submit_run(&store, &executor, 1, "enrich", &Value::Null, 100).unwrap();
    assert_eq!(job_id, "wb-1");
    assert_eq!(store.get(1).unwrap().unwrap().status, RunStatus::Submitted);

    // executor still says SUBMITTED: quiescent cycle, nothing written
    let report = poll_cycle(&store, &executor, 200).unwrap();
    assert_eq!(report.updated, 0);
    assert_eq!(store.get(1).unwrap().unwrap().started_at, Some(100));

    let report = poll_cycle(&store, &executor, 300).unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(store.get(1).unwrap().unwrap().status, RunStatus::Running);

    let report = poll_cycle(&store, &executor, 400).unwrap();
    assert_eq!(report.updated, 1);
    let run = store.get(1).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.completed_at, Some(400));

    // terminal run has left the active set for good
    assert!(store.active_runs().unwrap().is_empty());
}

#[test]
fn executor_failure_report_fails_the_run_with_its_message() {
    let (_dir, store) = fresh_store();
    store.insert(&PipelineRun::new(1, 10)).unwrap();
    let executor = FakeExecutor::new(
        vec![Ok("wb-9".to_string())],
        vec![Ok(JobQuery::Found {
            status: "ERROR".to_string(),
            error_message: Some("out of disk".to_string()),
        })],
    );

    submit_run(&store, &executor, 1, "enrich", &Value::Null, 100).unwrap();
    poll_cycle(&store, &executor, 200).unwrap();

    let run = store.get(1).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_message.as_deref(), Some("out of disk"));
    assert_eq!(run.completed_at, Some(200));
}

#[test]
fn terminal_jump_skips_running_entirely() {
    let (_dir, store) = fresh_store();
    store.insert(&PipelineRun::new(1, 10)).unwrap();
    let executor = FakeExecutor::reporting(&["cancelled"]);

    submit_run(&store, &executor, 1, "enrich", &Value::Null, 100).unwrap();
    poll_cycle(&store, &executor, 200).unwrap();

    assert_eq!(store.get(1).unwrap().unwrap().status, RunStatus::Cancelled);
}

#[test]
fn one_bad_run_never_stalls_the_cycle() {
    let (_dir, store) = fresh_store();
    for id in [1, 2] {
        store.insert(&PipelineRun::new(id, 10)).unwrap();
    }
    let executor = FakeExecutor::new(
        vec![Ok("wb-1".to_string()), Ok("wb-2".to_string())],
        vec![
            Ok(JobQuery::NotFound),
            Ok(JobQuery::Found {
                status: "IN_PROGRESS".to_string(),
                error_message: None,
            }),
        ],
    );

    submit_run(&store, &executor, 1, "enrich", &Value::Null, 100).unwrap();
    submit_run(&store, &executor, 2, "enrich", &Value::Null, 100).unwrap();

    let report = poll_cycle(&store, &executor, 200).unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(store.get(1).unwrap().unwrap().status, RunStatus::Submitted);
    assert_eq!(store.get(2).unwrap().unwrap().status, RunStatus::Running);
}

#[test]
fn failed_submission_is_terminal_and_never_polled() {
    let (_dir, store) = fresh_store();
    store.insert(&PipelineRun::new(1, 10)).unwrap();
    let executor = FakeExecutor::new(vec![Err(anyhow::anyhow!("executor down"))], vec![]);

    let err = submit_run(&store, &executor, 1, "enrich", &Value::Null, 100).unwrap_err();
    assert!(err.to_string().contains("submit run 1"), "{err}");

    let run = store.get(1).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_message.as_deref(), Some("executor down"));

    // no job handle, terminal state: the loop sees an empty active set
    let report = poll_cycle(&store, &executor, 200).unwrap();
    assert_eq!(report.checked, 0);
}
