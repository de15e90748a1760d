//! One-shot submission of a created run to the external job executor.

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::executor::JobExecutor;
use crate::run::{RunStatus, RunStore};

/// Submit a `CREATED` run. On success the run carries the executor's job
/// handle and moves to `SUBMITTED`; on executor failure the run moves to
/// `FAILED` with the error message persisted, and the error propagates.
pub fn submit_run(
    store: &dyn RunStore,
    executor: &dyn JobExecutor,
    run_id: u64,
    job_name: &str,
    input: &Value,
    now_ms: u64,
) -> Result<String> {
    let mut run = store
        .get(run_id)?
        .ok_or_else(|| anyhow!("run {run_id} not found"))?;
    if run.status != RunStatus::Created {
        return Err(anyhow!(
            "run {run_id} is {}, only CREATED runs can be submitted",
            run.status
        ));
    }

    match executor.submit(job_name, input) {
        Ok(job_id) => {
            run.external_job_id = Some(job_id.clone());
            run.transition(RunStatus::Submitted, now_ms)?;
            store.update(&run)?;
            tracing::info!(run_id, job_id = %job_id, job_name, "run submitted");
            Ok(job_id)
        }
        Err(err) => {
            run.error_message = Some(err.to_string());
            run.transition(RunStatus::Failed, now_ms)?;
            store.update(&run)?;
            Err(err.context(format!("submit run {run_id}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::JobQuery;
    use crate::run::{JsonRunStore, PipelineRun};
    use std::cell::RefCell;

    struct FakeExecutor {
        responses: RefCell<Vec<Result<String>>>,
    }

    impl JobExecutor for FakeExecutor {
        fn submit(&self, _job_name: &str, _input: &Value) -> Result<String> {
            self.responses.borrow_mut().remove(0)
        }

        fn status(&self, _job_id: &str) -> Result<JobQuery> {
            Ok(JobQuery::NotFound)
        }
    }

    fn store_with_created_run() -> (tempfile::TempDir, JsonRunStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRunStore::new(dir.path().join("runs.json"));
        store.insert(&PipelineRun::new(1, 10)).unwrap();
        (dir, store)
    }

    #[test]
    fn successful_submission_records_handle_and_advances() {
        let (_dir, store) = store_with_created_run();
        let executor = FakeExecutor {
            responses: RefCell::new(vec![Ok("wb-42".to_string())]),
        };

        let job_id = submit_run(&store, &executor, 1, "enrich", &Value::Null, 500).unwrap();
        assert_eq!(job_id, "wb-42");

        let run = store.get(1).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Submitted);
        assert_eq!(run.external_job_id.as_deref(), Some("wb-42"));
        assert_eq!(run.started_at, Some(500));
    }

    #[test]
    fn executor_failure_fails_the_run_and_propagates() {
        let (_dir, store) = store_with_created_run();
        let executor = FakeExecutor {
            responses: RefCell::new(vec![Err(anyhow!("executor unavailable"))]),
        };

        let err = submit_run(&store, &executor, 1, "enrich", &Value::Null, 500).unwrap_err();
        assert!(err.to_string().contains("submit run 1"), "{err}");

        let run = store.get(1).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("executor unavailable"));
        assert_eq!(run.completed_at, Some(500));
    }

    #[test]
    fn non_created_run_is_rejected_before_any_call() {
        let (_dir, store) = store_with_created_run();
        let executor = FakeExecutor {
            responses: RefCell::new(vec![Ok("wb-1".to_string())]),
        };
        submit_run(&store, &executor, 1, "enrich", &Value::Null, 500).unwrap();

        let err = submit_run(&store, &executor, 1, "enrich", &Value::Null, 600).unwrap_err();
        assert!(err.to_string().contains("only CREATED runs"), "{err}");
    }
}
