//! Sequential stage composition over one canonical record set.
//!
//! Stages run strictly one after another, each consuming the full output of
//! the previous. A fatal stage error aborts the pipeline with the failing
//! stage named; outcomes already merged stay on the records for diagnostics.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::record::CanonicalRecord;
use crate::stage::{run_stage, JobSummary, RequestHeader, RetryPolicy, StageSpec, StageTransport};

pub fn run_pipeline(
    transport: &dyn StageTransport,
    stages: &[&'static StageSpec],
    header: &RequestHeader,
    records: &mut [CanonicalRecord],
    configs: &BTreeMap<String, Value>,
    retry: RetryPolicy,
) -> Result<Vec<JobSummary>> {
    let mut summaries = Vec::with_capacity(stages.len());
    for stage in stages {
        let config = configs.get(stage.name).cloned().unwrap_or(Value::Null);
        tracing::info!(stage = stage.name, records = records.len(), "running stage");
        let summary = run_stage(transport, stage, header, records, &config, retry)
            .with_context(|| format!("stage {} failed", stage.name))?;
        summaries.push(summary);
    }
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::StageOutcome;
    use crate::stage::catalog::{EMAIL_HYGIENE, NAMEPARSE};
    use anyhow::anyhow;
    use serde_json::json;
    use std::cell::RefCell;
    use std::time::Duration;

    struct SequenceTransport {
        responses: RefCell<Vec<Result<Value>>>,
    }

    impl StageTransport for SequenceTransport {
        fn call(&self, _stage: &str, _payload: &Value) -> Result<Value> {
            self.responses.borrow_mut().remove(0)
        }
    }

    fn record() -> CanonicalRecord {
        let input = BTreeMap::from([
            ("name".to_string(), "John Doe".to_string()),
            ("email".to_string(), "j@d.com".to_string()),
        ]);
        CanonicalRecord::new("job-1", 1, input, "wf", 0)
    }

    fn header() -> RequestHeader {
        RequestHeader {
            tags: vec![],
            job_id: "job-1".to_string(),
            system_id: None,
        }
    }

    const NO_DELAY: RetryPolicy = RetryPolicy {
        max_attempts: 1,
        delay: Duration::ZERO,
    };

    #[test]
    fn stages_run_in_order_over_the_same_records() {
        let transport = SequenceTransport {
            responses: RefCell::new(vec![
                Ok(json!({ "output": { "firstName": "John" } })),
                Ok(json!({ "status": "success", "input": "j@d.com", "details": {} })),
            ]),
        };
        let mut records = vec![record()];

        let summaries = run_pipeline(
            &transport,
            &[&NAMEPARSE, &EMAIL_HYGIENE],
            &header(),
            &mut records,
            &BTreeMap::new(),
            NO_DELAY,
        )
        .unwrap();

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].stage, "nameparse");
        assert_eq!(summaries[1].stage, "email_hygiene");
        assert_eq!(records[0].services.len(), 2);
        assert_eq!(records[0].meta.status, "EMAIL_HYGIENE_COMPLETED");
    }

    #[test]
    fn fatal_stage_error_names_the_stage_and_keeps_prior_merges() {
        let transport = SequenceTransport {
            responses: RefCell::new(vec![
                Ok(json!({ "output": {} })),
                Err(anyhow!("connection refused")),
            ]),
        };
        let mut records = vec![record()];

        let err = run_pipeline(
            &transport,
            &[&NAMEPARSE, &EMAIL_HYGIENE],
            &header(),
            &mut records,
            &BTreeMap::new(),
            NO_DELAY,
        )
        .unwrap_err();

        assert!(err.to_string().contains("stage email_hygiene failed"), "{err}");
        // the nameparse merge from before the fatal point survives
        assert!(matches!(
            records[0].services.get("nameparse"),
            Some(StageOutcome::Success(_))
        ));
        assert!(!records[0].services.contains_key("email_hygiene"));
    }
}
