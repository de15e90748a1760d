#![allow(dead_code)]

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;

use rowforge::executor::{JobExecutor, JobQuery};
use rowforge::record::CanonicalRecord;
use rowforge::stage::{RequestHeader, StageTransport};

/// Stage transport answering from a scripted response queue.
pub struct ScriptedTransport {
    responses: RefCell<Vec<Result<Value>>>,
    pub calls: RefCell<Vec<(String, Value)>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<Value>>) -> Self {
        Self {
            responses: RefCell::new(responses),
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl StageTransport for ScriptedTransport {
    fn call(&self, stage: &str, payload: &Value) -> Result<Value> {
        self.calls
            .borrow_mut()
            .push((stage.to_string(), payload.clone()));
        let mut responses = self.responses.borrow_mut();
        if responses.is_empty() {
            return Err(anyhow!("no scripted response left"));
        }
        responses.remove(0)
    }
}

/// Job executor answering submission and status queries from queues.
pub struct FakeExecutor {
    submissions: RefCell<Vec<Result<String>>>,
    statuses: RefCell<Vec<Result<JobQuery>>>,
}

impl FakeExecutor {
    pub fn new(submissions: Vec<Result<String>>, statuses: Vec<Result<JobQuery>>) -> Self {
        Self {
            submissions: RefCell::new(submissions),
            statuses: RefCell::new(statuses),
        }
    }

    pub fn reporting(statuses: &[&str]) -> Self {
        let statuses = statuses
            .iter()
            .map(|status| {
                Ok(JobQuery::Found {
                    status: status.to_string(),
                    error_message: None,
                })
            })
            .collect();
        Self::new(vec![Ok("wb-1".to_string())], statuses)
    }
}

impl JobExecutor for FakeExecutor {
    fn submit(&self, _job_name: &str, _input: &Value) -> Result<String> {
        self.submissions.borrow_mut().remove(0)
    }

    fn status(&self, _job_id: &str) -> Result<JobQuery> {
        self.statuses.borrow_mut().remove(0)
    }
}

pub fn record(job_id: &str, row_id: u64, fields: &[(&str, &str)]) -> CanonicalRecord {
    let input: BTreeMap<String, String> = fields
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    CanonicalRecord::new(job_id, row_id, input, "standard", 1_000)
}

pub fn header(job_id: &str) -> RequestHeader {
    RequestHeader {
        tags: vec!["batch".to_string()],
        job_id: job_id.to_string(),
        system_id: Some("sys-7".to_string()),
    }
}
