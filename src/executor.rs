//! Client seam for the external batch job executor.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::time::Duration;
use ureq::Agent;

/// Result of one status query against the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobQuery {
    Found {
        status: String,
        error_message: Option<String>,
    },
    /// The executor no longer knows the job. Not a transport failure.
    NotFound,
}

/// Submission and status-query operations against the job executor.
pub trait JobExecutor {
    /// Submit a job and return the executor's handle for it.
    fn submit(&self, job_name: &str, input: &Value) -> Result<String>;
    fn status(&self, job_id: &str) -> Result<JobQuery>;
}

/// HTTP client for the job executor's REST surface.
pub struct HttpExecutor {
    agent: Agent,
    base_url: String,
}

impl HttpExecutor {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: config.new_agent(),
            base_url: base_url.into(),
        }
    }
}

impl JobExecutor for HttpExecutor {
    fn submit(&self, job_name: &str, input: &Value) -> Result<String> {
        let url = format!("{}/jobs", self.base_url);
        let mut response = self
            .agent
            .post(url.as_str())
            .send_json(serde_json::json!({ "name": job_name, "input": input }))
            .with_context(|| format!("submit job {job_name} to {url}"))?;
        let body: Value = response
            .body_mut()
            .read_json()
            .context("parse job submission response")?;
        // older executor builds answer with workbench_job_id
        body.get("job_id")
            .or_else(|| body.get("workbench_job_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("job submission response carried no job id: {body}"))
    }

    fn status(&self, job_id: &str) -> Result<JobQuery> {
        let url = format!("{}/jobs/{job_id}/status", self.base_url);
        let mut response = match self.agent.get(url.as_str()).call() {
            Ok(response) => response,
            Err(ureq::Error::StatusCode(404)) => return Ok(JobQuery::NotFound),
            Err(err) => {
                return Err(err).with_context(|| format!("query job {job_id} status"));
            }
        };
        let body: Value = response
            .body_mut()
            .read_json()
            .with_context(|| format!("parse status response for job {job_id}"))?;
        let status = body
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("status response for job {job_id} carried no status: {body}"))?
            .to_string();
        let error_message = body
            .get("error_message")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(JobQuery::Found {
            status,
            error_message,
        })
    }
}
