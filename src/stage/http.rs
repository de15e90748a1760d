//! HTTP transport for enrichment stage calls.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use ureq::Agent;

use super::StageTransport;

/// ureq-backed transport. One agent per pipeline run; endpoints are
/// resolved by stage name.
pub struct HttpTransport {
    agent: Agent,
    endpoints: BTreeMap<String, String>,
}

impl HttpTransport {
    pub fn new(endpoints: BTreeMap<String, String>, timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: config.new_agent(),
            endpoints,
        }
    }
}

impl StageTransport for HttpTransport {
    fn call(&self, stage: &str, payload: &Value) -> Result<Value> {
        let endpoint = self
            .endpoints
            .get(stage)
            .ok_or_else(|| anyhow!("no endpoint configured for stage {stage}"))?;
        let mut response = self
            .agent
            .post(endpoint.as_str())
            .send_json(payload)
            .with_context(|| format!("call {endpoint}"))?;
        response
            .body_mut()
            .read_json::<Value>()
            .with_context(|| format!("decode response from {endpoint}"))
    }
}
