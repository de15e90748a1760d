//! Enrichment stage contract and runner.
//!
//! A stage is data, not code: a [`StageSpec`] names the stage, declares the
//! input fields it needs, builds one request fragment per record, and says
//! how a response entry is classified and projected back into the record.
//! [`run_stage`] applies one stage to a batch of canonical records through a
//! single external call with a fixed retry budget.
//!
//! Failure semantics: a record missing a required field is failed locally and
//! excluded from the call; retry exhaustion and a response cardinality
//! mismatch fail the whole invocation; everything else is recorded per
//! record, never raised.

pub mod catalog;
mod http;

pub use http::HttpTransport;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::record::{CanonicalRecord, StageOutcome};

/// Shared header carried on every external enrichment call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestHeader {
    pub tags: Vec<String>,
    #[serde(rename = "jobId")]
    pub job_id: String,
    #[serde(rename = "systemId", skip_serializing_if = "Option::is_none", default)]
    pub system_id: Option<String>,
}

impl RequestHeader {
    /// Header as one stage expects it: stages that take no system
    /// identifier must not receive one on the wire.
    fn for_stage(&self, stage: &StageSpec) -> RequestHeader {
        let mut header = self.clone();
        if !stage.wants_system_id {
            header.system_id = None;
        }
        header
    }
}

/// How a stage classifies one response entry as a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessRule {
    /// The entry carries an `output` key.
    OutputPresent,
    /// The entry's `status` field equals the token (case-insensitive).
    StatusEquals(&'static str),
}

/// Projection of a successful response entry into `services[stage]`.
#[derive(Debug, Clone, Copy)]
pub struct MergeRule {
    /// Keys copied from the response entry into the stored payload.
    pub copy_keys: &'static [&'static str],
    /// Status token forced onto the stored payload; `None` keeps the
    /// entry's own `status` value (copied via `copy_keys`).
    pub forced_status: Option<&'static str>,
}

/// Builds one external-request fragment from a record's input plus the
/// stage's static configuration (`Value::Null` when none was supplied).
pub type RequestBuilder = fn(&CanonicalRecord, &Value) -> Value;

/// One enrichment stage, fully described as data.
#[derive(Debug, Clone, Copy)]
pub struct StageSpec {
    pub name: &'static str,
    /// Uppercase token used in `meta.status` (`<LABEL>_COMPLETED` / `_FAILED`).
    pub status_label: &'static str,
    pub required_fields: &'static [&'static str],
    pub wants_system_id: bool,
    pub build_request: RequestBuilder,
    pub success_rule: SuccessRule,
    pub merge: MergeRule,
}

/// Per-stage tally for one invocation. `total` counts the original batch,
/// pre-validation failures included.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSummary {
    pub stage: String,
    pub success_count: usize,
    pub failure_count: usize,
    pub total: usize,
}

/// Retry budget for one stage invocation's external call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Transport seam for the external correction-service call.
///
/// Any transport-level failure (connect error, timeout, non-2xx status) is
/// an `Err`; the runner owns the retry policy.
pub trait StageTransport {
    fn call(&self, stage: &str, payload: &Value) -> Result<Value>;
}

/// Run one stage over a batch of records through a single external call.
///
/// Records failing pre-validation are marked failed and excluded from the
/// call. When no record survives pre-validation the stage returns without
/// calling out. The external response must contain exactly one entry per
/// eligible request, in submission order.
pub fn run_stage(
    transport: &dyn StageTransport,
    stage: &StageSpec,
    header: &RequestHeader,
    records: &mut [CanonicalRecord],
    config: &Value,
    retry: RetryPolicy,
) -> Result<JobSummary> {
    let total = records.len();
    if total == 0 {
        return Err(anyhow!("stage {}: empty record batch", stage.name));
    }
    let is_single = total == 1;

    // Pre-validation: a malformed row is failed locally so it cannot poison
    // an otherwise-successful batch.
    let mut fragments = Vec::new();
    let mut eligible = Vec::new();
    for (idx, record) in records.iter_mut().enumerate() {
        match missing_field(stage, record) {
            Some(field) => {
                record.record_outcome(
                    stage.name,
                    StageOutcome::failed(format!("{field} missing in input")),
                )?;
                record.set_status(format!("{}_FAILED", stage.status_label));
            }
            None => {
                fragments.push((stage.build_request)(record, config));
                eligible.push(idx);
            }
        }
    }

    if fragments.is_empty() {
        tracing::info!(
            stage = stage.name,
            total,
            "no eligible records, skipping external call"
        );
        return Ok(JobSummary {
            stage: stage.name.to_string(),
            success_count: 0,
            failure_count: total,
            total,
        });
    }

    let header = header.for_stage(stage);
    // A singleton batch keeps the single-object wire shape.
    let payload = if is_single {
        json!({ "header": header, "request": fragments[0] })
    } else {
        json!({ "header": header, "requests": fragments })
    };

    let response = call_with_retry(transport, stage, &payload, retry)?;

    let results: Vec<Value> = if is_single {
        vec![response]
    } else {
        match response {
            Value::Array(entries) => entries,
            other => vec![other],
        }
    };
    if results.len() != eligible.len() {
        return Err(anyhow!(
            "stage {}: external API returned {} results for {} requests",
            stage.name,
            results.len(),
            eligible.len()
        ));
    }

    let mut success_count = 0;
    let mut failure_count = total - eligible.len();
    for (idx, result) in eligible.into_iter().zip(results) {
        let record = &mut records[idx];
        if is_success(stage.success_rule, &result) {
            success_count += 1;
            record.record_outcome(stage.name, StageOutcome::Success(project(stage.merge, &result)))?;
            record.set_status(format!("{}_COMPLETED", stage.status_label));
        } else {
            failure_count += 1;
            let error = result
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("Unknown failure")
                .to_string();
            record.record_outcome(stage.name, StageOutcome::failed(error))?;
            record.set_status(format!("{}_FAILED", stage.status_label));
        }
    }

    let summary = JobSummary {
        stage: stage.name.to_string(),
        success_count,
        failure_count,
        total,
    };
    tracing::info!(
        stage = stage.name,
        success = summary.success_count,
        failure = summary.failure_count,
        total,
        "stage complete"
    );
    Ok(summary)
}

fn missing_field(stage: &StageSpec, record: &CanonicalRecord) -> Option<&'static str> {
    stage
        .required_fields
        .iter()
        .copied()
        .find(|field| !record.input.contains_key(*field))
}

fn call_with_retry(
    transport: &dyn StageTransport,
    stage: &StageSpec,
    payload: &Value,
    retry: RetryPolicy,
) -> Result<Value> {
    let attempts = retry.max_attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        match transport.call(stage.name, payload) {
            Ok(response) => return Ok(response),
            Err(err) => {
                tracing::warn!(
                    stage = stage.name,
                    attempt,
                    max_attempts = attempts,
                    error = %err,
                    "external call failed"
                );
                last_error = Some(err);
            }
        }
        if attempt < attempts {
            std::thread::sleep(retry.delay);
        }
    }
    let err = last_error.unwrap_or_else(|| anyhow!("no attempt was made"));
    Err(err).with_context(|| {
        format!(
            "stage {}: external API failed after {attempts} attempts",
            stage.name
        )
    })
}

fn is_success(rule: SuccessRule, entry: &Value) -> bool {
    match rule {
        SuccessRule::OutputPresent => entry.get("output").is_some(),
        SuccessRule::StatusEquals(token) => entry
            .get("status")
            .and_then(Value::as_str)
            .is_some_and(|status| status.eq_ignore_ascii_case(token)),
    }
}

fn project(merge: MergeRule, entry: &Value) -> Value {
    let mut payload = serde_json::Map::new();
    if let Some(status) = merge.forced_status {
        payload.insert("status".to_string(), Value::String(status.to_string()));
    }
    for key in merge.copy_keys {
        if let Some(value) = entry.get(*key) {
            payload.insert((*key).to_string(), value.clone());
        }
    }
    Value::Object(payload)
}

#[cfg(test)]
#[path = "stage_tests.rs"]
mod tests;
