//! Canonical record types flowing through the enrichment pipeline.
//!
//! A canonical record is one input row plus the per-stage outcomes
//! accumulated as the pipeline runs. The `services` map grows monotonically:
//! a stage's entry, once written, is never rewritten — [`CanonicalRecord::record_outcome`]
//! is the only mutation path and rejects a second write for the same key.

use anyhow::{anyhow, Context, Result};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::util::now_epoch_ms;

/// Outcome of one enrichment stage for one record.
///
/// Success keeps the stage's payload object verbatim (including the stage's
/// own `status` token and nested output); failure keeps only an error string.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Success(Value),
    Failed { error: String },
}

impl StageOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        StageOutcome::Failed {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success(_))
    }

    /// Wire-shape view of the outcome, as the export engine sees it.
    pub fn as_value(&self) -> Value {
        match self {
            StageOutcome::Success(payload) => payload.clone(),
            StageOutcome::Failed { error } => serde_json::json!({
                "status": "FAILED",
                "error": error,
            }),
        }
    }
}

impl Serialize for StageOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StageOutcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let is_failed = value
            .get("status")
            .and_then(Value::as_str)
            .is_some_and(|status| status == "FAILED");
        if is_failed {
            let error = value
                .get("error")
                .and_then(Value::as_str)
                .ok_or_else(|| DeError::custom("FAILED outcome without an error string"))?
                .to_string();
            return Ok(StageOutcome::Failed { error });
        }
        Ok(StageOutcome::Success(value))
    }
}

/// Record metadata. `workflow` and `created_at` are set at creation and
/// never change; `status` is last-writer-wins across stages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordMeta {
    pub workflow: String,
    pub status: String,
    pub created_at: u64,
}

/// One input row plus accumulated per-stage enrichment outcomes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalRecord {
    pub job_id: String,
    /// 1-based position within the batch; contiguous per `job_id`.
    pub row_id: u64,
    pub input: BTreeMap<String, String>,
    #[serde(default)]
    pub services: BTreeMap<String, StageOutcome>,
    pub meta: RecordMeta,
}

impl CanonicalRecord {
    pub fn new(
        job_id: impl Into<String>,
        row_id: u64,
        input: BTreeMap<String, String>,
        workflow: impl Into<String>,
        created_at: u64,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            row_id,
            input,
            services: BTreeMap::new(),
            meta: RecordMeta {
                workflow: workflow.into(),
                status: "CREATED".to_string(),
                created_at,
            },
        }
    }

    /// Write one stage's outcome. A key, once written, is never rewritten.
    pub fn record_outcome(&mut self, stage: &str, outcome: StageOutcome) -> Result<()> {
        if self.services.contains_key(stage) {
            return Err(anyhow!(
                "stage {stage} already recorded an outcome for row {}",
                self.row_id
            ));
        }
        self.services.insert(stage.to_string(), outcome);
        Ok(())
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.meta.status = status.into();
    }
}

/// Read input rows from a CSV file into canonical records.
///
/// Every cell is kept as a string; absent trailing cells become `""`.
pub fn records_from_csv(path: &Path, workflow: &str, job_id: &str) -> Result<Vec<CanonicalRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("open input csv {}", path.display()))?;
    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("read csv header from {}", path.display()))?
        .iter()
        .map(str::to_string)
        .collect();

    let created_at = now_epoch_ms();
    let mut records = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("read csv row {} from {}", idx + 1, path.display()))?;
        let input: BTreeMap<String, String> = headers
            .iter()
            .enumerate()
            .map(|(col, header)| (header.clone(), row.get(col).unwrap_or("").to_string()))
            .collect();
        records.push(CanonicalRecord::new(
            job_id,
            idx as u64 + 1,
            input,
            workflow,
            created_at,
        ));
    }

    tracing::info!(
        job_id,
        workflow,
        records = records.len(),
        "created canonical records"
    );
    Ok(records)
}

/// Load canonical records from a JSON file.
pub fn load_records(path: &Path) -> Result<Vec<CanonicalRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read records file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse records file {}", path.display()))
}

/// Write canonical records to a JSON file.
pub fn write_records(path: &Path, records: &[CanonicalRecord]) -> Result<()> {
    let raw = serde_json::to_string_pretty(records).context("serialize records")?;
    std::fs::write(path, raw).with_context(|| format!("write records file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record() -> CanonicalRecord {
        let input = BTreeMap::from([("email".to_string(), "a@b.com".to_string())]);
        CanonicalRecord::new("job-1", 1, input, "wf", 1_000)
    }

    #[test]
    fn outcome_written_at_most_once() {
        let mut record = sample_record();
        record
            .record_outcome("nameparse", StageOutcome::Success(json!({"status": "SUCCESS"})))
            .unwrap();
        let err = record
            .record_outcome("nameparse", StageOutcome::failed("again"))
            .unwrap_err();
        assert!(err.to_string().contains("already recorded"));
        // the first write survives
        assert!(record.services["nameparse"].is_success());
    }

    #[test]
    fn failed_outcome_wire_shape() {
        let outcome = StageOutcome::failed("email missing in input");
        assert_eq!(
            outcome.as_value(),
            json!({"status": "FAILED", "error": "email missing in input"})
        );
    }

    #[test]
    fn outcome_round_trips_through_json() {
        let success = StageOutcome::Success(json!({
            "status": "SUCCESS",
            "output": {"firstName": "John"}
        }));
        let raw = serde_json::to_string(&success).unwrap();
        assert_eq!(serde_json::from_str::<StageOutcome>(&raw).unwrap(), success);

        let failed = StageOutcome::failed("boom");
        let raw = serde_json::to_string(&failed).unwrap();
        assert_eq!(serde_json::from_str::<StageOutcome>(&raw).unwrap(), failed);
    }

    #[test]
    fn csv_rows_become_contiguous_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.csv");
        std::fs::write(&path, "name,email\nJohn Doe,j@d.com\nJane,\n").unwrap();

        let records = records_from_csv(&path, "wf", "job-9").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].row_id, 1);
        assert_eq!(records[1].row_id, 2);
        assert_eq!(records[0].input["name"], "John Doe");
        // empty cells are preserved as empty strings
        assert_eq!(records[1].input["email"], "");
        assert_eq!(records[1].meta.status, "CREATED");
        assert_eq!(records[1].job_id, "job-9");
    }
}
