//! Field-selection export engine.
//!
//! Flattens a heterogeneous, nested record collection into a table with one
//! global, deterministic column order. The field-selection policy is an
//! allow-list of dotted paths per stage; stage declaration order in the
//! policy drives column grouping, so the policy type preserves it.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::record::CanonicalRecord;

/// Per-stage slice of the field-selection policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePolicy {
    pub name: String,
    pub enabled: bool,
    /// Dotted paths in declaration order; only `true` entries emit columns.
    pub fields: Vec<(String, bool)>,
}

/// User-declared allow-list controlling export flattening.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelection {
    pub stages: Vec<StagePolicy>,
}

impl FieldSelection {
    /// Parse a policy from its JSON object form:
    /// `{"<stage>": {"enabled": bool, "fields": {"dotted.path": bool}}}`.
    pub fn from_value(value: &Value) -> Result<Self> {
        let Some(map) = value.as_object() else {
            return Err(anyhow!("field selection must be a JSON object"));
        };
        let mut stages = Vec::with_capacity(map.len());
        for (name, entry) in map {
            let enabled = entry
                .get("enabled")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            let mut fields = Vec::new();
            if let Some(selected) = entry.get("fields").and_then(Value::as_object) {
                for (path, include) in selected {
                    fields.push((path.clone(), include.as_bool().unwrap_or(false)));
                }
            }
            stages.push(StagePolicy {
                name: name.clone(),
                enabled,
                fields,
            });
        }
        Ok(Self { stages })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read field selection {}", path.display()))?;
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("parse field selection {}", path.display()))?;
        Self::from_value(&value)
    }

    fn stage(&self, name: &str) -> Option<&StagePolicy> {
        self.stages.iter().find(|stage| stage.name == name)
    }
}

/// Fully-built flat table: one global column set, one row per record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Flatten enriched records into a column-ordered table.
///
/// Pure and deterministic: the same records and policy always produce the
/// same columns and values. Every row carries the full column set; a record
/// lacking a value leaves that cell empty.
pub fn flatten(records: &[CanonicalRecord], policy: &FieldSelection) -> FlatTable {
    let flat_records: Vec<BTreeMap<String, String>> = records
        .iter()
        .map(|record| flatten_record(record, policy))
        .collect();
    let columns = order_columns(&flat_records, records, policy);
    let rows = flat_records
        .iter()
        .map(|cells| {
            columns
                .iter()
                .map(|column| cells.get(column).cloned().unwrap_or_default())
                .collect()
        })
        .collect();
    FlatTable { columns, rows }
}

fn flatten_record(record: &CanonicalRecord, policy: &FieldSelection) -> BTreeMap<String, String> {
    let mut cells = BTreeMap::new();
    cells.insert("job_id".to_string(), record.job_id.clone());
    cells.insert("row_id".to_string(), record.row_id.to_string());
    // raw input is echoed unconditionally; field selection does not apply
    for (key, value) in &record.input {
        cells.insert(format!("input_{key}"), value.clone());
    }

    for (stage, outcome) in &record.services {
        let payload = outcome.as_value();
        if let Some(selection) = policy.stage(stage).filter(|selection| selection.enabled) {
            for (path, include) in &selection.fields {
                if !include {
                    continue;
                }
                if let Some(value) = resolve_path(&payload, path) {
                    let column = format!("{stage}_{}", path.replace('.', "_"));
                    flatten_value(&mut cells, &column, value);
                }
            }
        }
        // status is exempt from filtering, for observability
        if let Some(status) = payload.get("status") {
            cells.insert(format!("{stage}_status"), cell_text(status));
        }
    }
    cells
}

/// Descend the payload key-by-key. Unresolved or null paths yield nothing.
fn resolve_path<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

fn flatten_value(cells: &mut BTreeMap<String, String>, column: &str, value: &Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten_value(cells, &format!("{column}_{key}"), nested);
            }
        }
        Value::Null => {}
        other => {
            cells.insert(column.to_string(), cell_text(other));
        }
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Global column order: identity columns, input echo (alphabetical), then
/// per-stage groups — policy declaration order first, data-detected stages
/// absent from the policy appended alphabetically; inside a group the
/// `_status` column leads and the rest sort alphabetically. Unattributable
/// leftovers sort last.
fn order_columns(
    flat_records: &[BTreeMap<String, String>],
    records: &[CanonicalRecord],
    policy: &FieldSelection,
) -> Vec<String> {
    let mut columns = vec!["job_id".to_string(), "row_id".to_string()];

    let input_columns: BTreeSet<String> = flat_records
        .iter()
        .flat_map(|cells| cells.keys())
        .filter(|key| key.starts_with("input_"))
        .cloned()
        .collect();
    columns.extend(input_columns);

    let mut stage_order: Vec<String> = policy.stages.iter().map(|stage| stage.name.clone()).collect();
    let detected: BTreeSet<String> = records
        .iter()
        .flat_map(|record| record.services.keys().cloned())
        .collect();
    for stage in &detected {
        if !stage_order.contains(stage) {
            stage_order.push(stage.clone());
        }
    }

    let mut stage_columns: Vec<BTreeSet<String>> = vec![BTreeSet::new(); stage_order.len()];
    let mut leftovers: BTreeSet<String> = BTreeSet::new();
    for cells in flat_records {
        for key in cells.keys() {
            if key == "job_id" || key == "row_id" || key.starts_with("input_") {
                continue;
            }
            match stage_order
                .iter()
                .position(|stage| key.starts_with(&format!("{stage}_")))
            {
                Some(idx) => {
                    stage_columns[idx].insert(key.clone());
                }
                None => {
                    leftovers.insert(key.clone());
                }
            }
        }
    }

    for (stage, group) in stage_order.iter().zip(stage_columns) {
        let status_column = format!("{stage}_status");
        if group.contains(&status_column) {
            columns.push(status_column.clone());
        }
        columns.extend(group.into_iter().filter(|column| *column != status_column));
    }
    columns.extend(leftovers);
    columns
}

/// Write a flat table as CSV. Write-once; no append semantics.
pub fn write_csv(table: &FlatTable, path: &Path) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("create export {}", path.display()))?;
    writer.write_record(&table.columns).context("write header row")?;
    for row in &table.rows {
        writer.write_record(row).context("write data row")?;
    }
    writer.flush().context("flush export")?;
    tracing::info!(
        path = %path.display(),
        rows = table.rows.len(),
        columns = table.columns.len(),
        "export written"
    );
    Ok(())
}

#[cfg(test)]
#[path = "export_tests.rs"]
mod tests;
