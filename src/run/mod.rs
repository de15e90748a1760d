//! Pipeline-run lifecycle: state machine and persistence seam.
//!
//! A run is created, submitted once by the submission path, and thereafter
//! advanced only by the reconciliation loop. Terminal states accept no
//! further transitions.

mod submit;

pub use submit::submit_run;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;

/// Lifecycle states for one submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Created,
    Submitted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Whether the state machine permits `from -> to`. Self-transitions are
    /// not transitions; direct `SUBMITTED -> terminal` jumps are allowed when
    /// the executor reports a terminal state before RUNNING was observed.
    pub fn can_transition(from: RunStatus, to: RunStatus) -> bool {
        if from == to {
            return false;
        }
        match from {
            RunStatus::Created => matches!(to, RunStatus::Submitted | RunStatus::Failed),
            RunStatus::Submitted => matches!(
                to,
                RunStatus::Running | RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
            ),
            RunStatus::Running => to.is_terminal(),
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Created => "CREATED",
            RunStatus::Submitted => "SUBMITTED",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution mode of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineMode {
    Realtime,
    Batch,
}

/// Pipeline metadata, read-only from the core's perspective.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pipeline {
    pub id: u64,
    pub workflow_name: String,
    pub mode: PipelineMode,
    #[serde(default)]
    pub input_path_prefix: Option<String>,
    #[serde(default)]
    pub output_path_prefix: Option<String>,
    pub is_active: bool,
}

/// One submitted batch's lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineRun {
    pub id: u64,
    pub pipeline_id: u64,
    pub status: RunStatus,
    #[serde(default)]
    pub external_job_id: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub started_at: Option<u64>,
    #[serde(default)]
    pub completed_at: Option<u64>,
}

impl PipelineRun {
    pub fn new(id: u64, pipeline_id: u64) -> Self {
        Self {
            id,
            pipeline_id,
            status: RunStatus::Created,
            external_job_id: None,
            error_message: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply a status change, stamping `started_at` on submission and
    /// `completed_at` on terminal entry. Rejects transitions the state
    /// machine does not permit.
    pub fn transition(&mut self, to: RunStatus, now_ms: u64) -> Result<()> {
        if !RunStatus::can_transition(self.status, to) {
            return Err(anyhow!(
                "invalid transition {} -> {} for run {}",
                self.status,
                to,
                self.id
            ));
        }
        if to == RunStatus::Submitted {
            self.started_at = Some(now_ms);
        }
        if to.is_terminal() {
            self.completed_at = Some(now_ms);
        }
        self.status = to;
        Ok(())
    }
}

/// Persistence collaborator for run state. One read or write per call; no
/// multi-run transaction is needed because the submission path and the
/// reconciliation loop never write the same run concurrently.
pub trait RunStore {
    fn get(&self, id: u64) -> Result<Option<PipelineRun>>;
    fn insert(&self, run: &PipelineRun) -> Result<()>;
    /// Non-terminal runs carrying an external job handle — the only set the
    /// reconciliation loop ever sees.
    fn active_runs(&self) -> Result<Vec<PipelineRun>>;
    fn update(&self, run: &PipelineRun) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    pipelines: BTreeMap<u64, Pipeline>,
    #[serde(default)]
    runs: BTreeMap<u64, PipelineRun>,
}

/// JSON-file-backed run store.
///
/// Whole-file read/modify/write with a staged temp file and rename, so a
/// crashed write never truncates the store.
pub struct JsonRunStore {
    path: PathBuf,
}

impl JsonRunStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<StoreFile> {
        if !self.path.exists() {
            return Ok(StoreFile::default());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("read run store {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parse run store {}", self.path.display()))
    }

    fn save(&self, file: &StoreFile) -> Result<()> {
        let raw = serde_json::to_string_pretty(file).context("serialize run store")?;
        let staged = self.path.with_extension("json.tmp");
        fs::write(&staged, raw)
            .with_context(|| format!("stage run store {}", staged.display()))?;
        fs::rename(&staged, &self.path)
            .with_context(|| format!("commit run store {}", self.path.display()))?;
        Ok(())
    }

    /// Next unused run identifier.
    pub fn next_run_id(&self) -> Result<u64> {
        let file = self.load()?;
        Ok(file.runs.keys().max().copied().unwrap_or(0) + 1)
    }

    pub fn pipeline(&self, id: u64) -> Result<Option<Pipeline>> {
        Ok(self.load()?.pipelines.get(&id).cloned())
    }

    pub fn insert_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        let mut file = self.load()?;
        file.pipelines.insert(pipeline.id, pipeline.clone());
        self.save(&file)
    }
}

impl RunStore for JsonRunStore {
    fn get(&self, id: u64) -> Result<Option<PipelineRun>> {
        Ok(self.load()?.runs.get(&id).cloned())
    }

    fn insert(&self, run: &PipelineRun) -> Result<()> {
        let mut file = self.load()?;
        if file.runs.contains_key(&run.id) {
            return Err(anyhow!("run {} already exists", run.id));
        }
        file.runs.insert(run.id, run.clone());
        self.save(&file)
    }

    fn active_runs(&self) -> Result<Vec<PipelineRun>> {
        let file = self.load()?;
        Ok(file
            .runs
            .values()
            .filter(|run| !run.status.is_terminal() && run.external_job_id.is_some())
            .cloned()
            .collect())
    }

    fn update(&self, run: &PipelineRun) -> Result<()> {
        let mut file = self.load()?;
        if !file.runs.contains_key(&run.id) {
            return Err(anyhow!("run {} not found", run.id));
        }
        file.runs.insert(run.id, run.clone());
        self.save(&file)
    }
}
