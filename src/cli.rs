//! Command-line surface.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "rowforge", version, about = "Record enrichment and export pipeline")]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest a CSV and run enrichment stages over it.
    Enrich(EnrichArgs),
    /// Flatten enriched records into a CSV export.
    Export(ExportArgs),
    /// Create a pipeline run and submit it to the job executor.
    Submit(SubmitArgs),
    /// Reconcile active run statuses against the job executor.
    Monitor(MonitorArgs),
    /// Show one run's state.
    Status(StatusArgs),
}

#[derive(Debug, Args)]
pub struct EnrichArgs {
    /// Input CSV with a header row.
    pub input: PathBuf,
    /// Workflow name stamped on every record.
    #[arg(long)]
    pub workflow: String,
    /// Comma-delimited stage names, run in the given order.
    #[arg(long)]
    pub stages: String,
    /// Job identifier; generated when omitted.
    #[arg(long)]
    pub job_id: Option<String>,
    /// Application config file (JSON).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Per-stage request config (JSON object keyed by stage name).
    #[arg(long)]
    pub stage_config: Option<PathBuf>,
    /// Where to write the enriched record set.
    #[arg(long)]
    pub out: PathBuf,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Enriched record set produced by `enrich`.
    pub records: PathBuf,
    /// Field-selection policy (JSON); everything-off when omitted.
    #[arg(long)]
    pub selection: Option<PathBuf>,
    /// Where to write the CSV export.
    #[arg(long)]
    pub out: PathBuf,
}

#[derive(Debug, Args)]
pub struct SubmitArgs {
    /// Run store file (JSON).
    #[arg(long)]
    pub store: PathBuf,
    #[arg(long)]
    pub pipeline_id: u64,
    /// Job name handed to the executor.
    #[arg(long)]
    pub job_name: String,
    /// Job input document (JSON); null when omitted.
    #[arg(long)]
    pub input: Option<PathBuf>,
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct MonitorArgs {
    /// Run store file (JSON).
    #[arg(long)]
    pub store: PathBuf,
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Stop after this many cycles; run forever when omitted.
    #[arg(long)]
    pub max_cycles: Option<u64>,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Run store file (JSON).
    #[arg(long)]
    pub store: PathBuf,
    pub run_id: u64,
}
