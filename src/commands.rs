//! Subcommand implementations wiring config, transports, and the core.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use rowforge::config::load_config;
use rowforge::executor::HttpExecutor;
use rowforge::export::{flatten, write_csv, FieldSelection};
use rowforge::monitor::{run_monitor, SystemClock};
use rowforge::pipeline::run_pipeline;
use rowforge::record::{records_from_csv, load_records, write_records};
use rowforge::run::{submit_run, JsonRunStore, PipelineRun, RunStore};
use rowforge::stage::{catalog, HttpTransport, StageSpec};
use rowforge::util::now_epoch_ms;

use crate::cli::{EnrichArgs, ExportArgs, MonitorArgs, StatusArgs, SubmitArgs};

fn resolve_stages(spec: &str) -> Result<Vec<&'static StageSpec>> {
    spec.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            catalog::stage_by_name(name).ok_or_else(|| anyhow!("unknown stage: {name}"))
        })
        .collect()
}

fn load_json(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

pub fn run_enrich(args: &EnrichArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let stages = resolve_stages(&args.stages)?;
    if stages.is_empty() {
        return Err(anyhow!("no stages given"));
    }

    let stage_configs: BTreeMap<String, Value> = match &args.stage_config {
        Some(path) => {
            let value = load_json(path)?;
            let Some(map) = value.as_object() else {
                return Err(anyhow!("stage config must be a JSON object keyed by stage"));
            };
            map.iter().map(|(key, value)| (key.clone(), value.clone())).collect()
        }
        None => BTreeMap::new(),
    };

    let job_id = args
        .job_id
        .clone()
        .unwrap_or_else(|| format!("job-{}-{}", now_epoch_ms(), std::process::id()));
    let mut records = records_from_csv(&args.input, &args.workflow, &job_id)?;
    tracing::info!(job_id = %job_id, records = records.len(), "batch ingested");

    let transport = HttpTransport::new(config.stage_endpoints.clone(), config.timeout());
    let header = config.header(&job_id);
    let result = run_pipeline(
        &transport,
        &stages,
        &header,
        &mut records,
        &stage_configs,
        config.retry(),
    );
    // persist whatever was merged before a fatal stage error
    write_records(&args.out, &records)?;
    let summaries = result?;

    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}

pub fn run_export(args: &ExportArgs) -> Result<()> {
    let records = load_records(&args.records)?;
    let policy = match &args.selection {
        Some(path) => FieldSelection::load(path)?,
        None => FieldSelection::default(),
    };
    let table = flatten(&records, &policy);
    write_csv(&table, &args.out)
}

pub fn run_submit(args: &SubmitArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let store = JsonRunStore::new(&args.store);
    if let Some(pipeline) = store.pipeline(args.pipeline_id)? {
        if !pipeline.is_active {
            return Err(anyhow!("pipeline {} is not active", args.pipeline_id));
        }
    }

    let input = match &args.input {
        Some(path) => load_json(path)?,
        None => Value::Null,
    };
    let run_id = store.next_run_id()?;
    store.insert(&PipelineRun::new(run_id, args.pipeline_id))?;

    let executor = HttpExecutor::new(config.executor_url.clone(), config.timeout());
    let job_id = submit_run(
        &store,
        &executor,
        run_id,
        &args.job_name,
        &input,
        now_epoch_ms(),
    )?;

    println!(
        "{}",
        serde_json::json!({ "run_id": run_id, "job_id": job_id })
    );
    Ok(())
}

pub fn run_monitor_cmd(args: &MonitorArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let store = JsonRunStore::new(&args.store);
    let executor = HttpExecutor::new(config.executor_url.clone(), config.timeout());
    run_monitor(
        &store,
        &executor,
        &SystemClock,
        config.poll_interval(),
        args.max_cycles,
    )
}

pub fn run_status(args: &StatusArgs) -> Result<()> {
    let store = JsonRunStore::new(&args.store);
    let run = store
        .get(args.run_id)?
        .ok_or_else(|| anyhow!("run {} not found", args.run_id))?;
    println!("{}", serde_json::to_string_pretty(&run)?);
    Ok(())
}
