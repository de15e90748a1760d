mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Command, RootArgs};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = RootArgs::parse();
    match &args.command {
        Command::Enrich(enrich) => commands::run_enrich(enrich),
        Command::Export(export) => commands::run_export(export),
        Command::Submit(submit) => commands::run_submit(submit),
        Command::Monitor(monitor) => commands::run_monitor_cmd(monitor),
        Command::Status(status) => commands::run_status(status),
    }
}
