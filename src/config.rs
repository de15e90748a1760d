//! Application configuration: endpoints, retry budget, polling cadence.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::stage::{catalog, RequestHeader, RetryPolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Stage name to correction-service URL.
    pub stage_endpoints: BTreeMap<String, String>,
    pub executor_url: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub system_id: Option<String>,
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_timeout_secs() -> u64 {
    60
}

/// Local-stack defaults, used when no config file is given.
pub fn default_config() -> AppConfig {
    let stage_endpoints = catalog::ALL
        .iter()
        .map(|stage| {
            (
                stage.name.to_string(),
                format!("http://localhost:8000/{}/process", stage.name),
            )
        })
        .collect();
    AppConfig {
        stage_endpoints,
        executor_url: "http://localhost:8080".to_string(),
        poll_interval_secs: default_poll_interval_secs(),
        max_attempts: default_max_attempts(),
        retry_delay_secs: default_retry_delay_secs(),
        timeout_secs: default_timeout_secs(),
        tags: Vec::new(),
        system_id: None,
    }
}

pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parse config {}", path.display()))?
        }
        None => default_config(),
    };
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.executor_url.is_empty() {
        return Err(anyhow!("executor_url must not be empty"));
    }
    if config.stage_endpoints.is_empty() {
        return Err(anyhow!("stage_endpoints must not be empty"));
    }
    if config.max_attempts == 0 {
        return Err(anyhow!("max_attempts must be at least 1"));
    }
    for name in config.stage_endpoints.keys() {
        if catalog::stage_by_name(name).is_none() {
            return Err(anyhow!("unknown stage in stage_endpoints: {name}"));
        }
    }
    Ok(())
}

impl AppConfig {
    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            delay: Duration::from_secs(self.retry_delay_secs),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn header(&self, job_id: &str) -> RequestHeader {
        RequestHeader {
            tags: self.tags.clone(),
            job_id: job_id.to_string(),
            system_id: self.system_id.clone(),
        }
    }
}
