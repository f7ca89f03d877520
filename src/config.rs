//! Daemon configuration, read from a JSON file and validated against an embedded schema
//!
//! Every policy limit must be given explicitly. `jatko gen-config` writes a sample targeting
//! SLURM that can be edited from there.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::chain::Policy;
use crate::submit::ResourceRequest;
use crate::template::{render, TemplateError};

/// Embedded JSON schema and validation
pub mod schema;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read configuration {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("configuration is not valid JSON: {0}")]
    Decode(serde_json::Error),

    #[error("configuration schema is broken: {0}")]
    Schema(String),

    #[error("configuration fails validation: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("can't deserialise configuration: {0}")]
    Deserialise(serde_json::Error),

    #[error("invalid submission pattern: {0}")]
    Pattern(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("invalid wall time {0:?}")]
    WallTime(String),

    #[error("grace margin of {0}s is out of range")]
    GraceMargin(u64),
}

fn default_control_persist() -> u64 {
    600
}

fn default_connect_timeout() -> u64 {
    10
}

/// Where the scheduler lives and how to reach it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Login node, commands run locally when absent or `localhost`
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub identity_file: Option<String>,
    /// OpenSSH `ControlPath`, connection sharing is off without it
    #[serde(default)]
    pub control_path: Option<String>,
    #[serde(default = "default_control_persist")]
    pub control_persist_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl ClusterConfig {
    /// Host to ssh into, `None` means run commands on this machine
    pub fn remote_host(&self) -> Option<&str> {
        self.host.as_deref().map(str::trim).filter(|host| !host.is_empty() && *host != "localhost")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub command_timeout_secs: u64,
    /// Retries of transport failures after the first attempt
    pub max_retries: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

/// Scheduler command templates
///
/// `submit` sees `{script}`, `{workdir}` and `{name}`, `lookup` and `lookup_history` see `{name}`, the others see
/// `{job_id}`. All values are shell quoted before rendering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerTemplates {
    pub submit: String,
    /// Regular expression whose first capture group is the job id
    pub submit_pattern: String,
    pub query: String,
    pub history: String,
    pub cancel: String,
    /// Live queue by job name
    pub lookup: String,
    /// Accounting by job name, for jobs that ended while the daemon was down
    pub lookup_history: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Lists checkpoints as `<epoch seconds> <path>` lines, oldest first; sees `{workdir}` and `{pattern}`
    pub latest: String,
    /// File name glob of checkpoint files
    pub pattern: String,
    /// File in the simulation directory that forbids further continuations
    #[serde(default)]
    pub stop_marker: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub poll_interval_secs: u64,
    pub max_consecutive_failures: u32,
    pub max_chain_length: usize,
    pub grace_margin_secs: u64,
    pub max_submit_attempts: u32,
    pub max_inconclusive_polls: u32,
    /// Stop the daemon once every chain has ended
    #[serde(default)]
    pub exit_when_idle: bool,
}

impl PolicyConfig {
    pub fn policy(&self) -> Result<Policy, ConfigError> {
        let grace_margin = Duration::from_std(std::time::Duration::from_secs(self.grace_margin_secs))
            .map_err(|_| ConfigError::GraceMargin(self.grace_margin_secs))?;
        Ok(Policy {
            max_consecutive_failures: self.max_consecutive_failures,
            max_chain_length: self.max_chain_length,
            grace_margin,
            max_submit_attempts: self.max_submit_attempts,
            max_inconclusive_polls: self.max_inconclusive_polls,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub remote: RemoteConfig,
    pub scheduler: SchedulerTemplates,
    pub checkpoint: CheckpointConfig,
    pub policy: PolicyConfig,
    /// Default resource request for new chains
    pub resources: ResourceRequest,
    /// Holds the database and the pid lock
    pub state_dir: PathBuf,
}

impl Config {
    pub fn read(path: &Path) -> Result<Config, ConfigError> {
        info!("Reading configuration {}", path.display());
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Config::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Config, ConfigError> {
        let json: Value = serde_json::from_str(text).map_err(ConfigError::Decode)?;

        let compiled = schema::load_schema()?;
        if let Err(err) = schema::validate(&compiled, &json) {
            warn!("Configuration fails validation");
            return Err(err);
        }

        let config: Config = serde_json::from_value(json).map_err(ConfigError::Deserialise)?;
        config.check()?;
        Ok(config)
    }

    /// Checks the schema can't express: patterns compile, templates render, wall time parses
    fn check(&self) -> Result<(), ConfigError> {
        let pattern = Regex::new(&self.scheduler.submit_pattern).map_err(|err| ConfigError::Pattern(err.to_string()))?;
        if pattern.captures_len() < 2 {
            return Err(ConfigError::Pattern(format!("{:?} has no capture group for the job id", self.scheduler.submit_pattern)));
        }

        let job = json!({ "job_id": "1" });
        let submit = json!({ "script": "job.sh", "workdir": "/tmp", "name": "chain_1" });
        let name = json!({ "name": "chain_1" });
        let listing = json!({ "workdir": "/tmp", "pattern": "*" });
        render("submit", &self.scheduler.submit, &submit)?;
        render("query", &self.scheduler.query, &job)?;
        render("history", &self.scheduler.history, &job)?;
        render("cancel", &self.scheduler.cancel, &job)?;
        render("lookup", &self.scheduler.lookup, &name)?;
        render("lookup_history", &self.scheduler.lookup_history, &name)?;
        render("latest", &self.checkpoint.latest, &listing)?;

        self.resources.wall_time_secs().map_err(|_| ConfigError::WallTime(self.resources.time.clone()))?;
        self.policy.policy()?;
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Working configuration for a SLURM cluster reached over ssh
    pub fn sample() -> Config {
        Config {
            cluster: ClusterConfig {
                host: Some("login.cluster.example.org".to_string()),
                user: None,
                port: None,
                identity_file: None,
                control_path: Some("~/.ssh/jatko-%r@%h:%p".to_string()),
                control_persist_secs: default_control_persist(),
                connect_timeout_secs: default_connect_timeout(),
            },
            remote: RemoteConfig {
                command_timeout_secs: 60,
                max_retries: 3,
                backoff_initial_ms: 2_000,
                backoff_max_ms: 60_000,
            },
            scheduler: SchedulerTemplates {
                submit: "cd {workdir} && sbatch {script}".to_string(),
                submit_pattern: r"Submitted batch job (\d+)".to_string(),
                query: "squeue -h -j {job_id} -o %T".to_string(),
                history: "sacct -n -P -X -j {job_id} -o JobID,State".to_string(),
                cancel: "scancel {job_id}".to_string(),
                lookup: "squeue -h -n {name} -o %i".to_string(),
                lookup_history: "sacct -n -X -P -S now-30days --name {name} -o JobID".to_string(),
            },
            checkpoint: CheckpointConfig {
                latest: "find {workdir} -maxdepth 1 -type f -name {pattern} -print0 | xargs -0 -r stat -c '%Y %n' | sort -n | tail -n 1".to_string(),
                pattern: "*.cpt".to_string(),
                stop_marker: Some("NORESTART".to_string()),
            },
            policy: PolicyConfig {
                poll_interval_secs: 300,
                max_consecutive_failures: 2,
                max_chain_length: 100,
                grace_margin_secs: 900,
                max_submit_attempts: 3,
                max_inconclusive_polls: 6,
                exit_when_idle: false,
            },
            resources: ResourceRequest {
                time: "1-00:00:00".to_string(),
                partition: None,
                nodes: Some(1),
                ntasks_per_node: None,
                account: None,
                exclude: None,
                directives: Vec::new(),
            },
            state_dir: PathBuf::from("/var/lib/jatko"),
        }
    }
}
