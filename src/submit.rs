//! Render the batch script for the next job of a chain
//!
//! The script is a pure function of the chain, the checkpoint it continues from and the
//! resource request, so the same inputs always give byte-identical scripts.

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::Chain;
use crate::checkpoint::CheckpointRef;
use crate::remote::shell_quote;
use crate::scheduler::parse::{parse_wall_time, Parsed};
use crate::template::{render, TemplateError};

/// Directory under the simulation working directory holding scripts and scheduler logs
static JOB_DIR: &str = "jatko";

/// What every job of a chain asks the scheduler for
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// SLURM time string, e.g. `1-00:00:00`
    pub time: String,
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub nodes: Option<u32>,
    #[serde(default)]
    pub ntasks_per_node: Option<u32>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub exclude: Option<String>,
    /// Extra `#SBATCH` lines, without the prefix
    #[serde(default)]
    pub directives: Vec<String>,
}

impl ResourceRequest {
    /// Requested wall time in seconds, `None` when unlimited
    pub fn wall_time_secs(&self) -> Result<Option<u64>, BuildError> {
        match parse_wall_time(&self.time) {
            Parsed::Parsed(seconds) => Ok(seconds),
            Parsed::Malformed(raw) => Err(BuildError::WallTime(raw)),
        }
    }
}

/// A rendered batch script and where it goes on the cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobScript {
    /// Scheduler job name, `<chain>_<number>`
    pub name: String,
    pub path: String,
    pub log_dir: String,
    pub workdir: String,
    pub content: String,
    pub wall_time_secs: Option<u64>,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid wall time {0:?}")]
    WallTime(String),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Rendering context for the batch script
#[derive(Serialize)]
struct ScriptContext<'a> {
    name: String,
    log_dir: String,
    time: &'a str,
    partition: Option<&'a str>,
    nodes: Option<u32>,
    ntasks_per_node: Option<u32>,
    account: Option<&'a str>,
    exclude: Option<&'a str>,
    directives: &'a [String],
    chain: &'a str,
    chain_quoted: String,
    number: usize,
    continuation: u8,
    checkpoint_quoted: String,
    workdir_quoted: String,
    preload: Option<&'a str>,
    command: String,
}

/// Rendering context for the resume arguments
#[derive(Serialize)]
struct ResumeContext {
    checkpoint: String,
}

#[derive(Debug, Default, Clone)]
pub struct SubmissionBuilder;

impl SubmissionBuilder {
    pub fn new() -> Self {
        SubmissionBuilder
    }

    /// Render the script for the chain's next job
    ///
    /// With a checkpoint the job is a continuation: the checkpoint path is exported and the
    /// simulation's resume arguments are appended to its command line.
    pub fn build(&self, chain: &Chain, checkpoint: Option<&CheckpointRef>, resources: &ResourceRequest) -> Result<JobScript, BuildError> {
        /// included batch script template
        static JOB: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/job.sh"));

        let simulation = &chain.simulation;
        let number = chain.jobs.len() + 1;
        let name = chain.job_name(number);
        let workdir = simulation.workdir.trim_end_matches('/');
        let log_dir = format!("{workdir}/{JOB_DIR}");
        let wall_time_secs = resources.wall_time_secs()?;

        let mut command = simulation.executable.clone();
        if !simulation.args.trim().is_empty() {
            command.push(' ');
            command.push_str(simulation.args.trim());
        }
        if let (Some(checkpoint), Some(resume)) = (checkpoint, simulation.resume_args.as_deref()) {
            let context = ResumeContext { checkpoint: shell_quote(&checkpoint.path) };
            command.push(' ');
            command.push_str(render("resume", resume, &context)?.trim());
        }

        let context = ScriptContext {
            name: name.clone(),
            log_dir: log_dir.clone(),
            time: &resources.time,
            partition: resources.partition.as_deref(),
            nodes: resources.nodes,
            ntasks_per_node: resources.ntasks_per_node,
            account: resources.account.as_deref(),
            exclude: resources.exclude.as_deref(),
            directives: &resources.directives,
            chain: &chain.id,
            chain_quoted: shell_quote(&chain.id),
            number,
            continuation: u8::from(checkpoint.is_some()),
            checkpoint_quoted: shell_quote(checkpoint.map(|c| c.path.as_str()).unwrap_or("")),
            workdir_quoted: shell_quote(workdir),
            preload: simulation.preload.as_deref().filter(|p| !p.trim().is_empty()),
            command,
        };
        let content = render("job", JOB, &context)?;

        info!("Rendered script for {name} (continuation: {})", checkpoint.is_some());
        Ok(JobScript {
            path: format!("{log_dir}/{name}.job"),
            name,
            log_dir,
            workdir: workdir.to_string(),
            content,
            wall_time_secs,
        })
    }
}
