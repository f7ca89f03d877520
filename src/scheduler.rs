//! Talk to the batch scheduler through configured command templates
//!
//! The adapter turns intents (submit, query, cancel, look up) into shell commands for the
//! remote executor and parses what comes back. It keeps no state between calls.

use async_trait::async_trait;
use thiserror::Error;

use crate::remote::RemoteError;
use crate::submit::JobScript;
use crate::template::TemplateError;

/// Normalised job states and poll results
pub mod status;
/// Explicit parsers for scheduler output
pub mod parse;
/// Scheduler adapter driven by command templates
pub mod adapter;

pub use adapter::TemplateScheduler;
pub use status::{JobStatus, PollResult};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler unreachable: {0}")]
    Transport(String),

    #[error("scheduler command failed with status {exit_code}: {}", .stderr.trim())]
    Command {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("no job id in submission output: {raw:?}")]
    Submission { raw: String },

    #[error(transparent)]
    Template(#[from] TemplateError),
}

impl From<RemoteError> for SchedulerError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Transport { message, .. } => SchedulerError::Transport(message),
            RemoteError::Command { exit_code, stdout, stderr } => SchedulerError::Command { exit_code, stdout, stderr },
        }
    }
}

impl SchedulerError {
    pub fn is_transport(&self) -> bool {
        matches!(self, SchedulerError::Transport(_))
    }
}

#[async_trait]
pub trait BatchScheduler: Send + Sync {
    /// Upload and submit a batch script, returning the new job id
    async fn submit(&self, script: &JobScript) -> Result<String, SchedulerError>;

    /// Current status of a job, falling back to accounting once it left the queue
    async fn query(&self, job_id: &str) -> Result<PollResult, SchedulerError>;

    /// Best-effort cancel, a job that already finished is not an error
    async fn cancel(&self, job_id: &str) -> Result<(), SchedulerError>;

    /// Id of a live job with this name
    async fn lookup(&self, job_name: &str) -> Result<Option<String>, SchedulerError>;
}
