use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;

use crate::config::SchedulerTemplates;
use crate::remote::{shell_quote, Executor, RemoteError};
use crate::scheduler::parse::{parse_history_lookup, parse_history_state, parse_lookup, parse_queue_state, parse_submission, Parsed};
use crate::scheduler::{BatchScheduler, JobStatus, PollResult, SchedulerError};
use crate::submit::JobScript;
use crate::template::render;

/// Heredoc delimiter used to upload batch scripts
static SCRIPT_EOF: &str = "JATKO_SCRIPT_EOF";

/// Rendering context for query, history and cancel templates
#[derive(Serialize)]
struct JobContext {
    job_id: String,
}

/// Rendering context for the submit template
#[derive(Serialize)]
struct SubmitContext {
    script: String,
    workdir: String,
    name: String,
}

/// Rendering context for the lookup template
#[derive(Serialize)]
struct NameContext {
    name: String,
}

/// Scheduler adapter whose commands all come from configuration
///
/// Works against any dialect whose output the parsers in [crate::scheduler::parse] understand.
/// The default templates written by `jatko gen-config` target SLURM.
pub struct TemplateScheduler {
    executor: Arc<dyn Executor>,
    templates: SchedulerTemplates,
    submit_pattern: Regex,
    timeout: Duration,
}

impl TemplateScheduler {
    pub fn new(executor: Arc<dyn Executor>, templates: &SchedulerTemplates, timeout: Duration) -> Result<Self, regex::Error> {
        let submit_pattern = Regex::new(&templates.submit_pattern)?;
        Ok(TemplateScheduler { executor, templates: templates.clone(), submit_pattern, timeout })
    }

    fn job_command(&self, name: &str, template: &str, job_id: &str) -> Result<String, SchedulerError> {
        let context = JobContext { job_id: shell_quote(job_id) };
        Ok(render(name, template, &context)?)
    }

    /// Write the script to its remote path, creating the log directory on the way
    async fn upload(&self, script: &JobScript) -> Result<(), SchedulerError> {
        let mut content = script.content.clone();
        if !content.ends_with('\n') {
            content.push('\n');
        }
        let command = format!(
            "mkdir -p {dir} && cat > {path} <<'{SCRIPT_EOF}'\n{content}{SCRIPT_EOF}\n",
            dir = shell_quote(&script.log_dir),
            path = shell_quote(&script.path),
        );
        info!("Uploading batch script {}", script.path);
        self.executor.execute(&command, self.timeout).await?;
        Ok(())
    }

    async fn query_history(&self, job_id: &str) -> Result<PollResult, SchedulerError> {
        let command = self.job_command("history", &self.templates.history, job_id)?;

        match self.executor.execute(&command, self.timeout).await {
            Ok(output) => match parse_history_state(job_id, &output.stdout) {
                Parsed::Parsed(Some(raw)) => {
                    debug!("Accounting reports job {job_id} as {raw}");
                    Ok(PollResult::new(job_id, &raw))
                }
                Parsed::Parsed(None) => {
                    warn!("Job {job_id} is neither queued nor in accounting yet");
                    Ok(PollResult::unknown(job_id, ""))
                }
                Parsed::Malformed(raw) => {
                    warn!("Can't read accounting output for job {job_id}: {raw:?}");
                    Ok(PollResult::unknown(job_id, &raw))
                }
            },
            Err(err @ RemoteError::Transport { .. }) => Err(err.into()),
            Err(err) => {
                warn!("Accounting query for job {job_id} failed: {err}");
                Ok(PollResult::unknown(job_id, &err.to_string()))
            }
        }
    }
}

#[async_trait]
impl BatchScheduler for TemplateScheduler {
    async fn submit(&self, script: &JobScript) -> Result<String, SchedulerError> {
        self.upload(script).await?;

        let context = SubmitContext {
            script: shell_quote(&script.path),
            workdir: shell_quote(&script.workdir),
            name: shell_quote(&script.name),
        };
        let command = render("submit", &self.templates.submit, &context)?;
        info!("Submitting {}", script.name);
        // a dropped channel leaves it open whether sbatch ran, lookup settles that later
        let output = self.executor.execute_once(&command, self.timeout).await?;

        match parse_submission(&self.submit_pattern, &output.stdout) {
            Parsed::Parsed(job_id) => {
                info!("Scheduler accepted {} as job {job_id}", script.name);
                Ok(job_id)
            }
            Parsed::Malformed(raw) => {
                warn!("Can't parse a job id from submission output: {raw:?}");
                Err(SchedulerError::Submission { raw })
            }
        }
    }

    async fn query(&self, job_id: &str) -> Result<PollResult, SchedulerError> {
        let command = self.job_command("query", &self.templates.query, job_id)?;

        match self.executor.execute(&command, self.timeout).await {
            Ok(output) => match parse_queue_state(&output.stdout) {
                Parsed::Parsed(Some(raw)) => {
                    let poll = PollResult::new(job_id, &raw);
                    if poll.status != JobStatus::Unknown {
                        return Ok(poll);
                    }
                    debug!("Queue state {raw} for job {job_id} is not one we know, asking accounting");
                }
                Parsed::Parsed(None) => debug!("Job {job_id} has left the queue, asking accounting"),
                Parsed::Malformed(raw) => warn!("Unexpected queue output for job {job_id}: {raw:?}"),
            },
            Err(err @ RemoteError::Transport { .. }) => return Err(err.into()),
            Err(err) => debug!("Queue query for job {job_id} failed, asking accounting: {err}"),
        }

        self.query_history(job_id).await
    }

    async fn cancel(&self, job_id: &str) -> Result<(), SchedulerError> {
        let command = self.job_command("cancel", &self.templates.cancel, job_id)?;

        match self.executor.execute(&command, self.timeout).await {
            Ok(_) => {
                info!("Cancelled job {job_id}");
                Ok(())
            }
            Err(err @ RemoteError::Transport { .. }) => Err(err.into()),
            Err(err) => {
                warn!("Cancel of job {job_id} refused, it has probably finished already: {err}");
                Ok(())
            }
        }
    }

    async fn lookup(&self, job_name: &str) -> Result<Option<String>, SchedulerError> {
        let context = NameContext { name: shell_quote(job_name) };
        let command = render("lookup", &self.templates.lookup, &context)?;
        let output = self.executor.execute(&command, self.timeout).await?;

        match parse_lookup(&output.stdout) {
            Parsed::Parsed(Some(job_id)) => return Ok(Some(job_id)),
            Parsed::Parsed(None) => debug!("No queued job named {job_name}, asking accounting"),
            Parsed::Malformed(raw) => return Err(SchedulerError::Submission { raw }),
        }

        let command = render("lookup_history", &self.templates.lookup_history, &context)?;
        match self.executor.execute(&command, self.timeout).await {
            Ok(output) => match parse_history_lookup(&output.stdout) {
                Parsed::Parsed(found) => {
                    if let Some(job_id) = &found {
                        info!("Accounting knows {job_name} as job {job_id}");
                    }
                    Ok(found)
                }
                Parsed::Malformed(raw) => Err(SchedulerError::Submission { raw }),
            },
            Err(err @ RemoteError::Transport { .. }) => Err(err.into()),
            Err(err) => {
                warn!("Accounting lookup of {job_name} failed, assuming it was never submitted: {err}");
                Ok(None)
            }
        }
    }
}
