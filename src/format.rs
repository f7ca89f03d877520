use std::fmt;
use std::fmt::Write;

use clap::ValueEnum;
use serde::Serialize;

use crate::chain::{Chain, Phase, Summary};
use crate::scheduler::JobStatus;
use crate::store::DaemonState;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum StatusFormat {
    Table,
    Json,
}

impl fmt::Display for StatusFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StatusFormat::Table => write!(f, "table"),
            StatusFormat::Json => write!(f, "json"),
        }
    }
}

/// One line of `jatko status`
#[derive(Debug, Serialize)]
struct ChainStatus<'a> {
    chain: &'a str,
    summary: Summary,
    phase: Phase,
    jobs: usize,
    job_id: Option<&'a str>,
    job_status: Option<JobStatus>,
    checkpoint: Option<&'a str>,
    reason: Option<&'a str>,
}

impl<'a> From<&'a Chain> for ChainStatus<'a> {
    fn from(chain: &'a Chain) -> Self {
        let last = chain.last_job();
        ChainStatus {
            chain: &chain.id,
            summary: chain.summary(),
            phase: chain.phase,
            jobs: chain.jobs.len(),
            job_id: last.map(|job| job.job_id.as_str()),
            job_status: last.map(|job| job.status),
            checkpoint: chain.latest_checkpoint.as_ref().map(|c| c.path.as_str()),
            reason: chain.reason.as_deref(),
        }
    }
}

pub fn render_status(state: &DaemonState, format: StatusFormat) -> serde_json::Result<String> {
    let rows: Vec<ChainStatus> = state.chains.values().map(ChainStatus::from).collect();
    match format {
        StatusFormat::Json => serde_json::to_string_pretty(&rows),
        StatusFormat::Table => Ok(table(&rows)),
    }
}

fn table(rows: &[ChainStatus]) -> String {
    if rows.is_empty() {
        return "no chains\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(out, "{:<20} {:<10} {:<15} {:>4} {:<12} {:<10} {}", "CHAIN", "SUMMARY", "PHASE", "JOBS", "JOB", "STATUS", "DETAIL");
    for row in rows {
        let detail = row.reason.or(row.checkpoint).unwrap_or("-");
        let _ = writeln!(
            out,
            "{:<20} {:<10} {:<15} {:>4} {:<12} {:<10} {}",
            row.chain,
            row.summary.to_string(),
            row.phase.to_string(),
            row.jobs,
            row.job_id.unwrap_or("-"),
            row.job_status.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
            detail
        );
    }
    out
}
