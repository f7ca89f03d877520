use std::fmt;

use serde::{Deserialize, Serialize};

/// Scheduler job state, normalised
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    TimedOut,
    Failed,
    Cancelled,
    Unknown,
}

impl JobStatus {
    /// Map a SLURM state (long name or squeue short code) onto a status
    ///
    /// sacct prints cancellations as `CANCELLED by <uid>`, only the first word counts.
    pub fn from_scheduler(raw: &str) -> JobStatus {
        let state = raw.split_whitespace().next().unwrap_or("").trim_end_matches('+');
        match state.to_ascii_uppercase().as_str() {
            "PENDING" | "PD" | "CONFIGURING" | "CF" | "REQUEUED" | "RQ" | "REQUEUE_HOLD" | "RH"
            | "REQUEUE_FED" | "RF" | "RESV_DEL_HOLD" | "RD" | "SUSPENDED" | "S" => JobStatus::Pending,
            "RUNNING" | "R" | "COMPLETING" | "CG" | "STAGE_OUT" | "SO" | "SIGNALING" | "SI"
            | "RESIZING" | "RS" => JobStatus::Running,
            "COMPLETED" | "CD" => JobStatus::Completed,
            "TIMEOUT" | "TO" => JobStatus::TimedOut,
            "CANCELLED" | "CA" => JobStatus::Cancelled,
            "FAILED" | "F" | "BOOT_FAIL" | "BF" | "NODE_FAIL" | "NF" | "OUT_OF_MEMORY" | "OOM"
            | "DEADLINE" | "DL" | "PREEMPTED" | "PR" | "STOPPED" | "ST" | "REVOKED" | "RV"
            | "SPECIAL_EXIT" | "SE" => JobStatus::Failed,
            _ => JobStatus::Unknown,
        }
    }

    /// Completion marker decides between COMPLETED and FAILED for these
    pub fn needs_completion_evidence(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "PENDING"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::TimedOut => write!(f, "TIMED_OUT"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::Cancelled => write!(f, "CANCELLED"),
            JobStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// One answer from the scheduler about one job, consumed right away by the tracker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollResult {
    pub job_id: String,
    pub raw: String,
    pub status: JobStatus,
}

impl PollResult {
    pub fn new(job_id: &str, raw: &str) -> Self {
        PollResult { job_id: job_id.to_string(), raw: raw.to_string(), status: JobStatus::from_scheduler(raw) }
    }

    pub fn unknown(job_id: &str, raw: &str) -> Self {
        PollResult { job_id: job_id.to_string(), raw: raw.to_string(), status: JobStatus::Unknown }
    }
}
