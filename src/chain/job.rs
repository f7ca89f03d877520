use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointRef;
use crate::scheduler::JobStatus;

/// How a job ended, as far as the chain is concerned
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The scheduler finished it and the completion marker is there
    Success,
    Timeout,
    Failure,
    Cancelled,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Timeout => write!(f, "timeout"),
            Outcome::Failure => write!(f, "failure"),
            Outcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Position in the chain, starting at 1
    pub number: usize,
    pub job_id: String,
    pub name: String,
    pub submitted_at: DateTime<Utc>,
    /// `None` for an unlimited job
    pub wall_time_secs: Option<u64>,
    /// Last status the scheduler reported
    pub status: JobStatus,
    /// First poll that saw it running
    pub started_at: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    /// Set exactly once, when the job leaves ACTIVE
    pub outcome: Option<Outcome>,
    /// Checkpoint the job resumed from, `None` for a fresh start
    pub checkpoint: Option<CheckpointRef>,
}

impl Job {
    pub fn is_active(&self) -> bool {
        self.outcome.is_none()
    }

    /// Moment after which a job still believed running is declared timed out
    ///
    /// `None` when the job has not started, has no wall time, or the deadline lies beyond the
    /// representable calendar.
    pub fn deadline(&self, grace: Duration) -> Option<DateTime<Utc>> {
        let started = self.started_at?;
        let wall_time = Duration::from_std(std::time::Duration::from_secs(self.wall_time_secs?)).ok()?;
        started.checked_add_signed(wall_time)?.checked_add_signed(grace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn job() -> Job {
        Job {
            number: 1,
            job_id: "100".to_string(),
            name: "md_1".to_string(),
            submitted_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            wall_time_secs: Some(3_600),
            status: JobStatus::Pending,
            started_at: None,
            last_seen: None,
            outcome: None,
            checkpoint: None,
        }
    }

    #[test]
    fn test_no_deadline_before_running() {
        assert_eq!(job().deadline(Duration::minutes(10)), None);
    }

    #[test]
    fn test_deadline_counts_from_start() {
        let mut job = job();
        job.started_at = Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
        assert_eq!(
            job.deadline(Duration::minutes(10)),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 10, 0).unwrap())
        );
    }

    #[test]
    fn test_unlimited_job_has_no_deadline() {
        let mut job = job();
        job.started_at = Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
        job.wall_time_secs = None;
        assert_eq!(job.deadline(Duration::minutes(10)), None);
    }

    #[test]
    fn test_deadline_past_the_calendar_is_none() {
        let mut job = job();
        job.started_at = Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
        assert_eq!(job.deadline(Duration::seconds(10_000_000_000_000)), None);
        job.wall_time_secs = Some(u64::MAX);
        assert_eq!(job.deadline(Duration::minutes(10)), None);
    }
}
