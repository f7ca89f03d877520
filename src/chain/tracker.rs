use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use thiserror::Error;

use crate::chain::{Chain, Job, Outcome, Phase};
use crate::checkpoint::CheckpointRef;
use crate::scheduler::{JobStatus, PollResult};

/// Limits a chain runs under, all taken from configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    pub max_consecutive_failures: u32,
    pub max_chain_length: usize,
    pub grace_margin: Duration,
    pub max_submit_attempts: u32,
    pub max_inconclusive_polls: u32,
}

/// Evidence gathered from the simulation directory once a job has ended
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub simulation_complete: bool,
    /// Newest checkpoint, if it is newer than the one the ended job resumed from
    pub new_checkpoint: Option<CheckpointRef>,
    pub restart_blocked: bool,
}

/// Something that happened to a chain, for the loop to act on and log
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// The active job was seen running for the first time
    Started { job_id: String },
    /// The active job ended, `cancel` asks for a best-effort cancel of a job the scheduler may still hold
    Finished { job_id: String, outcome: Outcome, cancel: bool },
    Resubmit { checkpoint: Option<CheckpointRef> },
    Done,
    Aborted { reason: String },
    Submitted { job_id: String },
    SubmissionFailed { attempts: u32 },
    Inconclusive { count: u32 },
}

/// Whether the loop may submit the next job of a chain
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    Proceed { job_name: String },
    /// An earlier submission of this job may have reached the scheduler, look it up first
    Recover { job_name: String },
    Refused(Transition),
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain {id} is {phase}, expected {expected}")]
    WrongPhase { id: String, phase: Phase, expected: Phase },
}

/// The only code that mutates chains and their jobs
///
/// Every method takes the current time explicitly, so replaying the same observations on the
/// same snapshot always ends in the same state.
#[derive(Clone, Debug)]
pub struct Tracker {
    policy: Policy,
}

impl Tracker {
    pub fn new(policy: Policy) -> Self {
        Tracker { policy }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Apply one poll result to the chain's active job
    ///
    /// `simulation_complete` is the completion marker check, needed when the scheduler reports
    /// COMPLETED or FAILED. Results for anything but the active job of an ACTIVE chain are ignored.
    pub fn observe(&self, chain: &mut Chain, poll: &PollResult, simulation_complete: Option<bool>, now: DateTime<Utc>) -> Option<Transition> {
        if chain.phase != Phase::Active {
            debug!("Ignoring {} for chain {} in phase {}", poll.job_id, chain.id, chain.phase);
            return None;
        }
        if chain.active_job().map(|job| job.job_id.as_str()) != Some(poll.job_id.as_str()) {
            debug!("Ignoring stale result for job {} in chain {}", poll.job_id, chain.id);
            return None;
        }
        // COMPLETED cannot be classified without the completion marker
        if poll.status == JobStatus::Unknown || (poll.status == JobStatus::Completed && simulation_complete.is_none()) {
            return self.inconclusive(chain, now);
        }

        let id = chain.id.clone();
        if let Some(job) = chain.active_job_mut() {
            // a requeued job gets a fresh wall time once it runs again
            if job.status == JobStatus::Running && poll.status == JobStatus::Pending && job.started_at.is_some() {
                info!("Job {} of chain {id} was requeued", job.job_id);
                job.started_at = None;
            }
            job.status = poll.status;
            job.last_seen = Some(now);
        }
        chain.inconclusive_polls = 0;
        chain.updated_at = now;

        match poll.status {
            JobStatus::Pending => self.check_deadline(chain, now),
            JobStatus::Running => {
                if let Some(job) = chain.active_job_mut().filter(|job| job.started_at.is_none()) {
                    job.started_at = Some(now);
                    info!("Job {} of chain {id} is running", job.job_id);
                    return Some(Transition::Started { job_id: job.job_id.clone() });
                }
                self.check_deadline(chain, now)
            }
            // marker is authoritative for telling success from failure
            JobStatus::Completed | JobStatus::Failed => {
                let outcome = match simulation_complete {
                    Some(true) => Outcome::Success,
                    _ => Outcome::Failure,
                };
                Some(self.finish(chain, outcome, false, now))
            }
            JobStatus::TimedOut => Some(self.finish(chain, Outcome::Timeout, false, now)),
            JobStatus::Cancelled => Some(self.finish(chain, Outcome::Cancelled, false, now)),
            JobStatus::Unknown => None,
        }
    }

    /// A poll produced no usable status for the active job
    ///
    /// A job past its deadline still times out. Otherwise the miss is counted, and one miss
    /// over the limit fails the job.
    pub fn inconclusive(&self, chain: &mut Chain, now: DateTime<Utc>) -> Option<Transition> {
        if chain.phase != Phase::Active {
            return None;
        }
        if let Some(transition) = self.check_deadline(chain, now) {
            return Some(transition);
        }

        chain.inconclusive_polls += 1;
        chain.updated_at = now;
        let count = chain.inconclusive_polls;
        if count > self.policy.max_inconclusive_polls {
            warn!("Chain {}: {count} inconclusive polls in a row, giving up on the job", chain.id);
            return Some(self.finish(chain, Outcome::Failure, true, now));
        }
        warn!("Chain {}: inconclusive poll {count} of {}", chain.id, self.policy.max_inconclusive_polls);
        Some(Transition::Inconclusive { count })
    }

    /// Time out a job that was seen running and has outlived wall time plus grace margin
    pub fn check_deadline(&self, chain: &mut Chain, now: DateTime<Utc>) -> Option<Transition> {
        if chain.phase != Phase::Active {
            return None;
        }
        let deadline = chain.active_job()?.deadline(self.policy.grace_margin)?;
        if now <= deadline {
            return None;
        }
        warn!("Chain {}: active job is past its deadline {deadline}", chain.id);
        Some(self.finish(chain, Outcome::Timeout, true, now))
    }

    /// Decide what follows a finished job
    pub fn resolve(&self, chain: &mut Chain, resolution: &Resolution, now: DateTime<Utc>) -> Option<Transition> {
        if !chain.phase.awaits_resolution() {
            return None;
        }

        match chain.phase {
            Phase::Completed => Some(self.done(chain, now)),
            Phase::Cancelled => {
                let job_id = chain.last_job().map(|job| job.job_id.clone()).unwrap_or_default();
                Some(self.abort(chain, format!("job {job_id} was cancelled outside jatko"), now))
            }
            _ if resolution.simulation_complete => Some(self.done(chain, now)),
            _ if resolution.restart_blocked => Some(self.abort(chain, "stop marker present".to_string(), now)),
            _ if chain.consecutive_failures > self.policy.max_consecutive_failures => {
                let reason = format!("{} consecutive failures", chain.consecutive_failures);
                Some(self.abort(chain, reason, now))
            }
            _ => {
                let resumed_from = chain.last_job().and_then(|job| job.checkpoint.clone());
                match &resolution.new_checkpoint {
                    Some(checkpoint) if checkpoint.is_newer_than(resumed_from.as_ref()) => {
                        if chain.jobs.len() >= self.policy.max_chain_length {
                            let reason = format!("chain length limit of {} reached", self.policy.max_chain_length);
                            return Some(self.abort(chain, reason, now));
                        }
                        info!("Chain {} continues from {}", chain.id, checkpoint.path);
                        chain.latest_checkpoint = Some(checkpoint.clone());
                        chain.phase = Phase::PendingSubmit;
                        chain.submit_attempts = 0;
                        chain.updated_at = now;
                        Some(Transition::Resubmit { checkpoint: Some(checkpoint.clone()) })
                    }
                    _ => Some(self.abort(chain, "no checkpoint progress".to_string(), now)),
                }
            }
        }
    }

    /// Check a PENDING_SUBMIT chain may get another job and mark the submission in flight
    ///
    /// The caller persists the chain before submitting, so a crash in between leaves a marker
    /// that turns the next attempt into [Admission::Recover].
    pub fn begin_submission(&self, chain: &mut Chain, now: DateTime<Utc>) -> Result<Admission, ChainError> {
        expect_phase(chain, Phase::PendingSubmit)?;

        if chain.jobs.len() >= self.policy.max_chain_length {
            let reason = format!("chain length limit of {} reached", self.policy.max_chain_length);
            return Ok(Admission::Refused(self.abort(chain, reason, now)));
        }
        if chain.submit_attempts >= self.policy.max_submit_attempts {
            let reason = format!("{} failed submission attempts", chain.submit_attempts);
            return Ok(Admission::Refused(self.abort(chain, reason, now)));
        }

        let job_name = chain.job_name(chain.jobs.len() + 1);
        if chain.in_flight.as_deref() == Some(job_name.as_str()) {
            return Ok(Admission::Recover { job_name });
        }
        chain.in_flight = Some(job_name.clone());
        chain.updated_at = now;
        Ok(Admission::Proceed { job_name })
    }

    /// Append the job the scheduler accepted and make it active
    pub fn record_submission(&self, chain: &mut Chain, job_id: &str, job_name: &str, wall_time_secs: Option<u64>, now: DateTime<Utc>) -> Result<Transition, ChainError> {
        expect_phase(chain, Phase::PendingSubmit)?;

        let job = Job {
            number: chain.jobs.len() + 1,
            job_id: job_id.to_string(),
            name: job_name.to_string(),
            submitted_at: now,
            wall_time_secs,
            status: JobStatus::Pending,
            started_at: None,
            last_seen: None,
            outcome: None,
            checkpoint: chain.latest_checkpoint.clone(),
        };
        info!("Chain {}: job {} submitted as {job_id}", chain.id, job.number);
        chain.jobs.push(job);
        chain.phase = Phase::Active;
        chain.in_flight = None;
        chain.submit_attempts = 0;
        chain.inconclusive_polls = 0;
        chain.updated_at = now;
        Ok(Transition::Submitted { job_id: job_id.to_string() })
    }

    /// Count a failed submission
    ///
    /// `keep_marker` leaves the in-flight marker in place when the submission may still have
    /// reached the scheduler.
    pub fn record_submission_failure(&self, chain: &mut Chain, reason: &str, keep_marker: bool, now: DateTime<Utc>) -> Transition {
        chain.submit_attempts += 1;
        if !keep_marker {
            chain.in_flight = None;
        }
        chain.updated_at = now;
        let attempts = chain.submit_attempts;
        warn!("Chain {}: submission attempt {attempts} failed: {reason}", chain.id);

        if attempts >= self.policy.max_submit_attempts {
            return self.abort(chain, format!("submission failed {attempts} times, last error: {reason}"), now);
        }
        Transition::SubmissionFailed { attempts }
    }

    fn finish(&self, chain: &mut Chain, outcome: Outcome, cancel: bool, now: DateTime<Utc>) -> Transition {
        let (phase, status) = match outcome {
            Outcome::Success => (Phase::Completed, JobStatus::Completed),
            Outcome::Timeout => (Phase::TimedOut, JobStatus::TimedOut),
            Outcome::Failure => (Phase::Failed, JobStatus::Failed),
            Outcome::Cancelled => (Phase::Cancelled, JobStatus::Cancelled),
        };
        match outcome {
            Outcome::Failure => chain.consecutive_failures += 1,
            Outcome::Success | Outcome::Timeout => chain.consecutive_failures = 0,
            Outcome::Cancelled => {}
        }

        let mut job_id = String::new();
        if let Some(job) = chain.active_job_mut() {
            job.outcome = Some(outcome);
            job.status = status;
            job.last_seen = Some(now);
            job_id = job.job_id.clone();
        }
        chain.phase = phase;
        chain.inconclusive_polls = 0;
        chain.updated_at = now;
        info!("Chain {}: job {job_id} finished ({outcome}), chain is {phase}", chain.id);
        Transition::Finished { job_id, outcome, cancel }
    }

    fn done(&self, chain: &mut Chain, now: DateTime<Utc>) -> Transition {
        info!("Chain {} is done", chain.id);
        chain.phase = Phase::ChainDone;
        chain.in_flight = None;
        chain.updated_at = now;
        Transition::Done
    }

    fn abort(&self, chain: &mut Chain, reason: String, now: DateTime<Utc>) -> Transition {
        warn!("Chain {} aborted: {reason}", chain.id);
        chain.phase = Phase::ChainAborted;
        chain.in_flight = None;
        chain.reason = Some(reason.clone());
        chain.updated_at = now;
        Transition::Aborted { reason }
    }
}

fn expect_phase(chain: &Chain, expected: Phase) -> Result<(), ChainError> {
    if chain.phase == expected {
        Ok(())
    } else {
        Err(ChainError::WrongPhase { id: chain.id.clone(), phase: chain.phase, expected })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::chain::Simulation;
    use crate::submit::ResourceRequest;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn tracker() -> Tracker {
        Tracker::new(Policy {
            max_consecutive_failures: 1,
            max_chain_length: 3,
            grace_margin: Duration::minutes(5),
            max_submit_attempts: 2,
            max_inconclusive_polls: 2,
        })
    }

    fn chain() -> Chain {
        let simulation = Simulation {
            workdir: "/scratch/md".to_string(),
            preload: None,
            executable: "gmx mdrun".to_string(),
            args: String::new(),
            resume_args: None,
            completion_marker: "md.gro".to_string(),
        };
        let resources = ResourceRequest {
            time: "01:00:00".to_string(),
            partition: None,
            nodes: None,
            ntasks_per_node: None,
            account: None,
            exclude: None,
            directives: Vec::new(),
        };
        Chain::new("md", simulation, resources, at(0))
    }

    fn submitted(tracker: &Tracker) -> Chain {
        let mut chain = chain();
        let Admission::Proceed { job_name } = tracker.begin_submission(&mut chain, at(0)).unwrap() else {
            panic!("expected to proceed");
        };
        tracker.record_submission(&mut chain, "100", &job_name, Some(3_600), at(0)).unwrap();
        chain
    }

    fn checkpoint(stamp_ms: i64) -> CheckpointRef {
        CheckpointRef { path: "/scratch/md/md.cpt".to_string(), stamp_ms }
    }

    #[test]
    fn test_submission_activates_chain() {
        let tracker = tracker();
        let chain = submitted(&tracker);

        assert_eq!(chain.phase, Phase::Active);
        assert_eq!(chain.in_flight, None);
        assert_eq!(chain.jobs.len(), 1);
        assert_eq!(chain.jobs[0].name, "md_1");
        assert!(chain.violations().is_empty());
    }

    #[test]
    fn test_running_then_timeout_resubmits_on_progress() {
        let tracker = tracker();
        let mut chain = submitted(&tracker);

        let started = tracker.observe(&mut chain, &PollResult::new("100", "RUNNING"), None, at(1));
        assert_eq!(started, Some(Transition::Started { job_id: "100".to_string() }));
        assert_eq!(tracker.observe(&mut chain, &PollResult::new("100", "RUNNING"), None, at(2)), None);

        let finished = tracker.observe(&mut chain, &PollResult::new("100", "TIMEOUT"), None, at(61));
        assert!(matches!(finished, Some(Transition::Finished { outcome: Outcome::Timeout, cancel: false, .. })));
        assert_eq!(chain.phase, Phase::TimedOut);

        let resolution = Resolution { new_checkpoint: Some(checkpoint(10)), ..Default::default() };
        let next = tracker.resolve(&mut chain, &resolution, at(62));
        assert_eq!(next, Some(Transition::Resubmit { checkpoint: Some(checkpoint(10)) }));
        assert_eq!(chain.phase, Phase::PendingSubmit);
        assert_eq!(chain.latest_checkpoint, Some(checkpoint(10)));
    }

    #[test]
    fn test_timeout_without_progress_aborts() {
        let tracker = tracker();
        let mut chain = submitted(&tracker);
        tracker.observe(&mut chain, &PollResult::new("100", "TIMEOUT"), None, at(61));

        let next = tracker.resolve(&mut chain, &Resolution::default(), at(62));
        assert!(matches!(next, Some(Transition::Aborted { .. })));
        assert_eq!(chain.phase, Phase::ChainAborted);
    }

    #[test]
    fn test_checkpoint_must_be_strictly_newer() {
        let tracker = tracker();
        let mut chain = submitted(&tracker);
        chain.jobs[0].checkpoint = Some(checkpoint(10));
        tracker.observe(&mut chain, &PollResult::new("100", "TIMEOUT"), None, at(61));

        let resolution = Resolution { new_checkpoint: Some(checkpoint(10)), ..Default::default() };
        tracker.resolve(&mut chain, &resolution, at(62));
        assert_eq!(chain.phase, Phase::ChainAborted);
    }

    #[test]
    fn test_completed_without_marker_fails() {
        let tracker = tracker();
        let mut chain = submitted(&tracker);

        let finished = tracker.observe(&mut chain, &PollResult::new("100", "COMPLETED"), Some(false), at(30));
        assert!(matches!(finished, Some(Transition::Finished { outcome: Outcome::Failure, .. })));
        assert_eq!(chain.phase, Phase::Failed);
        assert_eq!(chain.consecutive_failures, 1);
    }

    #[test]
    fn test_completed_with_marker_is_done() {
        let tracker = tracker();
        let mut chain = submitted(&tracker);

        tracker.observe(&mut chain, &PollResult::new("100", "COMPLETED"), Some(true), at(30));
        assert_eq!(chain.phase, Phase::Completed);
        assert_eq!(tracker.resolve(&mut chain, &Resolution::default(), at(31)), Some(Transition::Done));
        assert_eq!(chain.phase, Phase::ChainDone);
    }

    #[test]
    fn test_completed_without_evidence_is_inconclusive() {
        let tracker = tracker();
        let mut chain = submitted(&tracker);

        let next = tracker.observe(&mut chain, &PollResult::new("100", "COMPLETED"), None, at(30));
        assert_eq!(next, Some(Transition::Inconclusive { count: 1 }));
        assert_eq!(chain.phase, Phase::Active);
    }

    #[test]
    fn test_deadline_times_out_silent_job() {
        let tracker = tracker();
        let mut chain = submitted(&tracker);
        tracker.observe(&mut chain, &PollResult::new("100", "RUNNING"), None, at(0));

        assert_eq!(tracker.check_deadline(&mut chain, at(65)), None);
        let next = tracker.check_deadline(&mut chain, at(66));
        assert!(matches!(next, Some(Transition::Finished { outcome: Outcome::Timeout, cancel: true, .. })));
        assert_eq!(chain.phase, Phase::TimedOut);
    }

    #[test]
    fn test_huge_grace_margin_never_times_out() {
        let mut policy = tracker().policy().clone();
        policy.grace_margin = Duration::seconds(10_000_000_000_000);
        let tracker = Tracker::new(policy);
        let mut chain = submitted(&tracker);

        tracker.observe(&mut chain, &PollResult::new("100", "RUNNING"), None, at(1));
        assert_eq!(tracker.observe(&mut chain, &PollResult::new("100", "RUNNING"), None, at(10_000)), None);
        assert_eq!(chain.phase, Phase::Active);
    }

    #[test]
    fn test_requeued_job_gets_a_fresh_deadline() {
        let tracker = tracker();
        let mut chain = submitted(&tracker);
        tracker.observe(&mut chain, &PollResult::new("100", "RUNNING"), None, at(0));

        assert_eq!(tracker.observe(&mut chain, &PollResult::new("100", "REQUEUED"), None, at(30)), None);
        assert_eq!(chain.jobs[0].started_at, None);
        assert_eq!(tracker.observe(&mut chain, &PollResult::new("100", "PENDING"), None, at(70)), None);

        let restarted = tracker.observe(&mut chain, &PollResult::new("100", "RUNNING"), None, at(71));
        assert_eq!(restarted, Some(Transition::Started { job_id: "100".to_string() }));
        assert_eq!(tracker.check_deadline(&mut chain, at(100)), None);
        assert_eq!(chain.phase, Phase::Active);
    }

    #[test]
    fn test_inconclusive_polls_fail_job() {
        let tracker = tracker();
        let mut chain = submitted(&tracker);

        assert_eq!(tracker.inconclusive(&mut chain, at(1)), Some(Transition::Inconclusive { count: 1 }));
        assert_eq!(tracker.inconclusive(&mut chain, at(2)), Some(Transition::Inconclusive { count: 2 }));
        let next = tracker.inconclusive(&mut chain, at(3));
        assert!(matches!(next, Some(Transition::Finished { outcome: Outcome::Failure, cancel: true, .. })));
        assert_eq!(chain.phase, Phase::Failed);
    }

    #[test]
    fn test_conclusive_poll_resets_counter() {
        let tracker = tracker();
        let mut chain = submitted(&tracker);

        tracker.inconclusive(&mut chain, at(1));
        tracker.observe(&mut chain, &PollResult::new("100", "PENDING"), None, at(2));
        assert_eq!(chain.inconclusive_polls, 0);
    }

    #[test]
    fn test_replayed_result_is_ignored() {
        let tracker = tracker();
        let mut chain = submitted(&tracker);
        let poll = PollResult::new("100", "TIMEOUT");

        tracker.observe(&mut chain, &poll, None, at(61));
        let snapshot = chain.clone();
        assert_eq!(tracker.observe(&mut chain, &poll, None, at(62)), None);
        assert_eq!(chain, snapshot);
    }

    #[test]
    fn test_result_for_other_job_is_ignored() {
        let tracker = tracker();
        let mut chain = submitted(&tracker);
        let snapshot = chain.clone();

        assert_eq!(tracker.observe(&mut chain, &PollResult::new("99", "FAILED"), Some(false), at(5)), None);
        assert_eq!(chain, snapshot);
    }

    #[test]
    fn test_cancelled_aborts() {
        let tracker = tracker();
        let mut chain = submitted(&tracker);

        tracker.observe(&mut chain, &PollResult::new("100", "CANCELLED by 4242"), None, at(5));
        assert_eq!(chain.phase, Phase::Cancelled);
        tracker.resolve(&mut chain, &Resolution { new_checkpoint: Some(checkpoint(5)), ..Default::default() }, at(6));
        assert_eq!(chain.phase, Phase::ChainAborted);
    }

    #[test]
    fn test_stop_marker_aborts() {
        let tracker = tracker();
        let mut chain = submitted(&tracker);
        tracker.observe(&mut chain, &PollResult::new("100", "TIMEOUT"), None, at(61));

        let resolution = Resolution { new_checkpoint: Some(checkpoint(5)), restart_blocked: true, ..Default::default() };
        tracker.resolve(&mut chain, &resolution, at(62));
        assert_eq!(chain.phase, Phase::ChainAborted);
        assert_eq!(chain.reason.as_deref(), Some("stop marker present"));
    }

    #[test]
    fn test_finished_simulation_after_timeout_is_done() {
        let tracker = tracker();
        let mut chain = submitted(&tracker);
        tracker.observe(&mut chain, &PollResult::new("100", "TIMEOUT"), None, at(61));

        let resolution = Resolution { simulation_complete: true, ..Default::default() };
        assert_eq!(tracker.resolve(&mut chain, &resolution, at(62)), Some(Transition::Done));
    }

    #[test]
    fn test_consecutive_failures_over_limit_abort() {
        let tracker = tracker();
        let mut chain = submitted(&tracker);
        tracker.observe(&mut chain, &PollResult::new("100", "FAILED"), Some(false), at(10));
        tracker.resolve(&mut chain, &Resolution { new_checkpoint: Some(checkpoint(1)), ..Default::default() }, at(11));
        assert_eq!(chain.phase, Phase::PendingSubmit);

        tracker.begin_submission(&mut chain, at(12)).unwrap();
        tracker.record_submission(&mut chain, "101", "md_2", Some(3_600), at(12)).unwrap();
        tracker.observe(&mut chain, &PollResult::new("101", "FAILED"), Some(false), at(20));
        assert_eq!(chain.consecutive_failures, 2);
        tracker.resolve(&mut chain, &Resolution { new_checkpoint: Some(checkpoint(2)), ..Default::default() }, at(21));
        assert_eq!(chain.phase, Phase::ChainAborted);
        assert_eq!(chain.summary(), crate::chain::Summary::Failed);
    }

    #[test]
    fn test_submission_budget() {
        let tracker = tracker();
        let mut chain = chain();

        tracker.begin_submission(&mut chain, at(0)).unwrap();
        let first = tracker.record_submission_failure(&mut chain, "sbatch: error", false, at(0));
        assert_eq!(first, Transition::SubmissionFailed { attempts: 1 });
        tracker.begin_submission(&mut chain, at(1)).unwrap();
        let second = tracker.record_submission_failure(&mut chain, "sbatch: error", false, at(1));
        assert!(matches!(second, Transition::Aborted { .. }));
        assert_eq!(chain.phase, Phase::ChainAborted);
    }

    #[test]
    fn test_in_flight_marker_turns_into_recovery() {
        let tracker = tracker();
        let mut chain = chain();

        tracker.begin_submission(&mut chain, at(0)).unwrap();
        tracker.record_submission_failure(&mut chain, "connection reset", true, at(0));
        let admission = tracker.begin_submission(&mut chain, at(1)).unwrap();
        assert_eq!(admission, Admission::Recover { job_name: "md_1".to_string() });
    }

    #[test]
    fn test_chain_length_limit() {
        let tracker = tracker();
        let mut chain = chain();
        for number in 1..=3 {
            let job_name = chain.job_name(number);
            tracker.begin_submission(&mut chain, at(0)).unwrap();
            tracker.record_submission(&mut chain, &number.to_string(), &job_name, Some(3_600), at(0)).unwrap();
            tracker.observe(&mut chain, &PollResult::new(&number.to_string(), "TIMEOUT"), None, at(1));
            tracker.resolve(&mut chain, &Resolution { new_checkpoint: Some(checkpoint(number as i64)), ..Default::default() }, at(2));
        }
        assert_eq!(chain.phase, Phase::ChainAborted);
        assert_eq!(chain.jobs.len(), 3);
    }

    #[test]
    fn test_submission_in_wrong_phase() {
        let tracker = tracker();
        let mut chain = submitted(&tracker);
        assert!(tracker.record_submission(&mut chain, "200", "md_2", None, at(1)).is_err());
        assert_eq!(chain.jobs.len(), 1);
    }
}
